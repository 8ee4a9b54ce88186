//! On-disk output artifacts.

pub mod artifacts;

pub use artifacts::{raw_filename, ArtifactStore};
