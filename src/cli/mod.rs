//! Command-line interface for vlm-labeler.
//!
//! Runs one labeling batch from a YAML configuration file.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
