//! vlm-labeler: multi-camera robot episode labeling with a video-language model.
//!
//! This library discovers episodes in a camera-per-directory dataset,
//! synthesizes one stitched, frame-labeled video per episode, sends it to
//! the analysis model and repairs the model's JSON against the episode's
//! frame count.

// Core modules
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod llm;
pub mod media;
pub mod pipeline;
pub mod scheduler;
pub mod storage;
pub mod utils;
pub mod validation;

// Re-export commonly used error types
pub use error::{AnalysisError, ArtifactError, ConfigError, SynthesisError};
