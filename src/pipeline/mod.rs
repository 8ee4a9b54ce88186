//! Batch orchestration for episode labeling.
//!
//! # Architecture
//!
//! - **Orchestrator**: discovery, startup checks and the worker pool
//! - **Runner**: drives a single episode to a terminal status
//! - **Context**: per-worker state holding the lazily built analysis client
//!
//! # Episode Flow
//!
//! 1. **Synthesis**: camera videos are sampled, stitched and frame-labeled
//! 2. **Analysis**: the synthesized video and prompt go to the model
//! 3. **Raw persistence**: the model's text is written before any parsing
//! 4. **Validation**: JSON is extracted and repaired against the frame count
//! 5. **Storage**: the repaired record is written as JSON
//!
//! A failure at any step ends the episode with its own status; other
//! episodes are unaffected.
//!
//! # Example
//!
//! ```rust,ignore
//! use vlm_labeler::config::PipelineConfig;
//! use vlm_labeler::pipeline::{run_batch, BatchOptions};
//!
//! let config = PipelineConfig::load("config/config.yaml".as_ref())?;
//! let summary = run_batch(&config, BatchOptions::default()).await?;
//! println!("{} episodes processed", summary.processed());
//! ```

pub mod context;
pub mod orchestrator;
pub mod runner;

// Re-export main types for convenience
pub use context::{gemini_factory, service_factory, ServiceFactory, WorkerContext};
pub use orchestrator::{run_batch, BatchOptions, BatchSummary, PipelineError, PipelineOrchestrator};
pub use runner::EpisodeRunner;
