//! Vision-language analysis service integration.
//!
//! The pipeline only needs one capability from the model: take a synthesized
//! episode video plus a prompt and return raw response text. That capability
//! is the [`AnalysisService`] trait; [`GeminiClient`] implements it against
//! the Gemini REST API.
//!
//! ```ignore
//! use vlm_labeler::llm::{AnalysisService, GeminiClient};
//!
//! let client = GeminiClient::from_env("gemini-2.5-pro", None)?;
//! let text = client.analyze_episode(Path::new("episode_000001.mp4"), &prompt).await?;
//! ```

pub mod gemini;
pub mod prompt;

use std::path::Path;

use async_trait::async_trait;

use crate::error::AnalysisError;

pub use gemini::{GeminiClient, GEMINI_API_KEY_ENV};
pub use prompt::{build_prompt, RULE_PROMPT, SCHEMA_PROMPT};

/// A service that analyzes an episode video and returns raw response text.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Submits `video` with `prompt` and returns the model's text verbatim.
    async fn analyze_episode(&self, video: &Path, prompt: &str) -> Result<String, AnalysisError>;
}
