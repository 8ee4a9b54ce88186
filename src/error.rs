//! Error types for vlm-labeler operations.
//!
//! Defines error types for the major subsystems:
//! - Configuration loading and validation (fatal at startup)
//! - Frame synthesis (per-episode, converted to a skipped episode)
//! - Analysis-service calls (per-episode, converted to `gemini_failed`)
//! - Artifact persistence

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration file is empty: {0}")]
    Empty(PathBuf),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Missing required configuration field: {0}")]
    MissingField(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Prompt file not found: {0}")]
    PromptNotFound(PathBuf),
}

/// Errors that can occur while synthesizing an episode video.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Missing video for camera '{camera}': {path}")]
    MissingVideo { camera: String, path: PathBuf },

    #[error("Could not open video for camera '{camera}' ({path}): {reason}")]
    Unopenable {
        camera: String,
        path: PathBuf,
        reason: String,
    },

    #[error("Failed to spawn {program}: {source}. Is ffmpeg installed?")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("ffprobe failed for {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("Video encoder failed: {0}")]
    Encoder(String),

    #[error("No frames processed for episode {0}")]
    NoFrames(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during analysis-service calls.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("GEMINI_API_KEY is required to call the Gemini API")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Uploaded file {name} failed server-side processing")]
    FileProcessingFailed { name: String },

    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error("Model returned no text content")]
    EmptyResponse,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while persisting episode artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
