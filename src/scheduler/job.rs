//! Job definitions for the scheduler.
//!
//! - `EpisodeJob`: one episode to process, as pulled from the queue
//! - `EpisodeStatus`: the per-episode state machine
//! - `ProcessingOutcome`: what a worker reports back for one episode

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::discovery::EpisodeKey;

/// A unit of work: one episode, tagged with its dispatch position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeJob {
    /// Position in discovery order. Completion order may differ.
    pub sequence: usize,
    pub chunk_id: String,
    pub episode_id: String,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
}

impl EpisodeJob {
    pub fn new(sequence: usize, key: &EpisodeKey) -> Self {
        Self {
            sequence,
            chunk_id: key.chunk_id.clone(),
            episode_id: key.episode_id.clone(),
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> EpisodeKey {
        EpisodeKey::new(self.chunk_id.clone(), self.episode_id.clone())
    }

    /// Time spent queued before `now`. Zero if `now` precedes enqueueing.
    pub fn queue_wait(&self, now: DateTime<Utc>) -> Duration {
        (now - self.created_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Per-episode processing state. Everything except `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    /// Not yet processed.
    Pending,
    /// Frame synthesis produced nothing.
    PreprocessFailed,
    /// Analysis was disabled for this run.
    SkippedGemini,
    /// The analysis call returned an error.
    GeminiFailed,
    /// The response held no usable JSON object.
    ParseFailed,
    /// A record was validated and written.
    Ok,
}

impl EpisodeStatus {
    /// All statuses, in state-machine order.
    pub const ALL: [EpisodeStatus; 6] = [
        EpisodeStatus::Pending,
        EpisodeStatus::PreprocessFailed,
        EpisodeStatus::SkippedGemini,
        EpisodeStatus::GeminiFailed,
        EpisodeStatus::ParseFailed,
        EpisodeStatus::Ok,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EpisodeStatus::Pending => "pending",
            EpisodeStatus::PreprocessFailed => "preprocess_failed",
            EpisodeStatus::SkippedGemini => "skipped_gemini",
            EpisodeStatus::GeminiFailed => "gemini_failed",
            EpisodeStatus::ParseFailed => "parse_failed",
            EpisodeStatus::Ok => "ok",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, EpisodeStatus::Pending)
    }

    /// Returns true for outcomes that ended as intended.
    pub fn is_success(&self) -> bool {
        matches!(self, EpisodeStatus::Ok | EpisodeStatus::SkippedGemini)
    }
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of processing one episode.
///
/// Each outcome owns its warnings and errors; nothing is shared between
/// episodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub episode_id: String,
    pub chunk_id: String,
    pub status: EpisodeStatus,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    /// Path of the validated episode JSON, when written.
    pub json_path: Option<PathBuf>,
    /// Path of the raw model text, when written.
    pub raw_path: Option<PathBuf>,
    /// Synthesized frame count, when synthesis succeeded.
    pub frame_count: Option<u32>,
    /// Worker that handled the episode.
    pub worker_id: String,
    /// Wall-clock processing time in milliseconds.
    pub duration_ms: u64,
}

impl ProcessingOutcome {
    /// Creates a pending outcome for a job.
    pub fn pending(job: &EpisodeJob, worker_id: impl Into<String>) -> Self {
        Self {
            episode_id: job.episode_id.clone(),
            chunk_id: job.chunk_id.clone(),
            status: EpisodeStatus::Pending,
            warnings: Vec::new(),
            errors: Vec::new(),
            json_path: None,
            raw_path: None,
            frame_count: None,
            worker_id: worker_id.into(),
            duration_ms: 0,
        }
    }

    /// Moves to a terminal status.
    pub fn finish(mut self, status: EpisodeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}
