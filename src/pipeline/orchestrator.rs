//! Pipeline orchestrator for labeling a batch of episodes.
//!
//! This module provides the `PipelineOrchestrator` that coordinates:
//! - Episode discovery
//! - Startup checks (prompt resource, label font, credentials)
//! - Fan-out over the worker pool
//! - Per-episode and end-of-batch reporting

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{load_prompt_config, PipelineConfig, PromptConfig};
use crate::discovery::{discover_episodes, EpisodeKey};
use crate::error::ConfigError;
use crate::llm::GeminiClient;
use crate::media::transform::FrameLabeler;
use crate::media::{FfmpegSynthesizer, FrameSynthesizer};
use crate::scheduler::{
    EpisodeStatus, JobQueue, PoolError, PoolStats, ProcessingOutcome, WorkerPool,
    WorkerPoolConfig,
};
use crate::storage::ArtifactStore;

use super::context::{gemini_factory, ServiceFactory};
use super::runner::EpisodeRunner;

/// Errors that stop a batch before any episode runs.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker pool could not be built.
    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Per-run switches, usually from the command line.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    /// Stop every episode after synthesis.
    pub skip_analysis: bool,
    /// Overrides `processing.num_workers`.
    pub num_workers: Option<usize>,
}

/// What a batch produced.
#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    /// Episodes found by discovery.
    pub discovered: usize,
    /// Outcomes in completion order.
    pub outcomes: Vec<ProcessingOutcome>,
    /// Outcome count per terminal status.
    pub counts: BTreeMap<EpisodeStatus, usize>,
    /// Pool statistics, when a pool ran.
    pub stats: Option<PoolStats>,
}

impl BatchSummary {
    fn new(discovered: usize, outcomes: Vec<ProcessingOutcome>, stats: PoolStats) -> Self {
        let mut counts = BTreeMap::new();
        for outcome in &outcomes {
            *counts.entry(outcome.status).or_insert(0) += 1;
        }
        Self {
            discovered,
            outcomes,
            counts,
            stats: Some(stats),
        }
    }

    /// Number of outcomes with `status`.
    pub fn count(&self, status: EpisodeStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Outcome for an episode, if it was processed.
    pub fn outcome(&self, episode_id: &str) -> Option<&ProcessingOutcome> {
        self.outcomes.iter().find(|o| o.episode_id == episode_id)
    }

    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }
}

/// Runs discovered episodes through the worker pool.
///
/// Components are injected so tests can swap the synthesizer and the
/// analysis client.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    synthesizer: Arc<dyn FrameSynthesizer>,
    factory: ServiceFactory,
    prompt: PromptConfig,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        synthesizer: Arc<dyn FrameSynthesizer>,
        factory: ServiceFactory,
        prompt: PromptConfig,
    ) -> Self {
        Self {
            config,
            synthesizer,
            factory,
            prompt,
        }
    }

    /// Processes `keys` to terminal outcomes.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Pool` if the worker count is zero.
    pub async fn process(
        &self,
        keys: &[EpisodeKey],
        options: &BatchOptions,
    ) -> Result<BatchSummary, PipelineError> {
        let num_workers = options
            .num_workers
            .unwrap_or(self.config.processing.num_workers);

        let runner = Arc::new(EpisodeRunner::new(
            Arc::clone(&self.synthesizer),
            ArtifactStore::new(self.config.output.clone()),
            self.prompt.clone(),
            options.skip_analysis,
        ));
        let pool = WorkerPool::new(
            WorkerPoolConfig::new(num_workers),
            runner,
            Arc::clone(&self.factory),
        )?;

        let started = Instant::now();
        let outcomes = pool.run(JobQueue::from_keys(keys), log_outcome).await;
        let summary = BatchSummary::new(keys.len(), outcomes, pool.stats());

        log_summary(&summary);
        info!(
            elapsed_secs = started.elapsed().as_secs_f64(),
            success_rate = summary.stats.as_ref().map_or(0.0, PoolStats::success_rate),
            "Batch complete"
        );
        Ok(summary)
    }
}

/// Runs a full batch from configuration.
///
/// Discovery runs first; an empty result ends the batch before any startup
/// check. A missing prompt resource or unreadable configured label font is
/// fatal. Missing credentials downgrade the run to synthesis only.
pub async fn run_batch(
    config: &PipelineConfig,
    options: BatchOptions,
) -> Result<BatchSummary, PipelineError> {
    let keys = discover_episodes(&config.dataset_root, &config.cameras.targets, &config.episodes);
    if keys.is_empty() {
        info!(root = %config.dataset_root.display(), "No episodes found to process");
        return Ok(BatchSummary::default());
    }
    info!(episodes = keys.len(), "Discovered episodes");

    let prompt = load_prompt_config(&config.prompt_path)?;
    let labeler = FrameLabeler::load(config.processing.label_font.as_deref())?;
    info!(font = %labeler.source(), "Label font loaded");

    let mut options = options;
    if !options.skip_analysis && !GeminiClient::credentials_available() {
        warn!("GEMINI_API_KEY not set; running without analysis");
        options.skip_analysis = true;
    }

    let synthesizer = FfmpegSynthesizer::from_config(config, Arc::new(labeler));
    let orchestrator = PipelineOrchestrator::new(
        config.clone(),
        Arc::new(synthesizer),
        gemini_factory(&config.gemini),
        prompt,
    );
    orchestrator.process(&keys, &options).await
}

fn log_outcome(outcome: &ProcessingOutcome) {
    info!(
        chunk_id = %outcome.chunk_id,
        episode_id = %outcome.episode_id,
        status = %outcome.status,
        worker_id = %outcome.worker_id,
        frames = ?outcome.frame_count,
        duration_ms = outcome.duration_ms,
        "Episode finished"
    );
    for warning in &outcome.warnings {
        warn!(episode_id = %outcome.episode_id, "{}", warning);
    }
    for message in &outcome.errors {
        error!(episode_id = %outcome.episode_id, "{}", message);
    }
}

fn log_summary(summary: &BatchSummary) {
    for status in EpisodeStatus::ALL {
        let count = summary.count(status);
        if count > 0 {
            info!(status = %status, count, "Batch status count");
        }
    }
    info!(
        discovered = summary.discovered,
        processed = summary.processed(),
        "Batch summary"
    );
}
