//! Worker pool for processing episode jobs.
//!
//! A fixed number of long-lived workers pull jobs from a shared
//! [`JobQueue`] and push outcomes through a channel. Each worker owns its
//! own [`WorkerContext`], so analysis clients are never shared.
//!
//! # Features
//!
//! - Configurable number of workers (1 = sequential)
//! - Outcomes reported in completion order
//! - Per-episode failure isolation: panics become terminal outcomes
//! - Pool statistics tracking

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::pipeline::{EpisodeRunner, ServiceFactory, WorkerContext};
use crate::utils::panic_message;

use super::job::{EpisodeJob, EpisodeStatus, ProcessingOutcome};
use super::queue::JobQueue;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was configured without workers.
    #[error("Worker pool needs at least one worker")]
    NoWorkers,
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    pub num_workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { num_workers: 1 }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self { num_workers }
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Episodes that ended `ok` or `skipped_gemini`.
    pub episodes_succeeded: u64,
    /// Episodes that ended in any failure state.
    pub episodes_failed: u64,
    /// Average episode processing duration.
    pub average_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of episodes processed.
    pub fn total_processed(&self) -> u64 {
        self.episodes_succeeded + self.episodes_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.episodes_succeeded as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    episodes_succeeded: AtomicU64,
    episodes_failed: AtomicU64,
    total_duration_ms: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            episodes_succeeded: AtomicU64::new(0),
            episodes_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
        }
    }

    fn record(&self, status: EpisodeStatus, duration: Duration) {
        if status.is_success() {
            self.episodes_succeeded.fetch_add(1, Ordering::SeqCst);
        } else {
            self.episodes_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let succeeded = self.episodes_succeeded.load(Ordering::SeqCst);
        let failed = self.episodes_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);

        let total = succeeded + failed;
        let average_duration = if total > 0 {
            Duration::from_millis(total_duration_ms / total)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            episodes_succeeded: succeeded,
            episodes_failed: failed,
            average_duration,
        }
    }
}

/// Worker pool that runs a batch of episode jobs.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    runner: Arc<EpisodeRunner>,
    factory: ServiceFactory,
    stats: Arc<SharedPoolStats>,
}

impl WorkerPool {
    /// Creates a new worker pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::NoWorkers` if `num_workers` is zero.
    pub fn new(
        config: WorkerPoolConfig,
        runner: Arc<EpisodeRunner>,
        factory: ServiceFactory,
    ) -> Result<Self, PoolError> {
        if config.num_workers == 0 {
            return Err(PoolError::NoWorkers);
        }

        Ok(Self {
            config,
            runner,
            factory,
            stats: Arc::new(SharedPoolStats::new()),
        })
    }

    /// Runs every job in `queue` to a terminal outcome.
    ///
    /// `on_outcome` is called once per episode as outcomes arrive. The
    /// returned outcomes are in completion order.
    pub async fn run<F>(&self, queue: JobQueue, mut on_outcome: F) -> Vec<ProcessingOutcome>
    where
        F: FnMut(&ProcessingOutcome),
    {
        let total = queue.total_jobs();
        if queue.is_empty() {
            return Vec::new();
        }

        let queue = Arc::new(queue);
        let num_workers = self.config.num_workers.min(total);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let handles: Vec<_> = (0..num_workers)
            .map(|i| {
                let worker = Worker::new(
                    format!("worker-{}", i),
                    Arc::clone(&queue),
                    Arc::clone(&self.runner),
                    Arc::clone(&self.factory),
                    tx.clone(),
                    Arc::clone(&self.stats),
                );
                tokio::spawn(worker.run())
            })
            .collect();
        drop(tx);

        info!(num_workers, episodes = total, "Worker pool started");

        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = rx.recv().await {
            on_outcome(&outcome);
            outcomes.push(outcome);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task terminated abnormally");
            }
        }

        info!(processed = outcomes.len(), "Worker pool finished");
        outcomes
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.config.num_workers)
    }
}

/// A single worker that processes jobs from the queue until it is drained.
struct Worker {
    /// Unique identifier for this worker.
    id: String,
    queue: Arc<JobQueue>,
    runner: Arc<EpisodeRunner>,
    factory: ServiceFactory,
    results: mpsc::UnboundedSender<ProcessingOutcome>,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    fn new(
        id: String,
        queue: Arc<JobQueue>,
        runner: Arc<EpisodeRunner>,
        factory: ServiceFactory,
        results: mpsc::UnboundedSender<ProcessingOutcome>,
        stats: Arc<SharedPoolStats>,
    ) -> Self {
        Self {
            id,
            queue,
            runner,
            factory,
            results,
            stats,
        }
    }

    /// Main worker loop.
    async fn run(self) {
        info!(worker_id = %self.id, "Worker started");
        let mut ctx = WorkerContext::new(self.id.clone(), Arc::clone(&self.factory));

        while let Some(job) = self.queue.dequeue() {
            let outcome = self.process_job(&mut ctx, job).await;
            if self.results.send(outcome).is_err() {
                error!(worker_id = %self.id, "Result channel closed; stopping worker");
                break;
            }
        }

        info!(
            worker_id = %self.id,
            episodes = ctx.episodes_handled(),
            "Worker stopped"
        );
    }

    /// Processes a single job. The runner classifies panics after synthesis
    /// itself; anything that still escapes becomes `preprocess_failed`.
    async fn process_job(&self, ctx: &mut WorkerContext, job: EpisodeJob) -> ProcessingOutcome {
        let start_time = Instant::now();
        debug!(
            worker_id = %self.id,
            sequence = job.sequence,
            episode_id = %job.episode_id,
            queue_wait_ms = job.queue_wait(Utc::now()).as_millis() as u64,
            "Dequeued job"
        );

        let result = AssertUnwindSafe(self.runner.process_episode(ctx, &job))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(
                    worker_id = %self.id,
                    episode_id = %job.episode_id,
                    error = %message,
                    "Episode processing panicked"
                );
                let mut outcome = ProcessingOutcome::pending(&job, self.id.as_str());
                outcome.error(format!("episode processing panicked: {message}"));
                outcome
                    .finish(EpisodeStatus::PreprocessFailed)
                    .with_duration(start_time.elapsed())
            }
        };

        self.stats.record(outcome.status, start_time.elapsed());
        outcome
    }
}
