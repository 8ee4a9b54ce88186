//! Batch scheduling: an in-process job queue drained by a fixed worker pool.
//!
//! - **JobQueue**: FIFO queue filled once from discovery results
//! - **WorkerPool**: long-lived workers that drain the queue concurrently
//! - **EpisodeJob / ProcessingOutcome**: what goes in and what comes out
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!                      │  Discovery   │
//!                      └──────┬───────┘
//!                             │
//!                      ┌──────▼───────┐
//!                      │   JobQueue   │
//!                      └──────┬───────┘
//!                             │
//!         ┌───────────────────┼───────────────────┐
//!         │                   │                   │
//!         ▼                   ▼                   ▼
//!    ┌─────────┐         ┌─────────┐         ┌─────────┐
//!    │ Worker 1│         │ Worker 2│         │ Worker N│
//!    └────┬────┘         └────┬────┘         └────┬────┘
//!         └───────────────────┼───────────────────┘
//!                             ▼
//!                      ┌──────────────┐
//!                      │ result chan  │
//!                      └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use vlm_labeler::scheduler::{JobQueue, WorkerPool, WorkerPoolConfig};
//!
//! let queue = JobQueue::from_keys(&keys);
//! let pool = WorkerPool::new(WorkerPoolConfig::new(4), runner, factory)?;
//! let outcomes = pool.run(queue, |o| println!("{} {}", o.episode_id, o.status)).await;
//! ```

pub mod job;
pub mod queue;
pub mod worker_pool;

// Re-export main types for convenience
pub use job::{EpisodeJob, EpisodeStatus, ProcessingOutcome};
pub use queue::JobQueue;
pub use worker_pool::{PoolError, PoolStats, WorkerPool, WorkerPoolConfig};
