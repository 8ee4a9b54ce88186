//! In-process job queue shared by the workers of one batch.
//!
//! All jobs are enqueued before workers start; a worker that finds the queue
//! empty exits. Dequeue order is FIFO, but since workers run concurrently the
//! order in which jobs complete is unspecified.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::job::EpisodeJob;
use crate::discovery::EpisodeKey;

/// FIFO queue of episode jobs.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: Mutex<VecDeque<EpisodeJob>>,
    total: usize,
}

impl JobQueue {
    /// Builds a queue holding one job per key, in key order.
    pub fn from_keys(keys: &[EpisodeKey]) -> Self {
        let jobs: VecDeque<EpisodeJob> = keys
            .iter()
            .enumerate()
            .map(|(sequence, key)| EpisodeJob::new(sequence, key))
            .collect();
        Self {
            total: jobs.len(),
            jobs: Mutex::new(jobs),
        }
    }

    /// Takes the next job, or `None` when the queue is drained.
    pub fn dequeue(&self) -> Option<EpisodeJob> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
    }

    /// Jobs not yet taken.
    pub fn len(&self) -> usize {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Jobs the queue was built with, taken or not.
    pub fn total_jobs(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let keys = vec![
            EpisodeKey::new("chunk-000", "000001"),
            EpisodeKey::new("chunk-000", "000002"),
            EpisodeKey::new("chunk-001", "000003"),
        ];
        let queue = JobQueue::from_keys(&keys);

        assert_eq!(queue.total_jobs(), 3);
        assert_eq!(queue.len(), 3);

        let first = queue.dequeue().unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.episode_id, "000001");
        assert_eq!(queue.dequeue().unwrap().episode_id, "000002");
        assert_eq!(queue.dequeue().unwrap().chunk_id, "chunk-001");
        assert!(queue.dequeue().is_none());
        assert!(queue.is_empty());
        assert_eq!(queue.total_jobs(), 3);
    }

    #[test]
    fn test_empty_queue() {
        let queue = JobQueue::default();
        assert!(queue.is_empty());
        assert_eq!(queue.total_jobs(), 0);
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn test_concurrent_dequeue_hands_out_each_job_once() {
        let keys: Vec<EpisodeKey> = (0..100)
            .map(|i| EpisodeKey::new("chunk-000", format!("{i:06}")))
            .collect();
        let queue = std::sync::Arc::new(JobQueue::from_keys(&keys));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = std::sync::Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Some(job) = queue.dequeue() {
                        taken.push(job.sequence);
                    }
                    taken
                })
            })
            .collect();

        let mut all: Vec<usize> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }
}
