//! Host collaborators.
//!
//! The device does not decide where work comes from or whether a nonce is a
//! real solution. It consumes both as capabilities of a [`WorkHost`]:
//!
//! - fetch the next queued work item, if any,
//! - take back a work item once its last generation is retired,
//! - submit a nonce candidate for validation.
//!
//! [`QueueHost`] is the in-process implementation the daemon uses: a bounded
//! queue topped up from a [`JobGenerator`], which validates candidates by
//! hashing the header.

use std::collections::VecDeque;

use crate::job_generator::JobGenerator;
use crate::tracing::prelude::*;
use crate::work::Work;

/// The device's view of its host.
pub trait WorkHost: Send {
    /// Take the next queued work item, or `None` if the queue is empty.
    fn fetch_next_job(&mut self) -> Option<Work>;

    /// Return a work item the device is finished with.
    ///
    /// Called exactly once per work item handed out by `fetch_next_job`.
    fn notify_job_completed(&mut self, work: Work);

    /// Submit a nonce (host byte order) found for `work`.
    ///
    /// Returns whether the candidate was accepted. Validation, duplicate
    /// detection and statistics are the host's concern.
    fn submit_candidate(&mut self, work: &Work, nonce: u32) -> bool;
}

/// Counters kept by [`QueueHost`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostStats {
    pub fetched: u64,
    pub completed: u64,
    pub accepted: u64,
    pub rejected: u64,
}

/// Bounded in-memory work queue.
pub struct QueueHost {
    queue: VecDeque<Work>,

    /// Queue length kept topped up when a generator is attached.
    depth: usize,

    generator: Option<JobGenerator>,
    stats: HostStats,
}

impl QueueHost {
    /// An empty queue fed only through `push`.
    #[cfg(test)]
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            depth: 0,
            generator: None,
            stats: HostStats::default(),
        }
    }

    /// A queue kept at `depth` items from `generator`.
    pub fn with_generator(generator: JobGenerator, depth: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(depth),
            depth,
            generator: Some(generator),
            stats: HostStats::default(),
        }
    }

    #[cfg(test)]
    pub fn push(&mut self, work: Work) {
        self.queue.push_back(work);
    }

    #[cfg(test)]
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> &HostStats {
        &self.stats
    }

    fn top_up(&mut self) {
        if let Some(generator) = self.generator.as_mut() {
            while self.queue.len() < self.depth {
                self.queue.push_back(generator.next_work());
            }
        }
    }
}

impl WorkHost for QueueHost {
    fn fetch_next_job(&mut self) -> Option<Work> {
        self.top_up();
        let work = self.queue.pop_front()?;
        self.stats.fetched += 1;
        Some(work)
    }

    fn notify_job_completed(&mut self, work: Work) {
        self.stats.completed += 1;
        trace!(work_id = work.id, "Work completed");
    }

    fn submit_candidate(&mut self, work: &Work, nonce: u32) -> bool {
        if work.meets_target(nonce) {
            self.stats.accepted += 1;
            debug!(
                work_id = work.id,
                nonce = format!("{:#010x}", nonce),
                hash = %work.header_with_nonce(nonce).block_hash(),
                "Candidate accepted"
            );
            true
        } else {
            self.stats.rejected += 1;
            trace!(
                work_id = work.id,
                nonce = format!("{:#010x}", nonce),
                "Candidate does not meet target"
            );
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work::test_work;
    use bitcoin::pow::Target;

    #[test]
    fn test_fifo_without_generator() {
        let mut host = QueueHost::new();
        assert!(host.fetch_next_job().is_none());

        host.push(test_work(1));
        host.push(test_work(2));
        assert_eq!(host.fetch_next_job().map(|w| w.id), Some(1));
        assert_eq!(host.fetch_next_job().map(|w| w.id), Some(2));
        assert!(host.fetch_next_job().is_none());
        assert_eq!(host.stats().fetched, 2);
    }

    #[test]
    fn test_generator_keeps_queue_full() {
        let mut host = QueueHost::with_generator(JobGenerator::new(Target::MAX), 3);
        for _ in 0..10 {
            assert!(host.fetch_next_job().is_some());
        }
        assert_eq!(host.queued(), 2);
    }

    #[test]
    fn test_submit_validates_against_share_target() {
        let mut host = QueueHost::new();
        let easy = test_work(1);
        assert!(host.submit_candidate(&easy, 1));

        let mut hard = test_work(2);
        hard.share_target = Target::ZERO;
        assert!(!host.submit_candidate(&hard, 1));

        assert_eq!(host.stats().accepted, 1);
        assert_eq!(host.stats().rejected, 1);
    }

    #[test]
    fn test_completion_counted() {
        let mut host = QueueHost::new();
        host.notify_job_completed(test_work(1));
        assert_eq!(host.stats().completed, 1);
    }
}
