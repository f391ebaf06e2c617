//! Execution metrics
//!
//! Counters only. Thread-safe: the checkpoint writer thread updates flush
//! counters while the query thread updates the rest.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters for checkpoint decisions, flushes and resumes.
///
/// Uses Relaxed ordering; a snapshot is not a consistent cut across counters.
#[derive(Debug, Default)]
pub struct ExecMetrics {
    /// Reward evaluations performed
    rewards_evaluated: AtomicU64,
    /// Evaluations that decided to checkpoint
    rewards_accepted: AtomicU64,
    /// Blocks handed to the writer queue
    checkpoints_enqueued: AtomicU64,
    /// Accepted decisions not written (cost-model-only mode or failed writer)
    checkpoints_skipped: AtomicU64,
    /// Blocks durably flushed
    checkpoints_flushed: AtomicU64,
    /// Bytes durably flushed
    checkpoint_bytes: AtomicU64,
    /// Flush failures
    checkpoint_failures: AtomicU64,
    /// Tree-wide optimizer runs
    tree_optimizer_runs: AtomicU64,
    /// Successful resumes
    resumes: AtomicU64,
    /// Subtrees restarted from `begin()` during resume
    subtree_restarts: AtomicU64,
    /// Tuples handed to the client
    tuples_delivered: AtomicU64,
}

impl ExecMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    // Cost model

    pub fn increment_rewards_evaluated(&self) {
        self.rewards_evaluated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rewards_accepted(&self) {
        self.rewards_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_tree_optimizer_runs(&self) {
        self.tree_optimizer_runs.fetch_add(1, Ordering::Relaxed);
    }

    // Checkpoint flow

    pub fn increment_checkpoints_enqueued(&self) {
        self.checkpoints_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_checkpoints_skipped(&self) {
        self.checkpoints_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one durable flush of `bytes` bytes
    pub fn add_checkpoint_flushed(&self, bytes: u64) {
        self.checkpoints_flushed.fetch_add(1, Ordering::Relaxed);
        self.checkpoint_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn increment_checkpoint_failures(&self) {
        self.checkpoint_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Resume

    pub fn increment_resumes(&self) {
        self.resumes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_subtree_restarts(&self) {
        self.subtree_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_tuples_delivered(&self) {
        self.tuples_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rewards_evaluated: self.rewards_evaluated.load(Ordering::Relaxed),
            rewards_accepted: self.rewards_accepted.load(Ordering::Relaxed),
            checkpoints_enqueued: self.checkpoints_enqueued.load(Ordering::Relaxed),
            checkpoints_skipped: self.checkpoints_skipped.load(Ordering::Relaxed),
            checkpoints_flushed: self.checkpoints_flushed.load(Ordering::Relaxed),
            checkpoint_bytes: self.checkpoint_bytes.load(Ordering::Relaxed),
            checkpoint_failures: self.checkpoint_failures.load(Ordering::Relaxed),
            tree_optimizer_runs: self.tree_optimizer_runs.load(Ordering::Relaxed),
            resumes: self.resumes.load(Ordering::Relaxed),
            subtree_restarts: self.subtree_restarts.load(Ordering::Relaxed),
            tuples_delivered: self.tuples_delivered.load(Ordering::Relaxed),
        }
    }

    /// Snapshot as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time copy of all counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub rewards_evaluated: u64,
    pub rewards_accepted: u64,
    pub checkpoints_enqueued: u64,
    pub checkpoints_skipped: u64,
    pub checkpoints_flushed: u64,
    pub checkpoint_bytes: u64,
    pub checkpoint_failures: u64,
    pub tree_optimizer_runs: u64,
    pub resumes: u64,
    pub subtree_restarts: u64,
    pub tuples_delivered: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        assert_eq!(ExecMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_flush_accounting() {
        let metrics = ExecMetrics::new();
        metrics.add_checkpoint_flushed(100);
        metrics.add_checkpoint_flushed(28);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.checkpoints_flushed, 2);
        assert_eq!(snapshot.checkpoint_bytes, 128);
    }

    #[test]
    fn test_to_json() {
        let metrics = ExecMetrics::new();
        metrics.increment_rewards_evaluated();
        metrics.increment_resumes();

        let parsed: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(parsed["rewards_evaluated"], 1);
        assert_eq!(parsed["resumes"], 1);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(ExecMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        m.increment_checkpoints_enqueued();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(metrics.snapshot().checkpoints_enqueued, 800);
    }
}
