//! Lightweight instrumentation counters
//!
//! Every counter is a relaxed atomic; [`WorkstreamMetrics::snapshot`] gives a
//! coherent-enough view for logging or export without locking the hot paths.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct WorkstreamMetrics {
    records_consumed: AtomicU64,
    records_processed: AtomicU64,
    records_failed: AtomicU64,
    records_skipped: AtomicU64,
    fallback_produced: AtomicU64,
    observer_misuse: AtomicU64,
    commits: AtomicU64,
    commit_failures: AtomicU64,
    partitions_paused: AtomicU64,
    partitions_resumed: AtomicU64,
    queued_bytes: AtomicU64,
}

impl WorkstreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_consumed(&self) {
        self.records_consumed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_processed(&self) {
        self.records_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.records_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.records_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fallback_produced(&self) {
        self.fallback_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn observer_misuse(&self) {
        self.observer_misuse.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn commit_failure(&self) {
        self.commit_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn partition_paused(&self) {
        self.partitions_paused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn partition_resumed(&self) {
        self.partitions_resumed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_queued_bytes(&self, bytes: u64) {
        self.queued_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            records_consumed: self.records_consumed.load(Ordering::Relaxed),
            records_processed: self.records_processed.load(Ordering::Relaxed),
            records_failed: self.records_failed.load(Ordering::Relaxed),
            records_skipped: self.records_skipped.load(Ordering::Relaxed),
            fallback_produced: self.fallback_produced.load(Ordering::Relaxed),
            observer_misuse: self.observer_misuse.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            commit_failures: self.commit_failures.load(Ordering::Relaxed),
            partitions_paused: self.partitions_paused.load(Ordering::Relaxed),
            partitions_resumed: self.partitions_resumed.load(Ordering::Relaxed),
            queued_bytes: self.queued_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub records_consumed: u64,
    pub records_processed: u64,
    pub records_failed: u64,
    pub records_skipped: u64,
    pub fallback_produced: u64,
    pub observer_misuse: u64,
    pub commits: u64,
    pub commit_failures: u64,
    pub partitions_paused: u64,
    pub partitions_resumed: u64,
    pub queued_bytes: u64,
}
