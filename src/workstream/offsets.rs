//! Offset bookkeeping: which records were consumed, which finished, and what
//! is safe to commit
//!
//! Per partition the tracker holds two ordered sets. `consumed` grows strictly
//! monotonically as the consumer routes records; `processed` fills in as
//! observers complete. The committable watermark is the longest prefix of
//! `consumed` fully covered by `processed` — an out-of-order completion never
//! drags the watermark past a still-in-flight earlier offset, which is the
//! at-least-once guarantee: after a crash, replay starts at the watermark and
//! everything before it was processed.
//!
//! Committing is split in two so a broker failure cannot lose progress:
//! [`OffsetRegistry::committable`] is a pure read, and state is trimmed only
//! by [`OffsetRegistry::mark_committed`] once the broker accepted the commit.

use crate::workstream::error::{WorkstreamError, WorkstreamResult};
use crate::workstream::partition::TopicPartition;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// Rejections from the tracker; surfaced as observer misuse or invariant
/// violations depending on who tripped them
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TrackerError {
    NonMonotonic { offset: i64, last: i64 },
    UnknownOffset(i64),
    AlreadyProcessed(i64),
    UnassignedPartition(TopicPartition),
}

impl fmt::Display for TrackerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackerError::NonMonotonic { offset, last } => write!(
                f,
                "consumed offset {} not greater than previous {}",
                offset, last
            ),
            TrackerError::UnknownOffset(offset) => {
                write!(f, "offset {} was never consumed", offset)
            }
            TrackerError::AlreadyProcessed(offset) => {
                write!(f, "offset {} already marked processed", offset)
            }
            TrackerError::UnassignedPartition(tp) => {
                write!(f, "partition {} is not assigned", tp)
            }
        }
    }
}

/// Offset state for one assigned partition
#[derive(Debug)]
struct PartitionTracker {
    /// Consumed offsets with the instant they entered the fabric
    consumed: BTreeMap<i64, Instant>,
    processed: BTreeSet<i64>,
    /// Next offset to be committed; -1 until the first commit
    committed: i64,
    last_consumed: i64,
}

impl PartitionTracker {
    fn new() -> Self {
        Self {
            consumed: BTreeMap::new(),
            processed: BTreeSet::new(),
            committed: -1,
            last_consumed: -1,
        }
    }

    fn add_consumed(&mut self, offset: i64, now: Instant) -> Result<(), TrackerError> {
        if offset <= self.last_consumed {
            return Err(TrackerError::NonMonotonic {
                offset,
                last: self.last_consumed,
            });
        }
        self.consumed.insert(offset, now);
        self.last_consumed = offset;
        Ok(())
    }

    fn mark_processed(&mut self, offset: i64) -> Result<(), TrackerError> {
        if !self.consumed.contains_key(&offset) {
            return Err(TrackerError::UnknownOffset(offset));
        }
        if !self.processed.insert(offset) {
            return Err(TrackerError::AlreadyProcessed(offset));
        }
        Ok(())
    }

    /// Next offset to commit (last fully processed prefix + 1), if any
    fn committable(&self) -> Option<i64> {
        let mut watermark = None;
        for offset in self.consumed.keys() {
            if self.processed.contains(offset) {
                watermark = Some(*offset);
            } else {
                break;
            }
        }
        watermark.map(|o| o + 1)
    }

    /// Record that the broker accepted a commit at `next_offset` and trim
    /// everything below it
    fn mark_committed(&mut self, next_offset: i64) {
        self.committed = next_offset;
        self.consumed = self.consumed.split_off(&next_offset);
        self.processed = self.processed.split_off(&next_offset);
    }

    /// Age of the oldest consumed-but-unprocessed record
    fn oldest_inflight(&self, now: Instant) -> Option<Duration> {
        self.consumed
            .iter()
            .find(|(offset, _)| !self.processed.contains(offset))
            .map(|(_, since)| now.saturating_duration_since(*since))
    }
}

/// Shared map of per-partition trackers
///
/// The outer map changes only on rebalance; each partition has its own mutex
/// so completions on different partitions never contend.
pub(crate) struct OffsetRegistry {
    partitions: RwLock<HashMap<TopicPartition, Arc<Mutex<PartitionTracker>>>>,
}

impl OffsetRegistry {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, partition: TopicPartition) {
        let mut map = self.partitions.write().expect("offset registry poisoned");
        map.entry(partition)
            .or_insert_with(|| Arc::new(Mutex::new(PartitionTracker::new())));
    }

    pub fn remove(&self, partition: &TopicPartition) {
        let mut map = self.partitions.write().expect("offset registry poisoned");
        map.remove(partition);
    }

    fn tracker(&self, partition: &TopicPartition) -> Result<Arc<Mutex<PartitionTracker>>, TrackerError> {
        let map = self.partitions.read().expect("offset registry poisoned");
        map.get(partition)
            .cloned()
            .ok_or_else(|| TrackerError::UnassignedPartition(partition.clone()))
    }

    /// Called by the consumer for every routed record; a monotonicity break
    /// here means the fabric itself is broken
    pub fn add_consumed(&self, partition: &TopicPartition, offset: i64) -> WorkstreamResult<()> {
        let tracker = self.tracker(partition).map_err(|e| {
            WorkstreamError::InvariantViolation(format!("consume on {}: {}", partition, e))
        })?;
        let mut guard = tracker.lock().expect("partition tracker poisoned");
        guard.add_consumed(offset, Instant::now()).map_err(|e| {
            WorkstreamError::InvariantViolation(format!("consume on {}: {}", partition, e))
        })
    }

    /// Called from observers; errors are reported to the caller as misuse
    pub fn mark_processed(
        &self,
        partition: &TopicPartition,
        offset: i64,
    ) -> Result<(), TrackerError> {
        let tracker = self.tracker(partition)?;
        let mut guard = tracker.lock().expect("partition tracker poisoned");
        guard.mark_processed(offset)
    }

    /// Commit map for every partition with an available watermark
    pub fn committable(&self) -> HashMap<TopicPartition, i64> {
        let map = self.partitions.read().expect("offset registry poisoned");
        map.iter()
            .filter_map(|(tp, tracker)| {
                let guard = tracker.lock().expect("partition tracker poisoned");
                guard.committable().map(|next| (tp.clone(), next))
            })
            .collect()
    }

    /// Commit map restricted to the given partitions
    pub fn committable_for(&self, partitions: &[TopicPartition]) -> HashMap<TopicPartition, i64> {
        let map = self.partitions.read().expect("offset registry poisoned");
        partitions
            .iter()
            .filter_map(|tp| {
                let tracker = map.get(tp)?;
                let guard = tracker.lock().expect("partition tracker poisoned");
                guard.committable().map(|next| (tp.clone(), next))
            })
            .collect()
    }

    /// Trim state below the offsets the broker just accepted
    pub fn mark_committed(&self, offsets: &HashMap<TopicPartition, i64>) {
        let map = self.partitions.read().expect("offset registry poisoned");
        for (tp, next_offset) in offsets {
            if let Some(tracker) = map.get(tp) {
                let mut guard = tracker.lock().expect("partition tracker poisoned");
                guard.mark_committed(*next_offset);
            }
        }
    }

    /// Partition with the oldest in-flight record, for the watchdog
    pub fn oldest_inflight(&self) -> Option<(TopicPartition, Duration)> {
        let now = Instant::now();
        let map = self.partitions.read().expect("offset registry poisoned");
        map.iter()
            .filter_map(|(tp, tracker)| {
                let guard = tracker.lock().expect("partition tracker poisoned");
                guard.oldest_inflight(now).map(|age| (tp.clone(), age))
            })
            .max_by_key(|(_, age)| *age)
    }
}
