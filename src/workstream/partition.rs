//! Topic partitions, subpartitions, and the routing contract
//!
//! A [`Partitioner`] splits every assigned log partition into a fixed number
//! of subpartitions. Each subpartition is an independently ordered stream:
//! records of one subpartition are processed strictly in offset order while
//! different subpartitions of the same partition run in parallel.

use crate::workstream::record::LogRecord;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A single partition of a topic, as assigned by the log broker
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPartition {
    topic: String,
    partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A sub-stream of one log partition; the unit of processing order
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerSubpartition {
    topic_partition: TopicPartition,
    sub_id: usize,
}

impl WorkerSubpartition {
    pub fn new(topic_partition: TopicPartition, sub_id: usize) -> Self {
        Self {
            topic_partition,
            sub_id,
        }
    }

    pub fn topic_partition(&self) -> &TopicPartition {
        &self.topic_partition
    }

    pub fn topic(&self) -> &str {
        self.topic_partition.topic()
    }

    pub fn partition(&self) -> i32 {
        self.topic_partition.partition()
    }

    pub fn sub_id(&self) -> usize {
        self.sub_id
    }
}

impl fmt::Display for WorkerSubpartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.topic_partition, self.sub_id)
    }
}

/// Maps every polled record to a subpartition id
///
/// Implementations must be deterministic: the same record always lands on the
/// same subpartition, and the returned id must stay below
/// `count(record.topic_partition())`.
pub trait Partitioner: Send + Sync {
    /// Subpartition id for a record, in `[0, count)`
    fn subpartition(&self, record: &LogRecord) -> usize;

    /// Number of subpartitions for a partition
    fn count(&self, partition: &TopicPartition) -> usize;
}

/// One subpartition per partition; preserves plain per-partition ordering
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPartitioner;

impl Partitioner for DefaultPartitioner {
    fn subpartition(&self, _record: &LogRecord) -> usize {
        0
    }

    fn count(&self, _partition: &TopicPartition) -> usize {
        1
    }
}

/// Routes records by hash of their key
///
/// Records sharing a key share a subpartition, so per-key ordering survives
/// the parallel fan-out. Keyless records all land on subpartition 0.
#[derive(Debug, Clone, Copy)]
pub struct KeyHashPartitioner {
    subpartitions: usize,
}

impl KeyHashPartitioner {
    /// `subpartitions` is the per-partition parallelism; must be at least 1
    pub fn new(subpartitions: usize) -> Self {
        Self {
            subpartitions: subpartitions.max(1),
        }
    }
}

impl Partitioner for KeyHashPartitioner {
    fn subpartition(&self, record: &LogRecord) -> usize {
        match record.key.as_deref() {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.subpartitions as u64) as usize
            }
            None => 0,
        }
    }

    fn count(&self, _partition: &TopicPartition) -> usize {
        self.subpartitions
    }
}
