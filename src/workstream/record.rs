//! Records moving through the fabric, and their header metadata
//!
//! A [`LogRecord`] is what the log client hands to the consumer loop; once the
//! partitioner has chosen a subpartition it becomes a [`WorkerRecord`] and is
//! owned by the queue until a worker leases it.

use crate::workstream::partition::{TopicPartition, WorkerSubpartition};
use rdkafka::message::Headers as KafkaHeaders;
use std::time::{Duration, Instant};

/// Record headers: an ordered list of string keys with nullable values
///
/// On the wire, headers are an ordered multi-set — the same key may appear
/// more than once and producers see them in insertion order — so the entries
/// are kept as a list rather than a map. `get` returns the latest value for
/// a key. Every mutation also updates a running byte total, which the queue
/// budgets read per record without re-walking the entries.
///
/// ```rust
/// # use workstream::Headers;
/// let headers = Headers::new()
///     .insert("source", "billing")
///     .insert_null("redacted");
/// assert_eq!(headers.get("source"), Some("billing"));
/// assert!(headers.contains_key("redacted"));
/// assert_eq!(headers.get("redacted"), None);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Headers {
    entries: Vec<(String, Option<String>)>,
    wire_bytes: usize,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            wire_bytes: 0,
        }
    }

    fn push_entry(&mut self, key: String, value: Option<String>) {
        self.wire_bytes += key.len() + value.as_ref().map(String::len).unwrap_or(0);
        self.entries.push((key, value));
    }

    /// Appends a header with a value
    pub fn insert(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push_entry(key.into(), Some(value.into()));
        self
    }

    /// Appends a header with no value (null header)
    pub fn insert_null(mut self, key: impl Into<String>) -> Self {
        self.push_entry(key.into(), None);
        self
    }

    /// Latest value for `key`; `None` for a missing or null header
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Number of header entries, repeated keys included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in wire order
    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Bytes these headers contribute to a record's serialized size
    pub(crate) fn wire_size(&self) -> usize {
        self.wire_bytes
    }

    pub(crate) fn to_rdkafka_headers(&self) -> rdkafka::message::OwnedHeaders {
        self.entries.iter().fold(
            rdkafka::message::OwnedHeaders::new_with_capacity(self.entries.len()),
            |headers, (key, value)| {
                headers.insert(rdkafka::message::Header {
                    key,
                    value: value.as_deref(),
                })
            },
        )
    }

    pub(crate) fn from_rdkafka_headers<H: KafkaHeaders>(kafka_headers: &H) -> Self {
        let mut headers = Self::with_capacity(kafka_headers.count());
        for i in 0..kafka_headers.count() {
            let header = kafka_headers.get(i);
            headers.push_entry(
                header.key.to_string(),
                header.value.map(|v| String::from_utf8_lossy(v).into_owned()),
            );
        }
        headers
    }
}

/// A record as polled from the log, before subpartition routing
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub topic_partition: TopicPartition,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub value: Option<Vec<u8>>,
    pub headers: Headers,
    /// Broker timestamp in epoch milliseconds, when present
    pub timestamp: Option<i64>,
}

impl LogRecord {
    /// Approximate on-the-wire size, used for queue byte budgets
    pub fn serialized_size(&self) -> usize {
        self.key.as_ref().map(|k| k.len()).unwrap_or(0)
            + self.value.as_ref().map(|v| v.len()).unwrap_or(0)
            + self.headers.wire_size()
    }
}

/// A routed record, owned by its subpartition queue until a worker leases it
///
/// Handed to [`WorkerTask::process`](crate::WorkerTask::process) behind an
/// `Arc` so asynchronous tasks can retain it past the `process` call.
#[derive(Debug)]
pub struct WorkerRecord {
    subpartition: WorkerSubpartition,
    offset: i64,
    key: Option<Vec<u8>>,
    value: Option<Vec<u8>>,
    headers: Headers,
    timestamp: Option<i64>,
    size: usize,
    enqueued_at: Instant,
}

impl WorkerRecord {
    pub(crate) fn route(record: LogRecord, sub_id: usize) -> Self {
        let size = record.serialized_size();
        Self {
            subpartition: WorkerSubpartition::new(record.topic_partition, sub_id),
            offset: record.offset,
            key: record.key,
            value: record.value,
            headers: record.headers,
            timestamp: record.timestamp,
            size,
            enqueued_at: Instant::now(),
        }
    }

    pub fn subpartition(&self) -> &WorkerSubpartition {
        &self.subpartition
    }

    pub fn topic_partition(&self) -> &TopicPartition {
        self.subpartition.topic_partition()
    }

    pub fn topic(&self) -> &str {
        self.subpartition.topic()
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Broker timestamp in epoch milliseconds, when present
    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    /// Approximate serialized size in bytes
    pub fn serialized_size(&self) -> usize {
        self.size
    }

    /// Time spent in the fabric since the consumer enqueued this record
    pub fn age(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}
