//! Abstract partitioned-log client
//!
//! The consumer loop talks to the log through [`LogClient`] only. The shipped
//! implementation is [`kafka::KafkaLogClient`]; tests drive the fabric with a
//! scripted in-memory client instead.

pub mod kafka;

use crate::workstream::partition::TopicPartition;
use crate::workstream::record::LogRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// One observation from the log, in the order the client saw it
#[derive(Debug)]
pub enum ClientEvent {
    /// Partitions newly assigned to this instance
    Assigned(Vec<TopicPartition>),
    /// Partitions taken away from this instance
    Revoked(Vec<TopicPartition>),
    /// A polled record
    Record(LogRecord),
}

/// Errors from poll/pause/resume/subscribe
///
/// Retriable errors are logged and the poll loop carries on; fatal errors
/// shut the instance down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    Retriable(String),
    Fatal(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Retriable(msg) => write!(f, "retriable client error: {}", msg),
            ClientError::Fatal(msg) => write!(f, "fatal client error: {}", msg),
        }
    }
}

impl Error for ClientError {}

/// Commit failures, classified so the consumer can budget retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    Retriable(String),
    Fatal(String),
}

impl fmt::Display for CommitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommitError::Retriable(msg) => write!(f, "retriable commit error: {}", msg),
            CommitError::Fatal(msg) => write!(f, "fatal commit error: {}", msg),
        }
    }
}

impl Error for CommitError {}

/// Minimal surface of a partitioned, ordered log with consumer groups
///
/// Implementations must deliver records of one partition in strictly
/// increasing offset order between a matching `Assigned`/`Revoked` pair, and
/// must never auto-commit: the fabric owns every commit.
#[async_trait]
pub trait LogClient: Send {
    /// Join the group for the given topics
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), ClientError>;

    /// Wait up to `timeout` for new events
    ///
    /// Assignment changes are interleaved with records in observation order.
    /// An empty vector after the timeout is normal.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ClientEvent>, ClientError>;

    /// Stop fetching the given partitions without leaving the group
    fn pause(&mut self, partitions: &[TopicPartition]) -> Result<(), ClientError>;

    /// Resume fetching previously paused partitions
    fn resume(&mut self, partitions: &[TopicPartition]) -> Result<(), ClientError>;

    /// Synchronously commit `next offset to read` per partition
    async fn commit(
        &mut self,
        offsets: &HashMap<TopicPartition, i64>,
    ) -> Result<(), CommitError>;

    /// Leave the group and release client resources
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_rendering() {
        assert!(format!("{}", ClientError::Retriable("x".into())).contains("retriable"));
        assert!(format!("{}", ClientError::Fatal("x".into())).contains("fatal"));
        assert!(format!("{}", CommitError::Retriable("x".into())).contains("commit"));
    }
}
