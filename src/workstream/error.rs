//! Error taxonomy for the processing fabric
//!
//! Fatal errors shut the whole instance down with the first cause winning;
//! user-level processing failures are routed through the configured
//! [`FailureAction`](crate::FailureAction) instead and only become fatal when
//! that action is `Shutdown`.

use crate::workstream::partition::TopicPartition;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Convenience alias used throughout the crate
pub type WorkstreamResult<T> = Result<T, WorkstreamError>;

/// Top-level error type exposed by [`Workstream`](crate::Workstream)
///
/// Causes are carried as rendered strings so the first failure can be stored
/// once and handed out to every caller that asks for it after shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkstreamError {
    /// Invalid configuration detected at construction; prevents startup
    Configuration(String),
    /// A user task failed while processing a record
    UserProcessing(String),
    /// An observer was completed twice, out of order, or for an unknown offset
    ObserverMisuse(String),
    /// A consumed record stayed in flight longer than the processing timeout
    ProcessingTimeout {
        partition: TopicPartition,
        age: Duration,
        timeout: Duration,
    },
    /// Retriable commit failures exceeded the configured retry budget
    CommitFailed { retries: u32, last: String },
    /// Fatal error reported by the log client
    Client(String),
    /// The fallback failure sink rejected a record
    FailureSink(String),
    /// An internal invariant was broken (e.g. non-monotonic consume order)
    InvariantViolation(String),
    /// Lifecycle method invoked after the instance already completed
    AlreadyClosed,
}

impl fmt::Display for WorkstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkstreamError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            WorkstreamError::UserProcessing(msg) => write!(f, "Record processing failed: {}", msg),
            WorkstreamError::ObserverMisuse(msg) => write!(f, "Observer misuse: {}", msg),
            WorkstreamError::ProcessingTimeout {
                partition,
                age,
                timeout,
            } => write!(
                f,
                "Record on {} in flight for {:?} (timeout {:?})",
                partition, age, timeout
            ),
            WorkstreamError::CommitFailed { retries, last } => write!(
                f,
                "Offset commit failed after {} retriable failures: {}",
                retries, last
            ),
            WorkstreamError::Client(msg) => write!(f, "Log client error: {}", msg),
            WorkstreamError::FailureSink(msg) => write!(f, "Failure sink error: {}", msg),
            WorkstreamError::InvariantViolation(msg) => {
                write!(f, "Internal invariant violation: {}", msg)
            }
            WorkstreamError::AlreadyClosed => write!(f, "Instance is already closed"),
        }
    }
}

impl Error for WorkstreamError {}

impl WorkstreamError {
    /// True for errors that terminate the instance when they reach the
    /// supervisor
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            WorkstreamError::UserProcessing(_) | WorkstreamError::ObserverMisuse(_)
        )
    }
}
