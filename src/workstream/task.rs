//! User task contract
//!
//! A [`TaskFactory`] creates one [`WorkerTask`] per subpartition when the
//! partition is assigned; the task is closed when the partition is revoked.
//! The scheduler guarantees at most one worker drives a given task at a time,
//! and that `process` sees the subpartition's records in strictly increasing
//! offset order.

use crate::workstream::observer::RecordObserver;
use crate::workstream::partition::WorkerSubpartition;
use crate::workstream::record::WorkerRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

/// Options handed to tasks at init, from the `worker.task.*` namespace
#[derive(Debug, Clone, Default)]
pub struct TaskConfig {
    properties: HashMap<String, String>,
}

impl TaskConfig {
    pub fn new(properties: HashMap<String, String>) -> Self {
        Self { properties }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }
}

/// A unit of user processing bound to one subpartition
///
/// `process` must complete the observer exactly once — possibly after
/// returning, if the work is handed off — and must complete observers in the
/// order records were received. Returning `Err` is shorthand for failing the
/// record: the worker routes it through the observer's failure path.
#[async_trait]
pub trait WorkerTask: Send {
    /// Called once before any record is delivered
    async fn init(
        &mut self,
        _subpartition: &WorkerSubpartition,
        _config: &TaskConfig,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    /// Whether the head record of the subpartition can be processed now
    ///
    /// Called under the scheduler lock: keep it cheap and non-blocking. A
    /// subpartition whose task declines is skipped until the next scheduling
    /// pass.
    fn accept(&self, _record: &WorkerRecord) -> bool {
        true
    }

    /// Process one record and complete `observer` exactly once
    async fn process(
        &mut self,
        record: Arc<WorkerRecord>,
        observer: Arc<RecordObserver>,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Called once when the subpartition goes away
    async fn close(&mut self, _subpartition: &WorkerSubpartition) {}
}

/// Creates a task for every subpartition of the assigned partitions
pub trait TaskFactory: Send + Sync {
    fn create(&self, subpartition: &WorkerSubpartition) -> Box<dyn WorkerTask>;
}

impl<F> TaskFactory for F
where
    F: Fn(&WorkerSubpartition) -> Box<dyn WorkerTask> + Send + Sync,
{
    fn create(&self, subpartition: &WorkerSubpartition) -> Box<dyn WorkerTask> {
        self(subpartition)
    }
}
