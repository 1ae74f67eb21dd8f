//! Per-subpartition queues and the worker scheduler
//!
//! The [`QueueManager`] owns one FIFO queue per subpartition together with
//! that subpartition's task. Workers lease the head record and the task in
//! one step — taking the task out of the slot is what enforces at-most-one
//! active worker per subpartition — and return the task when the `process`
//! call finishes. A record's bytes stay on the queue's budget until the lease
//! completes, so backpressure covers in-flight work too.
//!
//! Pausing is asymmetric on purpose: a partition pauses as soon as one of its
//! subpartitions overflows its cap (or the global cap is exceeded), but it
//! only resumes once every subpartition is strictly below its cap and the
//! global budget has relief. That keeps the consumer from flapping
//! pause/resume at the boundary.

use crate::workstream::error::{WorkstreamError, WorkstreamResult};
use crate::workstream::metrics::WorkstreamMetrics;
use crate::workstream::observer::CompletionOrder;
use crate::workstream::partition::{TopicPartition, WorkerSubpartition};
use crate::workstream::record::WorkerRecord;
use crate::workstream::task::WorkerTask;
use log::{debug, trace};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// A leased unit of work: one record plus the exclusive right to drive its
/// subpartition's task
pub(crate) struct WorkLease {
    pub subpartition: WorkerSubpartition,
    pub record: Arc<WorkerRecord>,
    pub task: Box<dyn WorkerTask>,
    pub order: Arc<CompletionOrder>,
}

struct SubpartitionQueue {
    records: VecDeque<Arc<WorkerRecord>>,
    /// Queued plus in-flight bytes
    bytes: u64,
    /// Bytes of the currently leased record
    leased_bytes: u64,
    busy: bool,
    /// Present unless leased to a worker
    task: Option<Box<dyn WorkerTask>>,
    order: Arc<CompletionOrder>,
    last_dequeue: Instant,
}

impl SubpartitionQueue {
    fn new(task: Box<dyn WorkerTask>) -> Self {
        Self {
            records: VecDeque::new(),
            bytes: 0,
            leased_bytes: 0,
            busy: false,
            task: Some(task),
            order: Arc::new(CompletionOrder::new()),
            last_dequeue: Instant::now(),
        }
    }
}

struct QueueState {
    queues: HashMap<WorkerSubpartition, SubpartitionQueue>,
    /// Scheduling order; the cursor rotates over this list
    rotation: Vec<WorkerSubpartition>,
    cursor: usize,
    total_bytes: u64,
}

pub(crate) struct QueueManager {
    state: Mutex<QueueState>,
    work_available: Notify,
    per_queue_limit: u64,
    total_limit: Option<u64>,
    metrics: Arc<WorkstreamMetrics>,
}

impl QueueManager {
    pub fn new(
        per_queue_limit: u64,
        total_limit: Option<u64>,
        metrics: Arc<WorkstreamMetrics>,
    ) -> Self {
        Self {
            state: Mutex::new(QueueState {
                queues: HashMap::new(),
                rotation: Vec::new(),
                cursor: 0,
                total_bytes: 0,
            }),
            work_available: Notify::new(),
            per_queue_limit,
            total_limit,
            metrics,
        }
    }

    /// Create the queue for a newly assigned subpartition
    pub fn register(&self, subpartition: WorkerSubpartition, task: Box<dyn WorkerTask>) {
        let mut state = self.state.lock().expect("queue state poisoned");
        if state.queues.contains_key(&subpartition) {
            return;
        }
        state
            .queues
            .insert(subpartition.clone(), SubpartitionQueue::new(task));
        state.rotation.push(subpartition);
    }

    /// Drop every subpartition of a revoked partition
    ///
    /// Returns the tasks that were not leased at the time so the caller can
    /// close them; a leased task is handed back by [`complete`](Self::complete)
    /// as an orphan instead.
    pub fn remove_partition(
        &self,
        partition: &TopicPartition,
    ) -> Vec<(WorkerSubpartition, Box<dyn WorkerTask>)> {
        let mut state = self.state.lock().expect("queue state poisoned");
        let removed: Vec<WorkerSubpartition> = state
            .rotation
            .iter()
            .filter(|sub| sub.topic_partition() == partition)
            .cloned()
            .collect();

        let mut tasks = Vec::new();
        for sub in &removed {
            if let Some(queue) = state.queues.remove(sub) {
                state.total_bytes -= queue.bytes;
                debug!(
                    "dropping queue {} with {} pending records",
                    sub,
                    queue.records.len()
                );
                if let Some(task) = queue.task {
                    tasks.push((sub.clone(), task));
                }
            }
        }
        state.rotation.retain(|sub| sub.topic_partition() != partition);
        if !state.rotation.is_empty() {
            state.cursor %= state.rotation.len();
        } else {
            state.cursor = 0;
        }
        self.metrics.set_queued_bytes(state.total_bytes);
        tasks
    }

    /// Append a routed record to its subpartition queue
    pub fn push(&self, record: WorkerRecord) -> WorkstreamResult<()> {
        let size = record.serialized_size() as u64;
        let mut state = self.state.lock().expect("queue state poisoned");
        let queue = state
            .queues
            .get_mut(record.subpartition())
            .ok_or_else(|| {
                WorkstreamError::InvariantViolation(format!(
                    "record routed to unregistered subpartition {}",
                    record.subpartition()
                ))
            })?;
        queue.records.push_back(Arc::new(record));
        queue.bytes += size;
        state.total_bytes += size;
        self.metrics.set_queued_bytes(state.total_bytes);
        drop(state);
        self.work_available.notify_one();
        Ok(())
    }

    /// Wait up to `max_wait` for a runnable subpartition
    ///
    /// A subpartition is runnable when it has a queued record, is not leased
    /// to another worker, and its task accepts the head record. Selection
    /// rotates a cursor over the subpartition list so no runnable
    /// subpartition is skipped indefinitely.
    pub async fn pick_runnable(&self, max_wait: Duration) -> Option<WorkLease> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let notified = self.work_available.notified();
            if let Some(lease) = self.try_pick() {
                return Some(lease);
            }
            tokio::pin!(notified);
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }

    fn try_pick(&self) -> Option<WorkLease> {
        let mut state = self.state.lock().expect("queue state poisoned");
        let len = state.rotation.len();
        for step in 0..len {
            let idx = (state.cursor + step) % len;
            let sub = state.rotation[idx].clone();
            let queue = state.queues.get_mut(&sub).expect("rotation out of sync");
            if queue.busy {
                continue;
            }
            let accepted = match (queue.records.front(), queue.task.as_ref()) {
                (Some(head), Some(task)) => task.accept(head),
                _ => false,
            };
            if !accepted {
                continue;
            }

            let record = queue.records.pop_front().expect("head vanished");
            queue.busy = true;
            queue.leased_bytes = record.serialized_size() as u64;
            queue.order.issued(record.offset());
            let task = queue.task.take().expect("task vanished");
            let order = queue.order.clone();
            state.cursor = (idx + 1) % len;
            trace!("leased {}@{}", sub, record.offset());
            return Some(WorkLease {
                subpartition: sub,
                record,
                task,
                order,
            });
        }
        None
    }

    /// Return a lease after `process` finished
    ///
    /// Frees the record's bytes from the queue budget and re-arms the
    /// subpartition for scheduling. When the partition was revoked mid-lease
    /// the task has no home anymore and is handed back for closing.
    pub fn complete(
        &self,
        subpartition: &WorkerSubpartition,
        task: Box<dyn WorkerTask>,
    ) -> Option<Box<dyn WorkerTask>> {
        let mut state = self.state.lock().expect("queue state poisoned");
        let Some(queue) = state.queues.get_mut(subpartition) else {
            debug!("lease for {} completed after revocation", subpartition);
            return Some(task);
        };
        let leased = queue.leased_bytes;
        queue.bytes -= leased;
        queue.leased_bytes = 0;
        queue.busy = false;
        queue.task = Some(task);
        trace!(
            "{} lease done, {:?} since previous dequeue",
            subpartition,
            queue.last_dequeue.elapsed()
        );
        queue.last_dequeue = Instant::now();
        state.total_bytes -= leased;
        self.metrics.set_queued_bytes(state.total_bytes);
        drop(state);
        // The queue may have more records ready for another worker
        self.work_available.notify_one();
        None
    }

    /// True when the consumer should stop polling this partition
    pub fn should_pause(&self, partition: &TopicPartition) -> bool {
        let state = self.state.lock().expect("queue state poisoned");
        if let Some(limit) = self.total_limit {
            if state.total_bytes > limit {
                return true;
            }
        }
        state
            .queues
            .iter()
            .any(|(sub, queue)| sub.topic_partition() == partition && queue.bytes > self.per_queue_limit)
    }

    /// True when a paused partition has fully drained below its budgets
    pub fn should_resume(&self, partition: &TopicPartition) -> bool {
        let state = self.state.lock().expect("queue state poisoned");
        if let Some(limit) = self.total_limit {
            if state.total_bytes > limit {
                return false;
            }
        }
        state
            .queues
            .iter()
            .filter(|(sub, _)| sub.topic_partition() == partition)
            .all(|(_, queue)| queue.bytes < self.per_queue_limit)
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().expect("queue state poisoned").total_bytes
    }

    pub fn partition_bytes(&self, partition: &TopicPartition) -> u64 {
        let state = self.state.lock().expect("queue state poisoned");
        state
            .queues
            .iter()
            .filter(|(sub, _)| sub.topic_partition() == partition)
            .map(|(_, queue)| queue.bytes)
            .sum()
    }
}
