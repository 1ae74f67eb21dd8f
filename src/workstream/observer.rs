//! Per-record completion handles
//!
//! Every record delivered to a task comes with a [`RecordObserver`]. Exactly
//! one of [`on_success`](RecordObserver::on_success) /
//! [`on_failure`](RecordObserver::on_failure) must be called, exactly once;
//! the observer is the only path by which a record moves from consumed to
//! processed. Excess or out-of-order completions are reported as observer
//! misuse — they never corrupt the offset tracker, and they only become fatal
//! when the configured failure action is `Shutdown`.

use crate::workstream::config::FailureAction;
use crate::workstream::error::WorkstreamError;
use crate::workstream::failure::FailureSink;
use crate::workstream::metrics::WorkstreamMetrics;
use crate::workstream::offsets::OffsetRegistry;
use crate::workstream::record::WorkerRecord;
use crate::workstream::shutdown::ShutdownController;
use log::{error, warn};
use std::collections::VecDeque;
use std::error::Error;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Expected completion order for one subpartition
///
/// Offsets are enqueued when a record is leased to a worker and must be
/// observed in the same order, even when the task completes observers
/// asynchronously.
#[derive(Debug, Default)]
pub(crate) struct CompletionOrder {
    pending: Mutex<VecDeque<i64>>,
}

impl CompletionOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record at `offset` was handed to a task
    pub fn issued(&self, offset: i64) {
        self.pending
            .lock()
            .expect("completion order poisoned")
            .push_back(offset);
    }

    /// A completion arrived; true when it matches the expected head
    pub fn observe(&self, offset: i64) -> bool {
        let mut pending = self.pending.lock().expect("completion order poisoned");
        if pending.front() == Some(&offset) {
            pending.pop_front();
            true
        } else {
            pending.retain(|o| *o != offset);
            false
        }
    }
}

/// Shared dependencies of every observer
pub(crate) struct ObserverContext {
    pub registry: Arc<OffsetRegistry>,
    pub action: FailureAction,
    pub sink: Option<Arc<dyn FailureSink>>,
    pub shutdown: Arc<ShutdownController>,
    pub metrics: Arc<WorkstreamMetrics>,
}

/// Completion handle for one record
pub struct RecordObserver {
    record: Arc<WorkerRecord>,
    completed: AtomicBool,
    order: Arc<CompletionOrder>,
    ctx: Arc<ObserverContext>,
}

impl RecordObserver {
    pub(crate) fn new(
        record: Arc<WorkerRecord>,
        order: Arc<CompletionOrder>,
        ctx: Arc<ObserverContext>,
    ) -> Self {
        Self {
            record,
            completed: AtomicBool::new(false),
            order,
            ctx,
        }
    }

    /// The record this observer belongs to
    pub fn record(&self) -> &Arc<WorkerRecord> {
        &self.record
    }

    /// Report that the record was processed successfully
    pub async fn on_success(&self) {
        if self.completed.swap(true, Ordering::SeqCst) {
            self.report_misuse(format!(
                "record {}@{} completed more than once",
                self.record.subpartition(),
                self.record.offset()
            ));
            return;
        }
        self.resolve();
        self.ctx.metrics.record_processed();
    }

    /// Report that processing failed; routing follows the failure action
    pub async fn on_failure(&self, cause: Box<dyn Error + Send + Sync>) {
        if self.completed.swap(true, Ordering::SeqCst) {
            self.report_misuse(format!(
                "record {}@{} failed after it was already completed: {}",
                self.record.subpartition(),
                self.record.offset(),
                cause
            ));
            return;
        }
        self.ctx.metrics.record_failed();

        let description = format!(
            "record {}@{} failed: {}",
            self.record.subpartition(),
            self.record.offset(),
            cause
        );
        match self.ctx.action {
            FailureAction::Shutdown => {
                // The record stays unprocessed so no commit can pass it; its
                // completion slot is released so later in-flight completions
                // are not misreported as out of order
                self.order.observe(self.record.offset());
                self.ctx
                    .shutdown
                    .request(Some(WorkstreamError::UserProcessing(description)));
            }
            FailureAction::Skip => {
                warn!("{}; skipping", description);
                self.resolve();
                self.ctx.metrics.record_skipped();
            }
            FailureAction::FallbackTopic => match self.ctx.sink.as_ref() {
                Some(sink) => match sink.send(&self.record, &description).await {
                    Ok(()) => {
                        self.resolve();
                        self.ctx.metrics.fallback_produced();
                    }
                    Err(e) => {
                        error!("{}; fallback rejected the record: {}", description, e);
                        self.ctx.shutdown.request(Some(e.into()));
                    }
                },
                None => self.ctx.shutdown.request(Some(
                    WorkstreamError::InvariantViolation(
                        "fallback failure action configured without a failure sink".to_string(),
                    ),
                )),
            },
        }
    }

    /// True once either completion has been accepted
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    /// Mark the record processed in the tracker, reporting any misuse
    fn resolve(&self) {
        let offset = self.record.offset();
        if !self.order.observe(offset) {
            self.report_misuse(format!(
                "record {}@{} completed out of order within its subpartition",
                self.record.subpartition(),
                offset
            ));
        }
        if let Err(e) = self
            .ctx
            .registry
            .mark_processed(self.record.topic_partition(), offset)
        {
            self.report_misuse(format!(
                "completion for {}@{} not accepted: {}",
                self.record.subpartition(),
                offset,
                e
            ));
        }
    }

    fn report_misuse(&self, message: String) {
        warn!("{}", message);
        self.ctx.metrics.observer_misuse();
        if self.ctx.action == FailureAction::Shutdown {
            self.ctx
                .shutdown
                .request(Some(WorkstreamError::ObserverMisuse(message)));
        }
    }
}
