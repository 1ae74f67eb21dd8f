//! Worker activities driving user tasks
//!
//! Workers are symmetric peers: each one repeatedly leases a runnable
//! subpartition from the queue manager, runs the task on the head record, and
//! returns the lease. No framework lock is held while user code runs, and a
//! task error is routed through the record's observer rather than failing the
//! worker itself.

use crate::workstream::activity::Activity;
use crate::workstream::error::WorkstreamResult;
use crate::workstream::observer::{ObserverContext, RecordObserver};
use crate::workstream::queue::QueueManager;
use async_trait::async_trait;
use log::{debug, trace};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct WorkerActivity {
    id: usize,
    queues: Arc<QueueManager>,
    observer_ctx: Arc<ObserverContext>,
    sleep: Duration,
}

impl WorkerActivity {
    pub fn new(
        id: usize,
        queues: Arc<QueueManager>,
        observer_ctx: Arc<ObserverContext>,
        sleep: Duration,
    ) -> Self {
        Self {
            id,
            queues,
            observer_ctx,
            sleep,
        }
    }
}

#[async_trait]
impl Activity for WorkerActivity {
    fn name(&self) -> String {
        format!("worker-{}", self.id)
    }

    async fn process(&mut self) -> WorkstreamResult<()> {
        let Some(mut lease) = self.queues.pick_runnable(self.sleep).await else {
            // Nothing accepted within the sleep bound; the outer loop
            // re-checks the shutdown flag before we wait again
            return Ok(());
        };

        trace!(
            "worker-{} processing {}@{} after {:?} queued",
            self.id,
            lease.subpartition,
            lease.record.offset(),
            lease.record.age()
        );
        let observer = Arc::new(RecordObserver::new(
            lease.record.clone(),
            lease.order.clone(),
            self.observer_ctx.clone(),
        ));

        let record = lease.record.clone();
        if let Err(e) = lease.task.process(record, observer.clone()).await {
            // A task error is a failed record, not a failed worker
            observer.on_failure(e).await;
        }

        if let Some(mut task) = self.queues.complete(&lease.subpartition, lease.task) {
            // The partition went away while we were processing
            debug!(
                "worker-{} closing task for revoked {}",
                self.id, lease.subpartition
            );
            task.close(&lease.subpartition).await;
        }
        Ok(())
    }
}
