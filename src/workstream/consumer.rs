//! The single consumer loop
//!
//! Owns the log client and, with it, every commit: workers only ever mark
//! offsets processed, and this loop turns tracker state into commit calls.
//! Centralizing commits on one activity means every commit reflects a
//! consistent snapshot of the trackers; there is no race between a worker
//! completion advancing the watermark and the commit call capturing it.
//!
//! Per cycle: poll the client, fold assignment changes, route records to
//! subpartition queues, reconcile pause/resume with the queue budgets, check
//! the processing-timeout watchdog, and commit on the configured cadence.

use crate::workstream::activity::Activity;
use crate::workstream::client::{ClientError, ClientEvent, CommitError, LogClient};
use crate::workstream::config::WorkstreamConfig;
use crate::workstream::error::{WorkstreamError, WorkstreamResult};
use crate::workstream::metrics::WorkstreamMetrics;
use crate::workstream::offsets::OffsetRegistry;
use crate::workstream::partition::{Partitioner, TopicPartition, WorkerSubpartition};
use crate::workstream::queue::QueueManager;
use crate::workstream::record::{LogRecord, WorkerRecord};
use crate::workstream::task::{TaskConfig, TaskFactory};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(crate) struct ConsumerActivity {
    client: Box<dyn LogClient>,
    registry: Arc<OffsetRegistry>,
    queues: Arc<QueueManager>,
    partitioner: Arc<dyn Partitioner>,
    task_factory: Arc<dyn TaskFactory>,
    task_config: TaskConfig,
    metrics: Arc<WorkstreamMetrics>,
    topics: Vec<String>,
    poll_timeout: Duration,
    commit_interval: Duration,
    processing_timeout: Duration,
    commit_retries: u32,
    assigned: HashSet<TopicPartition>,
    paused: HashSet<TopicPartition>,
    last_commit: Instant,
    consecutive_commit_failures: u32,
}

impl ConsumerActivity {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &WorkstreamConfig,
        client: Box<dyn LogClient>,
        registry: Arc<OffsetRegistry>,
        queues: Arc<QueueManager>,
        partitioner: Arc<dyn Partitioner>,
        task_factory: Arc<dyn TaskFactory>,
        metrics: Arc<WorkstreamMetrics>,
    ) -> Self {
        Self {
            client,
            registry,
            queues,
            partitioner,
            task_factory,
            task_config: TaskConfig::new(config.task_properties().clone()),
            metrics,
            topics: config.topics.clone(),
            poll_timeout: config.poll_timeout,
            commit_interval: config.commit_interval,
            processing_timeout: config.processing_timeout,
            commit_retries: config.commit_retries,
            assigned: HashSet::new(),
            paused: HashSet::new(),
            last_commit: Instant::now(),
            consecutive_commit_failures: 0,
        }
    }

    async fn on_assigned(&mut self, partitions: Vec<TopicPartition>) -> WorkstreamResult<()> {
        for tp in partitions {
            if !self.assigned.insert(tp.clone()) {
                continue;
            }
            self.registry.register(tp.clone());
            let count = self.partitioner.count(&tp).max(1);
            for sub_id in 0..count {
                let sub = WorkerSubpartition::new(tp.clone(), sub_id);
                let mut task = self.task_factory.create(&sub);
                task.init(&sub, &self.task_config).await.map_err(|e| {
                    WorkstreamError::UserProcessing(format!("task init for {} failed: {}", sub, e))
                })?;
                self.queues.register(sub, task);
            }
            info!("partition {} assigned with {} subpartitions", tp, count);
        }
        Ok(())
    }

    async fn on_revoked(&mut self, partitions: Vec<TopicPartition>) -> WorkstreamResult<()> {
        // Last chance to commit finished work for these partitions
        let offsets = self.registry.committable_for(&partitions);
        if !offsets.is_empty() {
            match self.client.commit(&offsets).await {
                Ok(()) => {
                    self.registry.mark_committed(&offsets);
                    self.metrics.commit();
                }
                Err(CommitError::Retriable(msg)) => {
                    warn!("commit on revocation failed, releasing anyway: {}", msg)
                }
                Err(CommitError::Fatal(msg)) => return Err(WorkstreamError::Client(msg)),
            }
        }

        for tp in partitions {
            for (sub, mut task) in self.queues.remove_partition(&tp) {
                task.close(&sub).await;
            }
            self.registry.remove(&tp);
            self.paused.remove(&tp);
            self.assigned.remove(&tp);
            info!("partition {} released", tp);
        }
        Ok(())
    }

    fn route(&mut self, record: LogRecord) -> WorkstreamResult<()> {
        if !self.assigned.contains(&record.topic_partition) {
            debug!(
                "dropping record {}@{} for unassigned partition",
                record.topic_partition, record.offset
            );
            return Ok(());
        }
        let sub_id = self.partitioner.subpartition(&record);
        let count = self.partitioner.count(&record.topic_partition);
        if sub_id >= count {
            return Err(WorkstreamError::InvariantViolation(format!(
                "partitioner returned subpartition {} for {} with only {} subpartitions",
                sub_id, record.topic_partition, count
            )));
        }
        self.registry
            .add_consumed(&record.topic_partition, record.offset)?;
        self.metrics.record_consumed();
        self.queues.push(WorkerRecord::route(record, sub_id))
    }

    /// Reconcile broker-side fetching with the queue byte budgets
    fn manage_backpressure(&mut self) -> WorkstreamResult<()> {
        for tp in &self.assigned {
            if !self.paused.contains(tp) && self.queues.should_pause(tp) {
                self.client
                    .pause(std::slice::from_ref(tp))
                    .map_err(|e| WorkstreamError::Client(e.to_string()))?;
                self.paused.insert(tp.clone());
                self.metrics.partition_paused();
                info!(
                    "paused {} ({} queued bytes)",
                    tp,
                    self.queues.partition_bytes(tp)
                );
            } else if self.paused.contains(tp) && self.queues.should_resume(tp) {
                self.client
                    .resume(std::slice::from_ref(tp))
                    .map_err(|e| WorkstreamError::Client(e.to_string()))?;
                self.paused.remove(tp);
                self.metrics.partition_resumed();
                info!("resumed {}", tp);
            }
        }
        Ok(())
    }

    fn check_watchdog(&self) -> WorkstreamResult<()> {
        if let Some((tp, age)) = self.registry.oldest_inflight() {
            if age > self.processing_timeout {
                return Err(WorkstreamError::ProcessingTimeout {
                    partition: tp,
                    age,
                    timeout: self.processing_timeout,
                });
            }
        }
        Ok(())
    }

    async fn maybe_commit(&mut self) -> WorkstreamResult<()> {
        if self.last_commit.elapsed() < self.commit_interval {
            return Ok(());
        }
        self.commit_processed().await?;
        self.last_commit = Instant::now();
        Ok(())
    }

    async fn commit_processed(&mut self) -> WorkstreamResult<()> {
        let offsets = self.registry.committable();
        if offsets.is_empty() {
            return Ok(());
        }
        match self.client.commit(&offsets).await {
            Ok(()) => {
                self.registry.mark_committed(&offsets);
                self.consecutive_commit_failures = 0;
                self.metrics.commit();
                debug!("committed {:?}", offsets);
                Ok(())
            }
            Err(CommitError::Retriable(msg)) => {
                self.consecutive_commit_failures += 1;
                self.metrics.commit_failure();
                if self.consecutive_commit_failures > self.commit_retries {
                    Err(WorkstreamError::CommitFailed {
                        retries: self.commit_retries,
                        last: msg,
                    })
                } else {
                    warn!(
                        "retriable commit failure {}/{}: {}",
                        self.consecutive_commit_failures, self.commit_retries, msg
                    );
                    Ok(())
                }
            }
            Err(CommitError::Fatal(msg)) => {
                self.metrics.commit_failure();
                Err(WorkstreamError::Client(msg))
            }
        }
    }
}

#[async_trait]
impl Activity for ConsumerActivity {
    fn name(&self) -> String {
        "consumer".to_string()
    }

    async fn init(&mut self) -> WorkstreamResult<()> {
        self.client
            .subscribe(&self.topics)
            .await
            .map_err(|e| WorkstreamError::Client(e.to_string()))
    }

    async fn process(&mut self) -> WorkstreamResult<()> {
        let events = match self.client.poll(self.poll_timeout).await {
            Ok(events) => events,
            Err(ClientError::Retriable(msg)) => {
                warn!("retriable poll failure: {}", msg);
                return Ok(());
            }
            Err(ClientError::Fatal(msg)) => return Err(WorkstreamError::Client(msg)),
        };

        for event in events {
            match event {
                ClientEvent::Assigned(tps) => self.on_assigned(tps).await?,
                ClientEvent::Revoked(tps) => self.on_revoked(tps).await?,
                ClientEvent::Record(record) => self.route(record)?,
            }
        }

        self.manage_backpressure()?;
        self.check_watchdog()?;
        self.maybe_commit().await
    }

    async fn close(&mut self) {
        // Best effort: commit whatever finished before the shutdown
        let offsets = self.registry.committable();
        if !offsets.is_empty() {
            match self.client.commit(&offsets).await {
                Ok(()) => {
                    self.registry.mark_committed(&offsets);
                    self.metrics.commit();
                    info!("final commit: {:?}", offsets);
                }
                Err(e) => warn!("final commit failed: {}", e),
            }
        }

        let assigned: Vec<TopicPartition> = self.assigned.drain().collect();
        for tp in assigned {
            for (sub, mut task) in self.queues.remove_partition(&tp) {
                task.close(&sub).await;
            }
            self.registry.remove(&tp);
        }
        self.client.close().await;
    }
}
