//! Instance lifecycle: construction, start, and bi-directional shutdown
//!
//! [`Workstream`] owns the shared fabric (queues, trackers, metrics, shutdown
//! state) and the handles of every spawned activity. Shutdown can be
//! requested externally through [`Workstream::shutdown`] or internally by any
//! activity hitting a fatal error; both paths converge on the same sequence:
//! flip the shared flag, join workers first and the consumer last, then close
//! the failure sink. An activity that ignores the flag past the configured
//! grace period is aborted: a worker wedged inside user code must not stall
//! the join forever.

use crate::workstream::activity::spawn_supervised;
use crate::workstream::client::kafka::KafkaLogClient;
use crate::workstream::client::LogClient;
use crate::workstream::config::{FailureAction, WorkstreamConfig};
use crate::workstream::consumer::ConsumerActivity;
use crate::workstream::error::{WorkstreamError, WorkstreamResult};
use crate::workstream::failure::{FailureSink, KafkaFailureSink};
use crate::workstream::metrics::{MetricsSnapshot, WorkstreamMetrics};
use crate::workstream::observer::ObserverContext;
use crate::workstream::offsets::OffsetRegistry;
use crate::workstream::partition::{DefaultPartitioner, Partitioner};
use crate::workstream::queue::QueueManager;
use crate::workstream::shutdown::ShutdownController;
use crate::workstream::task::TaskFactory;
use crate::workstream::worker::WorkerActivity;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Closed,
}

struct Inner {
    phase: Phase,
    client: Option<Box<dyn LogClient>>,
    worker_handles: Vec<JoinHandle<()>>,
    consumer_handle: Option<JoinHandle<()>>,
}

/// A running (or startable) worker-pool instance
pub struct Workstream {
    config: WorkstreamConfig,
    ctrl: Arc<ShutdownController>,
    metrics: Arc<WorkstreamMetrics>,
    registry: Arc<OffsetRegistry>,
    queues: Arc<QueueManager>,
    partitioner: Arc<dyn Partitioner>,
    task_factory: Arc<dyn TaskFactory>,
    sink: Option<Arc<dyn FailureSink>>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Workstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workstream").finish_non_exhaustive()
    }
}

impl Workstream {
    pub fn builder(config: WorkstreamConfig) -> WorkstreamBuilder {
        WorkstreamBuilder {
            config,
            client: None,
            task_factory: None,
            partitioner: None,
            failure_sink: None,
        }
    }

    /// Spawn the consumer and worker activities; returns without waiting
    pub async fn start(&self) -> WorkstreamResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.phase {
            Phase::Created => {}
            Phase::Running => {
                return Err(WorkstreamError::Configuration(
                    "start() called on a running instance".to_string(),
                ))
            }
            Phase::Closed => return Err(WorkstreamError::AlreadyClosed),
        }

        let client = inner.client.take().expect("client present before start");
        let observer_ctx = Arc::new(ObserverContext {
            registry: self.registry.clone(),
            action: self.config.failure_action,
            sink: self.sink.clone(),
            shutdown: self.ctrl.clone(),
            metrics: self.metrics.clone(),
        });

        inner.worker_handles = (0..self.config.worker_threads)
            .map(|id| {
                spawn_supervised(
                    WorkerActivity::new(
                        id,
                        self.queues.clone(),
                        observer_ctx.clone(),
                        self.config.worker_sleep,
                    ),
                    self.ctrl.clone(),
                )
            })
            .collect();
        let consumer = ConsumerActivity::new(
            &self.config,
            client,
            self.registry.clone(),
            self.queues.clone(),
            self.partitioner.clone(),
            self.task_factory.clone(),
            self.metrics.clone(),
        );
        inner.consumer_handle = Some(spawn_supervised(consumer, self.ctrl.clone()));
        inner.phase = Phase::Running;
        info!(
            "started: {} workers over topics {:?}",
            self.config.worker_threads, self.config.topics
        );
        Ok(())
    }

    /// Stop everything and join it, recording `cause` if it is the first
    ///
    /// Safe to call from any context once; returns `AlreadyClosed` after the
    /// instance has completed. Workers are joined before the consumer so the
    /// final commit sees as many completions as possible.
    pub async fn shutdown(&self, cause: Option<WorkstreamError>) -> WorkstreamResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.phase == Phase::Closed {
            return Err(WorkstreamError::AlreadyClosed);
        }
        self.ctrl.request(cause);

        let workers = std::mem::take(&mut inner.worker_handles);
        for (id, handle) in workers.into_iter().enumerate() {
            join_or_abort(&format!("worker-{}", id), handle, self.config.shutdown_timeout).await;
        }
        if let Some(handle) = inner.consumer_handle.take() {
            join_or_abort("consumer", handle, self.config.shutdown_timeout).await;
        }
        if let Some(sink) = &self.sink {
            sink.close().await;
        }
        inner.phase = Phase::Closed;
        match self.ctrl.cause() {
            Some(cause) => info!("shutdown complete, cause: {}", cause),
            None => info!("shutdown complete"),
        }
        Ok(())
    }

    /// Block until some activity requests shutdown, then complete it
    ///
    /// Returns the failure cause as an error, or `Ok` for a clean stop.
    pub async fn wait_for_shutdown(&self) -> WorkstreamResult<()> {
        self.ctrl.wait().await;
        match self.shutdown(None).await {
            Ok(()) | Err(WorkstreamError::AlreadyClosed) => {}
            Err(e) => return Err(e),
        }
        match self.cause() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }

    /// First fatal error, once the instance is shutting down or closed
    pub fn cause(&self) -> Option<WorkstreamError> {
        self.ctrl.cause()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// Assembles a [`Workstream`] from its pluggable parts
///
/// Only the task factory is mandatory. The log client defaults to
/// [`KafkaLogClient`] built from the config; the partitioner defaults to one
/// subpartition per partition; the failure sink defaults to a Kafka producer
/// when the failure action asks for a fallback topic.
pub struct WorkstreamBuilder {
    config: WorkstreamConfig,
    client: Option<Box<dyn LogClient>>,
    task_factory: Option<Arc<dyn TaskFactory>>,
    partitioner: Option<Arc<dyn Partitioner>>,
    failure_sink: Option<Arc<dyn FailureSink>>,
}

impl WorkstreamBuilder {
    /// Use a custom log client instead of the Kafka default
    pub fn client(mut self, client: Box<dyn LogClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn task_factory(mut self, factory: impl TaskFactory + 'static) -> Self {
        self.task_factory = Some(Arc::new(factory));
        self
    }

    pub fn partitioner(mut self, partitioner: Arc<dyn Partitioner>) -> Self {
        self.partitioner = Some(partitioner);
        self
    }

    /// Use a custom failure sink instead of the Kafka fallback producer
    pub fn failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.failure_sink = Some(sink);
        self
    }

    pub fn build(self) -> WorkstreamResult<Workstream> {
        self.config.validate()?;
        let task_factory = self.task_factory.ok_or_else(|| {
            WorkstreamError::Configuration("a task factory is required".to_string())
        })?;
        let client = match self.client {
            Some(client) => client,
            None => Box::new(KafkaLogClient::from_config(&self.config)?) as Box<dyn LogClient>,
        };
        let sink = match self.failure_sink {
            Some(sink) => Some(sink),
            None if self.config.failure_action == FailureAction::FallbackTopic => {
                Some(Arc::new(KafkaFailureSink::from_config(&self.config)?) as Arc<dyn FailureSink>)
            }
            None => None,
        };

        let metrics = Arc::new(WorkstreamMetrics::new());
        let queues = Arc::new(QueueManager::new(
            self.config.max_queue_bytes,
            self.config.total_max_queue_bytes,
            metrics.clone(),
        ));
        Ok(Workstream {
            ctrl: Arc::new(ShutdownController::new()),
            metrics,
            registry: Arc::new(OffsetRegistry::new()),
            queues,
            partitioner: self
                .partitioner
                .unwrap_or_else(|| Arc::new(DefaultPartitioner)),
            task_factory,
            sink,
            inner: Mutex::new(Inner {
                phase: Phase::Created,
                client: Some(client),
                worker_handles: Vec::new(),
                consumer_handle: None,
            }),
            config: self.config,
        })
    }
}

/// Join an activity, aborting it if the grace period runs out
async fn join_or_abort(name: &str, mut handle: JoinHandle<()>, grace: Duration) {
    match tokio::time::timeout(grace, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("activity {} panicked: {}", name, e),
        Err(_) => {
            warn!("activity {} still running after {:?}, aborting", name, grace);
            handle.abort();
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workstream::client::{ClientError, ClientEvent, CommitError};
    use crate::workstream::observer::RecordObserver;
    use crate::workstream::partition::{TopicPartition, WorkerSubpartition};
    use crate::workstream::record::WorkerRecord;
    use crate::workstream::task::WorkerTask;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::error::Error;
    use std::time::Duration;

    struct IdleClient;

    #[async_trait]
    impl LogClient for IdleClient {
        async fn subscribe(&mut self, _topics: &[String]) -> Result<(), ClientError> {
            Ok(())
        }

        async fn poll(&mut self, timeout: Duration) -> Result<Vec<ClientEvent>, ClientError> {
            tokio::time::sleep(timeout.min(Duration::from_millis(5))).await;
            Ok(Vec::new())
        }

        fn pause(&mut self, _partitions: &[TopicPartition]) -> Result<(), ClientError> {
            Ok(())
        }

        fn resume(&mut self, _partitions: &[TopicPartition]) -> Result<(), ClientError> {
            Ok(())
        }

        async fn commit(
            &mut self,
            _offsets: &HashMap<TopicPartition, i64>,
        ) -> Result<(), CommitError> {
            Ok(())
        }

        async fn close(&mut self) {}
    }

    struct NoopTask;

    #[async_trait]
    impl WorkerTask for NoopTask {
        async fn process(
            &mut self,
            _record: std::sync::Arc<WorkerRecord>,
            observer: std::sync::Arc<RecordObserver>,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            observer.on_success().await;
            Ok(())
        }
    }

    fn instance() -> Workstream {
        let config = WorkstreamConfig::new(["events"])
            .poll_timeout(Duration::from_millis(5))
            .worker_sleep(Duration::from_millis(5))
            .worker_threads(2)
            .shutdown_timeout(Duration::from_secs(1));
        Workstream::builder(config)
            .client(Box::new(IdleClient))
            .task_factory(|_sub: &WorkerSubpartition| Box::new(NoopTask) as Box<dyn WorkerTask>)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_task_factory() {
        let config = WorkstreamConfig::new(["events"]);
        let err = Workstream::builder(config)
            .client(Box::new(IdleClient))
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkstreamError::Configuration(_)));
    }

    #[test]
    fn test_build_validates_config() {
        let config = WorkstreamConfig::default(); // no topics
        let err = Workstream::builder(config)
            .client(Box::new(IdleClient))
            .task_factory(|_sub: &WorkerSubpartition| Box::new(NoopTask) as Box<dyn WorkerTask>)
            .build()
            .unwrap_err();
        assert!(matches!(err, WorkstreamError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_start_shutdown_lifecycle() {
        let instance = instance();
        instance.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        instance.shutdown(None).await.unwrap();
        assert_eq!(instance.cause(), None);

        // closed for good now
        assert!(matches!(
            instance.shutdown(None).await,
            Err(WorkstreamError::AlreadyClosed)
        ));
        assert!(matches!(
            instance.start().await,
            Err(WorkstreamError::AlreadyClosed)
        ));
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let instance = instance();
        instance.start().await.unwrap();
        assert!(matches!(
            instance.start().await,
            Err(WorkstreamError::Configuration(_))
        ));
        instance.shutdown(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_with_cause_exposes_it() {
        let instance = instance();
        instance.start().await.unwrap();
        instance
            .shutdown(Some(WorkstreamError::Client("operator request".into())))
            .await
            .unwrap();
        assert_eq!(
            instance.cause(),
            Some(WorkstreamError::Client("operator request".into()))
        );
    }

    #[tokio::test]
    async fn test_shutdown_before_start_is_clean() {
        let instance = instance();
        instance.shutdown(None).await.unwrap();
        assert!(matches!(
            instance.shutdown(None).await,
            Err(WorkstreamError::AlreadyClosed)
        ));
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_returns_cause() {
        let instance = std::sync::Arc::new(instance());
        instance.start().await.unwrap();

        let waiter = instance.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_shutdown().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        instance
            .shutdown(Some(WorkstreamError::Client("boom".into())))
            .await
            .unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(WorkstreamError::Client("boom".into())));
    }
}
