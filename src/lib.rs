//! Parallel record processing over partitioned Kafka topics
//!
//! `workstream` decouples consumption from processing: a single consumer polls
//! records and fans them out to a pool of workers through per-subpartition
//! FIFO queues. A user-supplied [`Partitioner`] may split every log partition
//! into several subpartitions that are processed in parallel while each one
//! keeps strict offset order. Offsets are committed only once every earlier
//! record of the partition has been processed, which gives at-least-once
//! delivery with no lost commits.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use workstream::{
//!     KeyHashPartitioner, RecordObserver, WorkerRecord, WorkerTask, Workstream,
//!     WorkstreamConfig,
//! };
//!
//! struct PrintTask;
//!
//! #[async_trait]
//! impl WorkerTask for PrintTask {
//!     async fn process(
//!         &mut self,
//!         record: Arc<WorkerRecord>,
//!         observer: Arc<RecordObserver>,
//!     ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!         println!("{} @ {}", record.subpartition(), record.offset());
//!         observer.on_success().await;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WorkstreamConfig::new(["events"])
//!         .worker_threads(4)
//!         .consumer_property("bootstrap.servers", "localhost:9092")
//!         .consumer_property("group.id", "print-group");
//!
//!     let workers = Workstream::builder(config)
//!         .task_factory(|_sub: &workstream::WorkerSubpartition| {
//!             Box::new(PrintTask) as Box<dyn WorkerTask>
//!         })
//!         .partitioner(Arc::new(KeyHashPartitioner::new(8)))
//!         .build()?;
//!
//!     workers.start().await?;
//!     tokio::time::sleep(Duration::from_secs(60)).await;
//!     workers.shutdown(None).await?;
//!     Ok(())
//! }
//! ```

pub mod workstream;

// Re-export main API
pub use workstream::client::kafka::KafkaLogClient;
pub use workstream::client::{ClientError, ClientEvent, CommitError, LogClient};
pub use workstream::config::{FailureAction, WorkstreamConfig};
pub use workstream::error::{WorkstreamError, WorkstreamResult};
pub use workstream::failure::{FailureSink, KafkaFailureSink, SinkError};
pub use workstream::metrics::{MetricsSnapshot, WorkstreamMetrics};
pub use workstream::observer::RecordObserver;
pub use workstream::partition::{
    DefaultPartitioner, KeyHashPartitioner, Partitioner, TopicPartition, WorkerSubpartition,
};
pub use workstream::record::{Headers, LogRecord, WorkerRecord};
pub use workstream::supervisor::{Workstream, WorkstreamBuilder};
pub use workstream::task::{TaskConfig, TaskFactory, WorkerTask};
