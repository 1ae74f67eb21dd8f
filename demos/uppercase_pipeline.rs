//! Minimal end-to-end pipeline: consume a topic with four workers, keep
//! per-key ordering through the hash partitioner, and print each record.
//!
//! Run against a local broker:
//! ```bash
//! cargo run --example uppercase_pipeline -- localhost:9092
//! ```

use async_trait::async_trait;
use log::info;
use std::sync::Arc;
use workstream::{
    KeyHashPartitioner, RecordObserver, WorkerRecord, WorkerSubpartition, WorkerTask, Workstream,
    WorkstreamConfig,
};

struct UppercaseTask;

#[async_trait]
impl WorkerTask for UppercaseTask {
    async fn process(
        &mut self,
        record: Arc<WorkerRecord>,
        observer: Arc<RecordObserver>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let value = record
            .value()
            .map(|v| String::from_utf8_lossy(v).to_uppercase())
            .unwrap_or_default();
        info!(
            "{} @ {}: {}",
            record.subpartition(),
            record.offset(),
            value
        );
        observer.on_success().await;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let brokers = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "localhost:9092".to_string());

    let config = WorkstreamConfig::new(["events"])
        .worker_threads(4)
        .consumer_property("bootstrap.servers", brokers)
        .consumer_property("group.id", "uppercase-pipeline")
        .consumer_property("auto.offset.reset", "earliest");

    let workers = Workstream::builder(config)
        .partitioner(Arc::new(KeyHashPartitioner::new(4)))
        .task_factory(|_sub: &WorkerSubpartition| Box::new(UppercaseTask) as Box<dyn WorkerTask>)
        .build()?;

    workers.start().await?;
    info!("pipeline running, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    workers.shutdown(None).await?;
    info!("final metrics: {:?}", workers.metrics());
    Ok(())
}
