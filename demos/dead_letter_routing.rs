//! Fallback-topic failure handling: records whose payload is not valid JSON
//! are re-produced to a dead-letter topic and the stream keeps moving.
//!
//! ```bash
//! cargo run --example dead_letter_routing -- localhost:9092
//! ```

use async_trait::async_trait;
use log::info;
use serde_json::Value;
use std::sync::Arc;
use workstream::{
    FailureAction, RecordObserver, WorkerRecord, WorkerSubpartition, WorkerTask, Workstream,
    WorkstreamConfig,
};

struct JsonValidatingTask;

#[async_trait]
impl WorkerTask for JsonValidatingTask {
    async fn process(
        &mut self,
        record: Arc<WorkerRecord>,
        observer: Arc<RecordObserver>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let payload = record.value().unwrap_or_default();
        match serde_json::from_slice::<Value>(payload) {
            Ok(doc) => {
                info!("{} @ {}: {}", record.subpartition(), record.offset(), doc);
                observer.on_success().await;
                Ok(())
            }
            // Returning the error routes the record through the observer's
            // failure path, which re-produces it to the fallback topic
            Err(e) => Err(format!("invalid JSON: {}", e).into()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let brokers = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "localhost:9092".to_string());

    let config = WorkstreamConfig::new(["documents"])
        .worker_threads(2)
        .failure_action(FailureAction::FallbackTopic)
        .fallback_topic("documents-dead")
        .consumer_property("bootstrap.servers", brokers.clone())
        .consumer_property("group.id", "dead-letter-demo")
        .fallback_producer_property("bootstrap.servers", brokers);

    let workers = Workstream::builder(config)
        .task_factory(|_sub: &WorkerSubpartition| {
            Box::new(JsonValidatingTask) as Box<dyn WorkerTask>
        })
        .build()?;

    workers.start().await?;
    info!("validating documents, ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    workers.shutdown(None).await?;
    info!("final metrics: {:?}", workers.metrics());
    Ok(())
}
