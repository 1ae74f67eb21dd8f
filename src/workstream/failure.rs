//! Fallback routing for records that failed processing
//!
//! When the failure action is `FallbackTopic`, failed records are re-produced
//! to a dead-letter topic through a [`FailureSink`]. The shipped
//! [`KafkaFailureSink`] forwards the original key, value, and headers and adds
//! diagnostic headers describing the failure and its origin.

use crate::workstream::config::WorkstreamConfig;
use crate::workstream::error::{WorkstreamError, WorkstreamResult};
use crate::workstream::record::WorkerRecord;
use async_trait::async_trait;
use log::{debug, info};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Diagnostic header: rendered failure message
pub const HEADER_ERROR_MESSAGE: &str = "error_message";
/// Diagnostic header: coarse failure class
pub const HEADER_ERROR_TYPE: &str = "error_type";
/// Diagnostic header: topic the record was consumed from
pub const HEADER_SOURCE_TOPIC: &str = "source_topic";
/// Diagnostic header: partition the record was consumed from
pub const HEADER_SOURCE_PARTITION: &str = "source_partition";
/// Diagnostic header: offset the record was consumed at
pub const HEADER_SOURCE_OFFSET: &str = "source_offset";

const PRODUCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Error produced by a failure sink; always fatal for the instance
#[derive(Debug)]
pub enum SinkError {
    /// The record could not be produced to the fallback topic
    Produce(String),
    /// The sink was asked to send after being closed
    Closed,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Produce(msg) => write!(f, "fallback produce failed: {}", msg),
            SinkError::Closed => write!(f, "failure sink is closed"),
        }
    }
}

impl Error for SinkError {}

impl From<SinkError> for WorkstreamError {
    fn from(err: SinkError) -> Self {
        WorkstreamError::FailureSink(err.to_string())
    }
}

/// Sidecar that takes ownership of failed records
///
/// Implementations must be safe to share across workers. `send` returning
/// `Ok` is the acknowledgement that lets the record count as processed.
#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn send(&self, record: &WorkerRecord, error_message: &str) -> Result<(), SinkError>;

    async fn close(&self) {}
}

/// Re-produces failed records to a fallback Kafka topic
pub struct KafkaFailureSink {
    producer: FutureProducer,
    topic: String,
}

impl KafkaFailureSink {
    /// Build from the `record.processing.fallback.producer.kafka.*` options
    pub fn from_config(config: &WorkstreamConfig) -> WorkstreamResult<Self> {
        let topic = config.fallback_topic.clone().ok_or_else(|| {
            WorkstreamError::Configuration("fallback topic is not configured".to_string())
        })?;

        let mut client_config = ClientConfig::new();
        for (key, value) in config.fallback_producer_properties() {
            client_config.set(key, value);
        }
        let producer: FutureProducer = client_config.create().map_err(|e| {
            WorkstreamError::Configuration(format!("fallback producer construction failed: {}", e))
        })?;

        info!("fallback producer ready, topic {}", topic);
        Ok(Self { producer, topic })
    }
}

#[async_trait]
impl FailureSink for KafkaFailureSink {
    async fn send(&self, record: &WorkerRecord, error_message: &str) -> Result<(), SinkError> {
        let headers = record
            .headers()
            .clone()
            .insert(HEADER_ERROR_MESSAGE, error_message)
            .insert(HEADER_ERROR_TYPE, "record_processing")
            .insert(HEADER_SOURCE_TOPIC, record.topic())
            .insert(
                HEADER_SOURCE_PARTITION,
                record.topic_partition().partition().to_string(),
            )
            .insert(HEADER_SOURCE_OFFSET, record.offset().to_string());

        let mut future_record: FutureRecord<'_, [u8], [u8]> =
            FutureRecord::to(&self.topic).headers(headers.to_rdkafka_headers());
        if let Some(key) = record.key() {
            future_record = future_record.key(key);
        }
        if let Some(value) = record.value() {
            future_record = future_record.payload(value);
        }

        self.producer
            .send(future_record, Timeout::After(PRODUCE_TIMEOUT))
            .await
            .map_err(|(err, _)| SinkError::Produce(err.to_string()))?;

        debug!(
            "routed failed record {}@{} to {}",
            record.subpartition(),
            record.offset(),
            self.topic
        );
        Ok(())
    }

    async fn close(&self) {
        // Let in-flight deliveries drain before dropping the producer
        let _ = self.producer.flush(Timeout::After(PRODUCE_TIMEOUT));
        info!("fallback producer closed, topic {}", self.topic);
    }
}
