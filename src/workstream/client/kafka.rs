//! Kafka implementation of the log client
//!
//! Wraps an rdkafka `StreamConsumer` with a custom consumer context that
//! queues rebalance callbacks, so assignment changes surface as ordinary
//! [`ClientEvent`]s in the poll stream. Rebalance callbacks run on rdkafka's
//! background thread, hence the mutex-guarded queue.

use crate::workstream::client::{ClientError, ClientEvent, CommitError, LogClient};
use crate::workstream::config::WorkstreamConfig;
use crate::workstream::error::{WorkstreamError, WorkstreamResult};
use crate::workstream::partition::TopicPartition;
use crate::workstream::record::{Headers, LogRecord};
use async_trait::async_trait;
use futures::StreamExt;
use log::{debug, info, warn};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{
    CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer,
};
use rdkafka::error::KafkaError;
use rdkafka::message::Message as KafkaMessage;
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Upper bound on events returned by a single poll
const MAX_POLL_BATCH: usize = 500;

#[derive(Debug)]
enum RebalanceNote {
    Assigned(Vec<TopicPartition>),
    Revoked(Vec<TopicPartition>),
}

/// Consumer context that forwards rebalance callbacks into a shared queue
struct RebalanceContext {
    notes: Arc<Mutex<VecDeque<RebalanceNote>>>,
}

impl ClientContext for RebalanceContext {}

impl ConsumerContext for RebalanceContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            let partitions = to_partitions(tpl);
            info!("partitions revoked: {:?}", partitions);
            self.notes
                .lock()
                .expect("rebalance queue poisoned")
                .push_back(RebalanceNote::Revoked(partitions));
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let partitions = to_partitions(tpl);
                info!("partitions assigned: {:?}", partitions);
                self.notes
                    .lock()
                    .expect("rebalance queue poisoned")
                    .push_back(RebalanceNote::Assigned(partitions));
            }
            Rebalance::Error(e) => warn!("rebalance error: {}", e),
            Rebalance::Revoke(_) => {}
        }
    }
}

fn to_partitions(tpl: &TopicPartitionList) -> Vec<TopicPartition> {
    tpl.elements()
        .iter()
        .map(|e| TopicPartition::new(e.topic(), e.partition()))
        .collect()
}

/// [`LogClient`] backed by a Kafka consumer group member
pub struct KafkaLogClient {
    consumer: StreamConsumer<RebalanceContext>,
    notes: Arc<Mutex<VecDeque<RebalanceNote>>>,
}

impl KafkaLogClient {
    /// Build from the `consumer.kafka.*` options of the config
    ///
    /// `bootstrap.servers` and `group.id` must be present;
    /// `enable.auto.commit` has already been forced off by the config layer.
    pub fn from_config(config: &WorkstreamConfig) -> WorkstreamResult<Self> {
        let props = config.consumer_client_properties();
        for required in ["bootstrap.servers", "group.id"] {
            if !props.contains_key(required) {
                return Err(WorkstreamError::Configuration(format!(
                    "[consumer.kafka.{}] is required",
                    required
                )));
            }
        }

        let mut client_config = ClientConfig::new();
        for (key, value) in &props {
            client_config.set(key, value);
        }

        let notes = Arc::new(Mutex::new(VecDeque::new()));
        let context = RebalanceContext {
            notes: notes.clone(),
        };
        let consumer: StreamConsumer<RebalanceContext> = client_config
            .create_with_context(context)
            .map_err(|e| {
                WorkstreamError::Configuration(format!("consumer construction failed: {}", e))
            })?;

        Ok(Self { consumer, notes })
    }

    fn drain_notes(&self, events: &mut Vec<ClientEvent>) {
        let mut notes = self.notes.lock().expect("rebalance queue poisoned");
        for note in notes.drain(..) {
            events.push(match note {
                RebalanceNote::Assigned(tps) => ClientEvent::Assigned(tps),
                RebalanceNote::Revoked(tps) => ClientEvent::Revoked(tps),
            });
        }
    }

    fn partition_list(partitions: &[TopicPartition]) -> TopicPartitionList {
        let mut tpl = TopicPartitionList::new();
        for tp in partitions {
            tpl.add_partition(tp.topic(), tp.partition());
        }
        tpl
    }
}

#[async_trait]
impl LogClient for KafkaLogClient {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), ClientError> {
        let refs: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.consumer
            .subscribe(&refs)
            .map_err(|e| ClientError::Fatal(format!("subscribe failed: {}", e)))?;
        info!("subscribed to {:?}", topics);
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ClientEvent>, ClientError> {
        let mut events = Vec::new();
        self.drain_notes(&mut events);

        let deadline = tokio::time::Instant::now() + timeout;
        let mut stream = self.consumer.stream();
        while events.len() < MAX_POLL_BATCH {
            let message = match tokio::time::timeout_at(deadline, stream.next()).await {
                Err(_) | Ok(None) => break,
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(e))) => {
                    // Hand back what we already have; the error will resurface
                    // on the next poll if it persists
                    if events.is_empty() {
                        return Err(classify_poll_error(e));
                    }
                    break;
                }
            };

            // Keep assignment changes ordered ahead of the records that
            // followed them
            self.drain_notes(&mut events);

            let headers = match message.headers() {
                Some(h) => Headers::from_rdkafka_headers(h),
                None => Headers::new(),
            };
            events.push(ClientEvent::Record(LogRecord {
                topic_partition: TopicPartition::new(message.topic(), message.partition()),
                offset: message.offset(),
                key: message.key().map(|k| k.to_vec()),
                value: message.payload().map(|v| v.to_vec()),
                headers,
                timestamp: message.timestamp().to_millis(),
            }));
        }
        drop(stream);

        self.drain_notes(&mut events);
        Ok(events)
    }

    fn pause(&mut self, partitions: &[TopicPartition]) -> Result<(), ClientError> {
        debug!("pausing {:?}", partitions);
        self.consumer
            .pause(&Self::partition_list(partitions))
            .map_err(|e| ClientError::Fatal(format!("pause failed: {}", e)))
    }

    fn resume(&mut self, partitions: &[TopicPartition]) -> Result<(), ClientError> {
        debug!("resuming {:?}", partitions);
        self.consumer
            .resume(&Self::partition_list(partitions))
            .map_err(|e| ClientError::Fatal(format!("resume failed: {}", e)))
    }

    async fn commit(
        &mut self,
        offsets: &HashMap<TopicPartition, i64>,
    ) -> Result<(), CommitError> {
        let mut tpl = TopicPartitionList::new();
        for (tp, offset) in offsets {
            tpl.add_partition_offset(tp.topic(), tp.partition(), Offset::Offset(*offset))
                .map_err(|e| CommitError::Fatal(format!("invalid commit offset: {}", e)))?;
        }
        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(classify_commit_error)
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
        info!("kafka consumer closed");
    }
}

fn classify_poll_error(err: KafkaError) -> ClientError {
    if is_transient(&err) {
        ClientError::Retriable(err.to_string())
    } else {
        ClientError::Fatal(err.to_string())
    }
}

fn classify_commit_error(err: KafkaError) -> CommitError {
    if is_transient(&err) {
        CommitError::Retriable(err.to_string())
    } else {
        CommitError::Fatal(err.to_string())
    }
}

fn is_transient(err: &KafkaError) -> bool {
    matches!(
        err.rdkafka_error_code(),
        Some(
            RDKafkaErrorCode::BrokerTransportFailure
                | RDKafkaErrorCode::CoordinatorLoadInProgress
                | RDKafkaErrorCode::CoordinatorNotAvailable
                | RDKafkaErrorCode::NetworkException
                | RDKafkaErrorCode::NotCoordinator
                | RDKafkaErrorCode::OperationTimedOut
                | RDKafkaErrorCode::RebalanceInProgress
                | RDKafkaErrorCode::RequestTimedOut
        )
    )
}
