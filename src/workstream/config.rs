//! Configuration for a [`Workstream`](crate::Workstream) instance
//!
//! Configuration can be built programmatically through the builder methods or
//! parsed from a flat string map with [`WorkstreamConfig::from_properties`]
//! using the dotted keys below. Three prefixes pass options through verbatim:
//! `consumer.kafka.*` to the log client, `record.processing.fallback.producer.kafka.*`
//! to the fallback producer, and `worker.task.*` to user tasks.

use crate::workstream::error::{WorkstreamError, WorkstreamResult};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Topics read by the consumer
pub const CONSUMER_TOPICS: &str = "consumer.topics";
/// Blocking bound for one log client poll, in milliseconds
pub const CONSUMER_POLL_TIMEOUT_MS: &str = "consumer.poll.timeout.ms";
/// How often processed offsets are committed, in milliseconds
pub const CONSUMER_COMMIT_INTERVAL_MS: &str = "consumer.commit.interval.ms";
/// How long a consumed record may stay unprocessed before the instance fails
pub const CONSUMER_PROCESSING_TIMEOUT_MS: &str = "consumer.processing.timeout.ms";
/// Tolerated consecutive retriable commit failures
pub const CONSUMER_COMMIT_RETRIES: &str = "consumer.commit.retries";
/// Number of worker tasks processing records in parallel
pub const WORKER_THREADS_NUM: &str = "worker.threads.num";
/// Idle wait bound for a worker with no runnable subpartition, in milliseconds
pub const WORKER_SLEEP_MS: &str = "worker.sleep.ms";
/// Per-subpartition queue cap in bytes
pub const QUEUE_MAX_SIZE_BYTES: &str = "queue.max.size.bytes";
/// Global queue cap in bytes; unset means unlimited
pub const QUEUE_TOTAL_MAX_SIZE_BYTES: &str = "queue.total.max.size.bytes";
/// What to do when a record fails processing
pub const RECORD_PROCESSING_FAILURE_ACTION: &str = "record.processing.failure.action";
/// Target topic for `FallbackTopic` failure handling
pub const RECORD_PROCESSING_FALLBACK_TOPIC: &str = "record.processing.fallback.topic";
/// Grace period for joining activities during shutdown, in milliseconds
pub const SHUTDOWN_TIMEOUT_MS: &str = "shutdown.timeout.ms";

/// Prefix for options passed through to the log client
pub const CONSUMER_KAFKA_PREFIX: &str = "consumer.kafka.";
/// Prefix for options passed through to the fallback producer
pub const FALLBACK_PRODUCER_KAFKA_PREFIX: &str = "record.processing.fallback.producer.kafka.";
/// Prefix for options passed through to user tasks
pub const WORKER_TASK_PREFIX: &str = "worker.task.";

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_COMMIT_INTERVAL: Duration = Duration::from_secs(10);
const DEFAULT_PROCESSING_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_COMMIT_RETRIES: u32 = 3;
const DEFAULT_WORKER_THREADS: usize = 1;
const DEFAULT_WORKER_SLEEP: Duration = Duration::from_secs(1);
const DEFAULT_QUEUE_MAX_SIZE_BYTES: u64 = 256 * 1024 * 1024;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// What happens to a record whose task reported failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureAction {
    /// Shut the whole instance down with the failure as cause
    #[default]
    Shutdown,
    /// Re-produce the record to the fallback topic, then mark it processed
    FallbackTopic,
    /// Mark the record processed and move on
    Skip,
}

impl FailureAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureAction::Shutdown => "SHUTDOWN",
            FailureAction::FallbackTopic => "FALLBACK_TOPIC",
            FailureAction::Skip => "SKIP",
        }
    }

    pub fn parse(value: &str) -> WorkstreamResult<Self> {
        match value.to_ascii_uppercase().as_str() {
            "SHUTDOWN" => Ok(FailureAction::Shutdown),
            "FALLBACK_TOPIC" => Ok(FailureAction::FallbackTopic),
            "SKIP" => Ok(FailureAction::Skip),
            other => Err(WorkstreamError::Configuration(format!(
                "unknown {} value '{}', expected SHUTDOWN, FALLBACK_TOPIC or SKIP",
                RECORD_PROCESSING_FAILURE_ACTION, other
            ))),
        }
    }
}

impl fmt::Display for FailureAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration with sensible defaults for everything but the topic list
#[derive(Debug, Clone)]
pub struct WorkstreamConfig {
    pub topics: Vec<String>,
    pub poll_timeout: Duration,
    pub commit_interval: Duration,
    pub processing_timeout: Duration,
    pub commit_retries: u32,
    pub worker_threads: usize,
    pub worker_sleep: Duration,
    pub max_queue_bytes: u64,
    /// `None` means no global cap
    pub total_max_queue_bytes: Option<u64>,
    pub failure_action: FailureAction,
    pub fallback_topic: Option<String>,
    pub shutdown_timeout: Duration,
    consumer_kafka: HashMap<String, String>,
    fallback_producer_kafka: HashMap<String, String>,
    task_properties: HashMap<String, String>,
}

impl Default for WorkstreamConfig {
    fn default() -> Self {
        Self {
            topics: Vec::new(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            commit_interval: DEFAULT_COMMIT_INTERVAL,
            processing_timeout: DEFAULT_PROCESSING_TIMEOUT,
            commit_retries: DEFAULT_COMMIT_RETRIES,
            worker_threads: DEFAULT_WORKER_THREADS,
            worker_sleep: DEFAULT_WORKER_SLEEP,
            max_queue_bytes: DEFAULT_QUEUE_MAX_SIZE_BYTES,
            total_max_queue_bytes: None,
            failure_action: FailureAction::default(),
            fallback_topic: None,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            consumer_kafka: HashMap::new(),
            fallback_producer_kafka: HashMap::new(),
            task_properties: HashMap::new(),
        }
    }
}

impl WorkstreamConfig {
    /// Create a config subscribing to the given topics
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topics: topics.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn commit_interval(mut self, interval: Duration) -> Self {
        self.commit_interval = interval;
        self
    }

    pub fn processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    pub fn commit_retries(mut self, retries: u32) -> Self {
        self.commit_retries = retries;
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    pub fn worker_sleep(mut self, sleep: Duration) -> Self {
        self.worker_sleep = sleep;
        self
    }

    pub fn max_queue_bytes(mut self, bytes: u64) -> Self {
        self.max_queue_bytes = bytes;
        self
    }

    pub fn total_max_queue_bytes(mut self, bytes: u64) -> Self {
        self.total_max_queue_bytes = Some(bytes);
        self
    }

    pub fn failure_action(mut self, action: FailureAction) -> Self {
        self.failure_action = action;
        self
    }

    pub fn fallback_topic(mut self, topic: impl Into<String>) -> Self {
        self.fallback_topic = Some(topic.into());
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Add a passthrough option for the log client (`consumer.kafka.*`)
    pub fn consumer_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.consumer_kafka.insert(key.into(), value.into());
        self
    }

    /// Add a passthrough option for the fallback producer
    pub fn fallback_producer_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.fallback_producer_kafka.insert(key.into(), value.into());
        self
    }

    /// Add a passthrough option handed to user tasks at init
    pub fn task_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.task_properties.insert(key.into(), value.into());
        self
    }

    /// Log client options with the forced overrides applied
    ///
    /// `enable.auto.commit` is always `false`: the fabric owns commits and an
    /// auto-committing client would break the at-least-once contract.
    pub fn consumer_client_properties(&self) -> HashMap<String, String> {
        let mut props = self.consumer_kafka.clone();
        props.insert("enable.auto.commit".to_string(), "false".to_string());
        props
    }

    pub fn fallback_producer_properties(&self) -> &HashMap<String, String> {
        &self.fallback_producer_kafka
    }

    pub fn task_properties(&self) -> &HashMap<String, String> {
        &self.task_properties
    }

    /// Parse a flat string map using the dotted keys of this module
    ///
    /// Unknown keys outside the passthrough prefixes are rejected, which
    /// catches typos in deployment manifests early.
    pub fn from_properties(props: &HashMap<String, String>) -> WorkstreamResult<Self> {
        let mut config = Self::default();
        for (key, value) in props {
            match key.as_str() {
                CONSUMER_TOPICS => {
                    config.topics = value
                        .split(',')
                        .map(|t| t.trim().to_string())
                        .filter(|t| !t.is_empty())
                        .collect();
                }
                CONSUMER_POLL_TIMEOUT_MS => config.poll_timeout = parse_ms(key, value)?,
                CONSUMER_COMMIT_INTERVAL_MS => config.commit_interval = parse_ms(key, value)?,
                CONSUMER_PROCESSING_TIMEOUT_MS => {
                    config.processing_timeout = parse_ms(key, value)?
                }
                CONSUMER_COMMIT_RETRIES => config.commit_retries = parse_num(key, value)?,
                WORKER_THREADS_NUM => config.worker_threads = parse_num(key, value)?,
                WORKER_SLEEP_MS => config.worker_sleep = parse_ms(key, value)?,
                QUEUE_MAX_SIZE_BYTES => config.max_queue_bytes = parse_num(key, value)?,
                QUEUE_TOTAL_MAX_SIZE_BYTES => {
                    config.total_max_queue_bytes = Some(parse_num(key, value)?)
                }
                RECORD_PROCESSING_FAILURE_ACTION => {
                    config.failure_action = FailureAction::parse(value)?
                }
                RECORD_PROCESSING_FALLBACK_TOPIC => {
                    config.fallback_topic = Some(value.clone())
                }
                SHUTDOWN_TIMEOUT_MS => config.shutdown_timeout = parse_ms(key, value)?,
                _ => {
                    if let Some(stripped) = key.strip_prefix(FALLBACK_PRODUCER_KAFKA_PREFIX) {
                        config
                            .fallback_producer_kafka
                            .insert(stripped.to_string(), value.clone());
                    } else if let Some(stripped) = key.strip_prefix(CONSUMER_KAFKA_PREFIX) {
                        config
                            .consumer_kafka
                            .insert(stripped.to_string(), value.clone());
                    } else if let Some(stripped) = key.strip_prefix(WORKER_TASK_PREFIX) {
                        config
                            .task_properties
                            .insert(stripped.to_string(), value.clone());
                    } else {
                        return Err(WorkstreamError::Configuration(format!(
                            "unrecognized option '{}'",
                            key
                        )));
                    }
                }
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the rest of the fabric relies on
    pub fn validate(&self) -> WorkstreamResult<()> {
        if self.topics.is_empty() {
            return Err(WorkstreamError::Configuration(format!(
                "[{}] must list at least one topic",
                CONSUMER_TOPICS
            )));
        }
        if self.worker_threads == 0 {
            return Err(WorkstreamError::Configuration(format!(
                "[{}] must be at least 1",
                WORKER_THREADS_NUM
            )));
        }
        if self.max_queue_bytes == 0 {
            return Err(WorkstreamError::Configuration(format!(
                "[{}] must be positive",
                QUEUE_MAX_SIZE_BYTES
            )));
        }
        if let Some(value) = self.consumer_kafka.get("enable.auto.commit") {
            if value != "false" {
                return Err(WorkstreamError::Configuration(format!(
                    "[{}enable.auto.commit] is forced to false and cannot be overridden",
                    CONSUMER_KAFKA_PREFIX
                )));
            }
        }
        if self.failure_action == FailureAction::FallbackTopic {
            if self.fallback_topic.as_deref().unwrap_or("").is_empty() {
                return Err(WorkstreamError::Configuration(format!(
                    "[{}] is required when {} = {}",
                    RECORD_PROCESSING_FALLBACK_TOPIC,
                    RECORD_PROCESSING_FAILURE_ACTION,
                    FailureAction::FallbackTopic
                )));
            }
            if self.fallback_producer_kafka.is_empty() {
                return Err(WorkstreamError::Configuration(format!(
                    "[{}*] option(s) are required when {} = {}",
                    FALLBACK_PRODUCER_KAFKA_PREFIX,
                    RECORD_PROCESSING_FAILURE_ACTION,
                    FailureAction::FallbackTopic
                )));
            }
        }
        Ok(())
    }
}

fn parse_ms(key: &str, value: &str) -> WorkstreamResult<Duration> {
    let ms: u64 = value.parse().map_err(|_| {
        WorkstreamError::Configuration(format!("[{}] is not a millisecond count: '{}'", key, value))
    })?;
    Ok(Duration::from_millis(ms))
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> WorkstreamResult<T> {
    value.parse().map_err(|_| {
        WorkstreamError::Configuration(format!("[{}] is not a valid number: '{}'", key, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkstreamConfig::new(["events"]);
        assert_eq!(config.poll_timeout, Duration::from_secs(1));
        assert_eq!(config.commit_interval, Duration::from_secs(10));
        assert_eq!(config.processing_timeout, Duration::from_secs(300));
        assert_eq!(config.commit_retries, 3);
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.worker_sleep, Duration::from_secs(1));
        assert_eq!(config.max_queue_bytes, 256 * 1024 * 1024);
        assert_eq!(config.total_max_queue_bytes, None);
        assert_eq!(config.failure_action, FailureAction::Shutdown);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = WorkstreamConfig::new(["a", "b"])
            .worker_threads(8)
            .worker_sleep(Duration::from_millis(50))
            .commit_interval(Duration::from_secs(5))
            .max_queue_bytes(1024)
            .total_max_queue_bytes(8192)
            .failure_action(FailureAction::Skip)
            .consumer_property("bootstrap.servers", "localhost:9092")
            .task_property("mode", "fast");

        assert_eq!(config.topics, vec!["a", "b"]);
        assert_eq!(config.worker_threads, 8);
        assert_eq!(config.total_max_queue_bytes, Some(8192));
        assert_eq!(config.task_properties().get("mode").map(String::as_str), Some("fast"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_properties_round_trip() {
        let props: HashMap<String, String> = [
            ("consumer.topics", "events, audit"),
            ("consumer.poll.timeout.ms", "250"),
            ("consumer.commit.interval.ms", "2000"),
            ("consumer.commit.retries", "5"),
            ("worker.threads.num", "4"),
            ("worker.sleep.ms", "20"),
            ("queue.max.size.bytes", "1048576"),
            ("queue.total.max.size.bytes", "4194304"),
            ("record.processing.failure.action", "skip"),
            ("consumer.kafka.bootstrap.servers", "broker:9092"),
            ("consumer.kafka.group.id", "g1"),
            ("worker.task.batch.size", "100"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = WorkstreamConfig::from_properties(&props).unwrap();
        assert_eq!(config.topics, vec!["events", "audit"]);
        assert_eq!(config.poll_timeout, Duration::from_millis(250));
        assert_eq!(config.commit_retries, 5);
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.total_max_queue_bytes, Some(4_194_304));
        assert_eq!(config.failure_action, FailureAction::Skip);
        assert_eq!(
            config.consumer_client_properties().get("group.id").map(String::as_str),
            Some("g1")
        );
        assert_eq!(
            config.task_properties().get("batch.size").map(String::as_str),
            Some("100")
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let props: HashMap<String, String> = [
            ("consumer.topics", "events"),
            ("consumer.pol.timeout.ms", "250"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let err = WorkstreamConfig::from_properties(&props).unwrap_err();
        assert!(matches!(err, WorkstreamError::Configuration(_)));
    }

    #[test]
    fn test_topics_required() {
        let err = WorkstreamConfig::default().validate().unwrap_err();
        assert!(matches!(err, WorkstreamError::Configuration(_)));
    }

    #[test]
    fn test_auto_commit_override_rejected() {
        let config = WorkstreamConfig::new(["events"])
            .consumer_property("enable.auto.commit", "true");
        assert!(config.validate().is_err());

        // An explicit false matches the forced value and passes
        let config = WorkstreamConfig::new(["events"])
            .consumer_property("enable.auto.commit", "false");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auto_commit_always_forced_off() {
        let config = WorkstreamConfig::new(["events"])
            .consumer_property("bootstrap.servers", "broker:9092");
        let props = config.consumer_client_properties();
        assert_eq!(props.get("enable.auto.commit").map(String::as_str), Some("false"));
    }

    #[test]
    fn test_fallback_action_requires_topic_and_producer() {
        let missing_topic = WorkstreamConfig::new(["events"])
            .failure_action(FailureAction::FallbackTopic)
            .fallback_producer_property("bootstrap.servers", "broker:9092");
        assert!(missing_topic.validate().is_err());

        let missing_producer = WorkstreamConfig::new(["events"])
            .failure_action(FailureAction::FallbackTopic)
            .fallback_topic("dead");
        assert!(missing_producer.validate().is_err());

        let complete = WorkstreamConfig::new(["events"])
            .failure_action(FailureAction::FallbackTopic)
            .fallback_topic("dead")
            .fallback_producer_property("bootstrap.servers", "broker:9092");
        assert!(complete.validate().is_ok());
    }

    #[test]
    fn test_failure_action_parse() {
        assert_eq!(FailureAction::parse("SHUTDOWN").unwrap(), FailureAction::Shutdown);
        assert_eq!(
            FailureAction::parse("fallback_topic").unwrap(),
            FailureAction::FallbackTopic
        );
        assert_eq!(FailureAction::parse("Skip").unwrap(), FailureAction::Skip);
        assert!(FailureAction::parse("retry").is_err());
    }
}
