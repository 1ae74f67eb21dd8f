//! Shared harness for the scenario tests: a scripted in-memory log client,
//! controllable tasks, and a key-based partitioner.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use workstream::{
    ClientError, ClientEvent, CommitError, FailureSink, Headers, LogClient, LogRecord,
    Partitioner, RecordObserver, SinkError, TopicPartition, WorkerRecord, WorkerSubpartition,
    WorkerTask,
};

/// Everything the mock client observed, shared with the test body
#[derive(Default)]
pub struct ClientLog {
    pub commits: Mutex<Vec<HashMap<TopicPartition, i64>>>,
    pub paused: Mutex<Vec<TopicPartition>>,
    pub resumed: Mutex<Vec<TopicPartition>>,
    pub commit_attempts: AtomicUsize,
}

impl ClientLog {
    pub fn last_commit(&self, tp: &TopicPartition) -> Option<i64> {
        self.commits
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|c| c.get(tp).copied())
    }

    pub fn commit_count(&self) -> usize {
        self.commits.lock().unwrap().len()
    }
}

/// Scripted [`LogClient`]: events are served poll by poll, and more can be
/// appended while the instance runs
pub struct MockLogClient {
    polls: Arc<Mutex<VecDeque<Vec<ClientEvent>>>>,
    commit_results: Arc<Mutex<VecDeque<Result<(), CommitError>>>>,
    pub log: Arc<ClientLog>,
}

impl MockLogClient {
    pub fn new() -> Self {
        Self {
            polls: Arc::new(Mutex::new(VecDeque::new())),
            commit_results: Arc::new(Mutex::new(VecDeque::new())),
            log: Arc::new(ClientLog::default()),
        }
    }

    pub fn script(self, events: Vec<ClientEvent>) -> Self {
        self.polls.lock().unwrap().push_back(events);
        self
    }

    /// Queue every commit outcome up front; once exhausted commits succeed
    pub fn commit_results(self, results: Vec<Result<(), CommitError>>) -> Self {
        *self.commit_results.lock().unwrap() = results.into();
        self
    }

    /// Handle for appending events after the instance started
    pub fn feed(&self) -> Arc<Mutex<VecDeque<Vec<ClientEvent>>>> {
        self.polls.clone()
    }
}

#[async_trait]
impl LogClient for MockLogClient {
    async fn subscribe(&mut self, _topics: &[String]) -> Result<(), ClientError> {
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<ClientEvent>, ClientError> {
        let next = self.polls.lock().unwrap().pop_front();
        match next {
            Some(events) => Ok(events),
            None => {
                tokio::time::sleep(timeout.min(Duration::from_millis(5))).await;
                Ok(Vec::new())
            }
        }
    }

    fn pause(&mut self, partitions: &[TopicPartition]) -> Result<(), ClientError> {
        self.log.paused.lock().unwrap().extend_from_slice(partitions);
        Ok(())
    }

    fn resume(&mut self, partitions: &[TopicPartition]) -> Result<(), ClientError> {
        self.log
            .resumed
            .lock()
            .unwrap()
            .extend_from_slice(partitions);
        Ok(())
    }

    async fn commit(
        &mut self,
        offsets: &HashMap<TopicPartition, i64>,
    ) -> Result<(), CommitError> {
        self.log.commit_attempts.fetch_add(1, Ordering::SeqCst);
        let result = self
            .commit_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        if result.is_ok() {
            self.log.commits.lock().unwrap().push(offsets.clone());
        }
        result
    }

    async fn close(&mut self) {}
}

pub fn tp(partition: i32) -> TopicPartition {
    TopicPartition::new("events", partition)
}

pub fn assigned(partitions: &[i32]) -> ClientEvent {
    ClientEvent::Assigned(partitions.iter().map(|p| tp(*p)).collect())
}

pub fn revoked(partitions: &[i32]) -> ClientEvent {
    ClientEvent::Revoked(partitions.iter().map(|p| tp(*p)).collect())
}

pub fn record(partition: i32, offset: i64, key: &str, size: usize) -> ClientEvent {
    ClientEvent::Record(LogRecord {
        topic_partition: tp(partition),
        offset,
        key: Some(key.as_bytes().to_vec()),
        value: Some(vec![b'x'; size]),
        headers: Headers::new(),
        timestamp: None,
    })
}

/// Routes by the first key byte: "A" -> 0, "B" -> 1, ...
pub struct LetterPartitioner {
    pub count: usize,
}

impl Partitioner for LetterPartitioner {
    fn subpartition(&self, record: &LogRecord) -> usize {
        match record.key.as_deref().and_then(|k| k.first()) {
            Some(byte) => (byte.saturating_sub(b'A') as usize) % self.count,
            None => 0,
        }
    }

    fn count(&self, _partition: &TopicPartition) -> usize {
        self.count
    }
}

/// Observers captured by (partition, offset), for completing records from
/// the test body
pub type HeldObservers = Arc<Mutex<HashMap<(i32, i64), Arc<RecordObserver>>>>;

/// Task that parks every observer for manual completion
pub struct ManualTask {
    pub held: HeldObservers,
}

#[async_trait]
impl WorkerTask for ManualTask {
    async fn process(
        &mut self,
        record: Arc<WorkerRecord>,
        observer: Arc<RecordObserver>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let key = (record.topic_partition().partition(), record.offset());
        self.held.lock().unwrap().insert(key, observer);
        Ok(())
    }
}

/// Wait for a record to reach its task, then complete it successfully
pub async fn complete_record(held: &HeldObservers, partition: i32, offset: i64) {
    assert!(
        await_until(Duration::from_secs(5), || {
            held.lock().unwrap().contains_key(&(partition, offset))
        })
        .await,
        "record {}@{} never reached its task",
        partition,
        offset
    );
    let observer = held
        .lock()
        .unwrap()
        .get(&(partition, offset))
        .cloned()
        .unwrap();
    observer.on_success().await;
}

/// Task that succeeds immediately and records what it saw
pub struct ImmediateTask {
    pub seen: Arc<Mutex<Vec<(WorkerSubpartition, i64)>>>,
}

#[async_trait]
impl WorkerTask for ImmediateTask {
    async fn process(
        &mut self,
        record: Arc<WorkerRecord>,
        observer: Arc<RecordObserver>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.seen
            .lock()
            .unwrap()
            .push((record.subpartition().clone(), record.offset()));
        observer.on_success().await;
        Ok(())
    }
}

/// Task that blocks inside `process` until the test hands out a permit
///
/// While blocked, the record stays on its queue's byte budget, which makes
/// backpressure assertions deterministic.
pub struct GatedTask {
    pub gate: Arc<tokio::sync::Semaphore>,
}

#[async_trait]
impl WorkerTask for GatedTask {
    async fn process(
        &mut self,
        _record: Arc<WorkerRecord>,
        observer: Arc<RecordObserver>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let permit = self.gate.acquire().await?;
        permit.forget();
        observer.on_success().await;
        Ok(())
    }
}

/// Task that fails the given offsets and succeeds otherwise
pub struct SelectiveFailTask {
    pub fail_offsets: Vec<i64>,
    pub processed: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl WorkerTask for SelectiveFailTask {
    async fn process(
        &mut self,
        record: Arc<WorkerRecord>,
        observer: Arc<RecordObserver>,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.processed.lock().unwrap().push(record.offset());
        if self.fail_offsets.contains(&record.offset()) {
            return Err(format!("record at offset {} is poison", record.offset()).into());
        }
        observer.on_success().await;
        Ok(())
    }
}

/// Failure sink that records what it was asked to take over
#[derive(Default)]
pub struct RecordingSink {
    pub sent: Mutex<Vec<(i64, String)>>,
    pub reject: bool,
}

#[async_trait]
impl FailureSink for RecordingSink {
    async fn send(&self, record: &WorkerRecord, error_message: &str) -> Result<(), SinkError> {
        if self.reject {
            return Err(SinkError::Produce("sink rejects everything".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((record.offset(), error_message.to_string()));
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn await_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return condition();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Config tuned for fast test cycles
pub fn fast_config() -> workstream::WorkstreamConfig {
    workstream::WorkstreamConfig::new(["events"])
        .poll_timeout(Duration::from_millis(10))
        .commit_interval(Duration::from_millis(20))
        .worker_sleep(Duration::from_millis(10))
        .worker_threads(2)
        .shutdown_timeout(Duration::from_secs(2))
}
