//! Fatal consumer-side conditions: the processing-timeout watchdog and
//! exhausted commit retries.

mod common;

use common::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use workstream::{
    CommitError, RecordObserver, WorkerRecord, WorkerSubpartition, WorkerTask, Workstream,
    WorkstreamError,
};

/// Task that never completes its observers: records stay in flight forever.
struct StuckTask;

#[async_trait::async_trait]
impl WorkerTask for StuckTask {
    async fn process(
        &mut self,
        _record: Arc<WorkerRecord>,
        _observer: Arc<RecordObserver>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// A record older than the processing timeout converts into a fatal
/// shutdown, and no commit moves past the stuck offset.
#[tokio::test]
async fn test_watchdog_converts_stuck_record_into_fatal_shutdown() {
    let client = MockLogClient::new().script(vec![
        assigned(&[0]),
        record(0, 4, "A", 10),
        record(0, 5, "A", 10),
    ]);
    let log = client.log.clone();

    let config = fast_config().processing_timeout(Duration::from_millis(100));
    let instance = Workstream::builder(config)
        .client(Box::new(client))
        .task_factory(|_sub: &WorkerSubpartition| Box::new(StuckTask) as Box<dyn WorkerTask>)
        .build()
        .unwrap();
    instance.start().await.unwrap();

    let cause = instance.wait_for_shutdown().await.unwrap_err();
    match cause {
        WorkstreamError::ProcessingTimeout { partition, age, timeout } => {
            assert_eq!(partition, tp(0));
            assert!(age >= timeout);
        }
        other => panic!("expected ProcessingTimeout, got {:?}", other),
    }
    assert_eq!(log.last_commit(&tp(0)), None);
}

/// Retriable commit failures are tolerated up to the retry budget; the next
/// one shuts the instance down with the commit failure as cause.
#[tokio::test]
async fn test_commit_retry_exhaustion_is_fatal() {
    let client = MockLogClient::new()
        .script(vec![assigned(&[0]), record(0, 0, "A", 10)])
        .commit_results(vec![
            Err(CommitError::Retriable("coordinator moving".into())),
            Err(CommitError::Retriable("coordinator moving".into())),
            Err(CommitError::Retriable("coordinator moving".into())),
            Err(CommitError::Retriable("coordinator moving".into())),
        ]);
    let log = client.log.clone();
    let processed = Arc::new(Mutex::new(Vec::new()));
    let processed_for_factory = processed.clone();

    let config = fast_config().commit_retries(2);
    let instance = Workstream::builder(config)
        .client(Box::new(client))
        .task_factory(move |_sub: &WorkerSubpartition| {
            Box::new(SelectiveFailTask {
                fail_offsets: Vec::new(),
                processed: processed_for_factory.clone(),
            }) as Box<dyn WorkerTask>
        })
        .build()
        .unwrap();
    instance.start().await.unwrap();

    let cause = instance.wait_for_shutdown().await.unwrap_err();
    assert!(matches!(
        cause,
        WorkstreamError::CommitFailed { retries: 2, .. }
    ));

    // two tolerated failures plus the fatal third, and the best-effort final
    // commit during close may add one more attempt
    let attempts = log.commit_attempts.load(std::sync::atomic::Ordering::SeqCst);
    assert!(attempts >= 3, "only {} commit attempts", attempts);
    assert_eq!(log.commit_count(), 0);
}

/// A fatal commit classification bypasses the retry budget entirely.
#[tokio::test]
async fn test_fatal_commit_error_shuts_down_immediately() {
    let client = MockLogClient::new()
        .script(vec![assigned(&[0]), record(0, 0, "A", 10)])
        .commit_results(vec![Err(CommitError::Fatal("unknown member id".into()))]);
    let processed = Arc::new(Mutex::new(Vec::new()));
    let processed_for_factory = processed.clone();

    let config = fast_config().commit_retries(5);
    let instance = Workstream::builder(config)
        .client(Box::new(client))
        .task_factory(move |_sub: &WorkerSubpartition| {
            Box::new(SelectiveFailTask {
                fail_offsets: Vec::new(),
                processed: processed_for_factory.clone(),
            }) as Box<dyn WorkerTask>
        })
        .build()
        .unwrap();
    instance.start().await.unwrap();

    let cause = instance.wait_for_shutdown().await.unwrap_err();
    assert!(matches!(cause, WorkstreamError::Client(_)));
}
