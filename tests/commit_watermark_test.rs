//! Commit watermark behavior with out-of-order completions across the
//! subpartitions of one partition.

mod common;

use common::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use workstream::{WorkerSubpartition, WorkerTask, Workstream};

fn held_task_factory(held: HeldObservers) -> impl Fn(&WorkerSubpartition) -> Box<dyn WorkerTask> {
    move |_sub| {
        Box::new(ManualTask { held: held.clone() }) as Box<dyn WorkerTask>
    }
}

/// Offsets 10(A), 11(B), 12(A), 13(B); completions arrive 11, 13, 10, 12.
/// The watermark must wait for the earliest in-flight offset: nothing is
/// committable until 10 lands, and 12 then opens the full prefix.
#[tokio::test]
async fn test_out_of_order_completions_never_skip_inflight_offsets() {
    let client = MockLogClient::new().script(vec![
        assigned(&[0]),
        record(0, 10, "A", 10),
        record(0, 11, "B", 10),
        record(0, 12, "A", 10),
        record(0, 13, "B", 10),
    ]);
    let log = client.log.clone();
    let held: HeldObservers = Arc::new(Mutex::new(HashMap::new()));

    let instance = Workstream::builder(fast_config())
        .client(Box::new(client))
        .partitioner(Arc::new(LetterPartitioner { count: 2 }))
        .task_factory(held_task_factory(held.clone()))
        .build()
        .unwrap();
    instance.start().await.unwrap();

    // all four records reach their tasks; two subpartitions run in parallel
    assert!(await_until(Duration::from_secs(5), || held.lock().unwrap().len() == 4).await);

    complete_record(&held, 0, 11).await;
    complete_record(&held, 0, 13).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    // 10 is still in flight: no commit may exist yet
    assert_eq!(log.commit_count(), 0);

    complete_record(&held, 0, 10).await;
    assert!(await_until(Duration::from_secs(5), || log.last_commit(&tp(0)) == Some(12)).await);

    complete_record(&held, 0, 12).await;
    assert!(await_until(Duration::from_secs(5), || log.last_commit(&tp(0)) == Some(14)).await);

    instance.shutdown(None).await.unwrap();
    assert_eq!(instance.cause(), None);

    // every commit that ever happened respected the watermark order
    let commits = log.commits.lock().unwrap();
    let offsets: Vec<i64> = commits.iter().filter_map(|c| c.get(&tp(0)).copied()).collect();
    assert!(offsets.windows(2).all(|w| w[0] <= w[1]));
}

/// Records of one subpartition are delivered to the task strictly in offset
/// order even with several workers competing.
#[tokio::test]
async fn test_subpartition_order_preserved_across_workers() {
    let mut client = MockLogClient::new().script(vec![assigned(&[0])]);
    let mut events = Vec::new();
    for offset in 0..50 {
        let key = if offset % 2 == 0 { "A" } else { "B" };
        events.push(record(0, offset, key, 5));
    }
    client = client.script(events);
    let log = client.log.clone();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_for_factory = seen.clone();
    let instance = Workstream::builder(fast_config().worker_threads(4))
        .client(Box::new(client))
        .partitioner(Arc::new(LetterPartitioner { count: 2 }))
        .task_factory(move |_sub: &WorkerSubpartition| {
            Box::new(ImmediateTask {
                seen: seen_for_factory.clone(),
            }) as Box<dyn WorkerTask>
        })
        .build()
        .unwrap();
    instance.start().await.unwrap();

    assert!(await_until(Duration::from_secs(5), || seen.lock().unwrap().len() == 50).await);
    assert!(await_until(Duration::from_secs(5), || log.last_commit(&tp(0)) == Some(50)).await);
    instance.shutdown(None).await.unwrap();

    // per subpartition, the observed offsets are strictly increasing
    let seen = seen.lock().unwrap();
    let mut last: HashMap<WorkerSubpartition, i64> = HashMap::new();
    for (sub, offset) in seen.iter() {
        if let Some(previous) = last.get(sub) {
            assert!(offset > previous, "{} replayed offset {}", sub, offset);
        }
        last.insert(sub.clone(), *offset);
    }
    assert_eq!(last.len(), 2);
}
