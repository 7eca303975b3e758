//! Several workers and the sweep racing over the same queue.

use std::collections::HashMap;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wait_notify::testing::{MemoryEngine, RecordingCallback};
use wait_notify::{CallbackSpec, ResponsePayload, WaitStatus, WaitStore, WorkerConfig};

const WAITS: usize = 25;
const WORKERS: usize = 4;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_fire_each_wait_once() {
    let recorder = RecordingCallback::new();
    let h = MemoryEngine::with_callback("recorder", recorder.clone());

    let mut wait_ids = Vec::with_capacity(WAITS);
    for i in 0..WAITS {
        let ids = [format!("w{i}-a"), format!("w{i}-b"), format!("w{i}-c")];
        let id = h
            .engine
            .wait_for_all(None, CallbackSpec::new("recorder"), ids)
            .await
            .unwrap();
        wait_ids.push(id);
    }

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();
    for n in 0..WORKERS {
        let worker = h.engine.worker(
            WorkerConfig::with_worker_id(format!("worker-{n}"))
                .batch_size(5)
                .poll_interval(Duration::from_millis(5)),
        );
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move { worker.run(token).await }));
    }

    // Producers: every id notified twice, from several tasks, in random order.
    let mut notifications: Vec<String> = (0..WAITS)
        .flat_map(|i| ["a", "b", "c"].map(|s| format!("w{i}-{s}")))
        .collect();
    notifications.extend(notifications.clone());
    fastrand::shuffle(&mut notifications);

    let mut producers = Vec::new();
    for chunk in notifications.chunks(10) {
        let engine = h.engine.clone();
        let chunk = chunk.to_vec();
        producers.push(tokio::spawn(async move {
            for cid in chunk {
                engine.notify(&cid, ResponsePayload::text(cid.clone())).await;
            }
        }));
    }

    let sweeper = h.engine.sweeper();
    let sweep_token = shutdown.clone();
    let sweep = tokio::spawn(async move {
        while !sweep_token.is_cancelled() {
            sweeper.run_once().await;
            tokio::time::sleep(Duration::from_millis(3)).await;
        }
    });

    for producer in producers {
        producer.await.unwrap();
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while recorder.calls().len() < WAITS && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // Give stragglers a chance to (wrongly) fire a second time.
    tokio::time::sleep(Duration::from_millis(100)).await;

    shutdown.cancel();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    sweep.await.unwrap();

    let mut per_wait: HashMap<String, usize> = HashMap::new();
    for call in recorder.calls() {
        assert_eq!(call.responses.len(), 3);
        let first = call.responses.keys().next().unwrap();
        let prefix = first.split('-').next().unwrap().to_string();
        *per_wait.entry(prefix).or_default() += 1;
    }
    assert_eq!(per_wait.len(), WAITS);
    assert!(per_wait.values().all(|count| *count == 1), "{per_wait:?}");

    for id in wait_ids {
        let instance = h.store.get_wait_instance(id).await.unwrap().unwrap();
        assert_eq!(instance.status, WaitStatus::Success);
    }
    assert_eq!(h.store.wait_queue_count().await, 0);
}
