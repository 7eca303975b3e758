//! Dispatch worker: the queue consumer loop.
//!
//! ```text
//! DispatchWorker
//!     │
//!     ├─► claim a batch from its topic (NotifyQueue::claim)
//!     ├─► dispatch each event concurrently (CompletionDispatcher::handle)
//!     └─► ack every message, whatever the outcome
//! ```
//!
//! Acking unconditionally is safe: every no-op outcome is retried by a later
//! delivery or by the reconciliation sweep, and a crashed worker's messages
//! come back when their lease expires.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::dispatcher::{CompletionDispatcher, DispatchOutcome};
use crate::model::DEFAULT_PUBLISHER;
use crate::queue::{ClaimedEvent, NotifyQueue};

/// Configuration for the dispatch worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum number of events to claim at once
    pub batch_size: usize,
    /// How long to wait when no events are available
    pub poll_interval: Duration,
    /// Worker ID for this instance
    pub worker_id: String,
    /// Publisher topic this worker consumes
    pub topic: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(1),
            worker_id: format!("worker-{}", Uuid::new_v4()),
            topic: DEFAULT_PUBLISHER.to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }
}

/// Pulls notify events and hands them to the dispatcher.
pub struct DispatchWorker {
    queue: Arc<dyn NotifyQueue>,
    dispatcher: Arc<CompletionDispatcher>,
    config: WorkerConfig,
}

impl DispatchWorker {
    pub fn new(
        queue: Arc<dyn NotifyQueue>,
        dispatcher: Arc<CompletionDispatcher>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Claim and process one batch. Returns the number of events handled.
    pub async fn run_once(&self) -> Result<usize> {
        let events = self
            .queue
            .claim(&self.config.topic, &self.config.worker_id, self.config.batch_size)
            .await?;

        if events.is_empty() {
            return Ok(0);
        }

        debug!(count = events.len(), worker_id = %self.config.worker_id, "claimed events");
        let count = events.len();
        futures::future::join_all(events.into_iter().map(|event| self.process(event))).await;
        Ok(count)
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            topic = %self.config.topic,
            batch_size = self.config.batch_size,
            "dispatch worker starting"
        );

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.run_once().await {
                Ok(0) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "failed to claim events");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        info!(worker_id = %self.config.worker_id, "dispatch worker stopped");
        Ok(())
    }

    async fn process(&self, claimed: ClaimedEvent) -> DispatchOutcome {
        let outcome = self.dispatcher.handle(&claimed.event).await;

        if claimed.attempt > 1 {
            debug!(
                message_id = %claimed.message_id,
                attempt = claimed.attempt,
                outcome = ?outcome,
                "redelivered event handled"
            );
        }

        if let Err(e) = self.queue.ack(claimed.message_id).await {
            warn!(message_id = %claimed.message_id, error = %e, "failed to ack event");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::{CallbackRegistry, CallbackSpec};
    use crate::config::EngineConfig;
    use crate::lock::MemoryLockService;
    use crate::model::{NotifyEvent, NotifyResponse, ResponsePayload, WaitStatus};
    use crate::queue::MemoryNotifyQueue;
    use crate::registry::WaitRegistry;
    use crate::store::{MemoryWaitStore, WaitStore};
    use crate::testing::{CallKind, RecordingCallback};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        store: Arc<MemoryWaitStore>,
        queue: Arc<MemoryNotifyQueue>,
        registry: WaitRegistry,
        recorder: RecordingCallback,
        dispatcher: Arc<CompletionDispatcher>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryWaitStore::new());
        let queue = Arc::new(MemoryNotifyQueue::new());
        let recorder = RecordingCallback::new();
        let mut callbacks = CallbackRegistry::new();
        callbacks.register_instance("recorder", Arc::new(recorder.clone()));

        let dispatcher = Arc::new(CompletionDispatcher::new(
            store.clone(),
            Arc::new(MemoryLockService::default()),
            Arc::new(callbacks),
            EngineConfig::default(),
        ));
        Fixture {
            registry: WaitRegistry::with_publishers(store.clone(), ["orchestration"]),
            store,
            queue,
            recorder,
            dispatcher,
        }
    }

    fn worker(f: &Fixture, config: WorkerConfig) -> DispatchWorker {
        DispatchWorker::new(f.queue.clone(), f.dispatcher.clone(), config)
    }

    /// Queue whose every claim fails, counting the attempts.
    #[derive(Default)]
    struct BrokenQueue {
        claims: AtomicUsize,
    }

    #[async_trait]
    impl NotifyQueue for BrokenQueue {
        async fn publish(&self, _event: NotifyEvent) -> Result<Uuid> {
            Ok(Uuid::now_v7())
        }

        async fn claim(
            &self,
            _topic: &str,
            _worker_id: &str,
            _limit: usize,
        ) -> Result<Vec<ClaimedEvent>> {
            self.claims.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("queue unavailable"))
        }

        async fn ack(&self, _message_id: Uuid) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_config_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.worker_id.starts_with("worker-"));
        assert_eq!(config.topic, DEFAULT_PUBLISHER);
    }

    #[test]
    fn test_config_with_worker_id() {
        let config = WorkerConfig::with_worker_id("my-worker")
            .batch_size(3)
            .topic("orchestration");
        assert_eq!(config.worker_id, "my-worker");
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.topic, "orchestration");
    }

    #[tokio::test]
    async fn test_incomplete_wait_event_is_acked_not_redelivered() {
        let f = fixture();
        let id = f
            .registry
            .wait_for_all(None, CallbackSpec::new("recorder"), ["a", "b"])
            .await
            .unwrap();
        f.queue.publish(NotifyEvent::completion(id, false)).await.unwrap();

        let w = worker(&f, WorkerConfig::with_worker_id("w1"));
        assert_eq!(w.run_once().await.unwrap(), 1);

        assert_eq!(f.queue.in_flight_len(), 0);
        assert_eq!(f.queue.pending_len(), 0);
        assert_eq!(w.run_once().await.unwrap(), 0);
        assert!(f.recorder.calls().is_empty());

        let instance = f.store.get_wait_instance(id).await.unwrap().unwrap();
        assert_eq!(instance.status, WaitStatus::New);
    }

    #[tokio::test]
    async fn test_duplicate_events_for_complete_wait_fire_once() {
        let f = fixture();
        let id = f
            .registry
            .wait_for_all(None, CallbackSpec::new("recorder"), ["a"])
            .await
            .unwrap();
        f.store
            .insert_response(&NotifyResponse::new("a", ResponsePayload::text("ok")))
            .await
            .unwrap();
        f.queue.publish(NotifyEvent::completion(id, false)).await.unwrap();
        f.queue.publish(NotifyEvent::completion(id, false)).await.unwrap();

        let w = worker(&f, WorkerConfig::with_worker_id("w1"));
        assert_eq!(w.run_once().await.unwrap(), 2);

        assert_eq!(f.recorder.count(CallKind::Notify), 1);
        assert!(f.queue.is_idle());
    }

    #[tokio::test]
    async fn test_worker_only_claims_its_topic() {
        let f = fixture();
        let id = f
            .registry
            .wait_for_all_on("orchestration", None, CallbackSpec::new("recorder"), ["a"])
            .await
            .unwrap();
        f.queue
            .publish(NotifyEvent::completion(id, false).with_publisher("orchestration"))
            .await
            .unwrap();

        let general = worker(&f, WorkerConfig::with_worker_id("general"));
        assert_eq!(general.run_once().await.unwrap(), 0);
        assert_eq!(f.queue.pending_len(), 1);

        let routed = worker(&f, WorkerConfig::with_worker_id("routed").topic("orchestration"));
        assert_eq!(routed.run_once().await.unwrap(), 1);
        assert!(f.queue.is_idle());
    }

    #[tokio::test]
    async fn test_claim_error_surfaces_from_run_once() {
        let f = fixture();
        let queue = Arc::new(BrokenQueue::default());
        let w = DispatchWorker::new(queue.clone(), f.dispatcher.clone(), WorkerConfig::default());

        assert!(w.run_once().await.is_err());
        assert_eq!(queue.claims.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_backs_off_after_claim_errors() {
        let f = fixture();
        let queue = Arc::new(BrokenQueue::default());
        let w = Arc::new(DispatchWorker::new(
            queue.clone(),
            f.dispatcher.clone(),
            WorkerConfig::default().poll_interval(Duration::from_millis(10)),
        ));

        let shutdown = CancellationToken::new();
        let handle = {
            let w = w.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { w.run(shutdown).await })
        };

        // Claims retry once a second, not at the 10ms poll interval.
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        let attempts = queue.claims.load(Ordering::SeqCst);
        assert!((1..=2).contains(&attempts), "claimed {} times", attempts);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
