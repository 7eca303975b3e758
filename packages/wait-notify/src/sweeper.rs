//! Periodic reconciliation and timeout sweeps.
//!
//! The reconciliation sweep is the correctness backstop for the eager path
//! in [`crate::CompletionPublisher::notify`]. It recovers from:
//! - a completion that arrived before its wait was registered
//! - an eager publish that failed or was lost
//!
//! It also garbage-collects responses nothing is waiting for. Both sweeps run
//! on every node; a cluster-wide lock makes each run single-winner.
//!
//! Responses are scanned in pages of `sweep_batch_size`, ordered by
//! `(created_at, correlation_id)`. Each run resumes after the last response
//! the previous run on this node saw, and wraps to the oldest once it reaches
//! the end. Old responses still held by long-running waits therefore cannot
//! hide newer ones from the sweep.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{EngineConfig, SWEEPER_LOCK_KEY, TIMEOUT_SWEEPER_LOCK_KEY};
use crate::lock::{LockHandle, LockScope, LockService};
use crate::model::{NotifyEvent, ResponseHead};
use crate::queue::NotifyQueue;
use crate::store::WaitStore;

/// What one reconciliation run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Another node held the sweep lock.
    pub skipped: bool,
    /// Responses examined.
    pub scanned: usize,
    pub events_published: usize,
    pub zombies_deleted: u64,
    /// Orphaned responses still inside the grace window.
    pub zombies_deferred: usize,
}

impl SweepReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

/// What one timeout run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeoutReport {
    pub skipped: bool,
    pub expired: usize,
    pub events_published: usize,
}

pub struct ReconciliationSweeper {
    store: Arc<dyn WaitStore>,
    queue: Arc<dyn NotifyQueue>,
    locks: Arc<dyn LockService>,
    config: EngineConfig,
    /// Last response examined by the previous run; `None` starts from the
    /// oldest.
    cursor: Mutex<Option<ResponseHead>>,
}

impl ReconciliationSweeper {
    pub fn new(
        store: Arc<dyn WaitStore>,
        queue: Arc<dyn NotifyQueue>,
        locks: Arc<dyn LockService>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            queue,
            locks,
            config,
            cursor: Mutex::new(None),
        }
    }

    /// Run one reconciliation pass if no other node is running one.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> SweepReport {
        let Some(handle) = self.try_sweep_lock(SWEEPER_LOCK_KEY).await else {
            return SweepReport::skipped();
        };

        let report = self.reconcile().await;
        self.release(handle).await;

        if report.events_published > 0 || report.zombies_deleted > 0 {
            info!(
                scanned = report.scanned,
                events_published = report.events_published,
                zombies_deleted = report.zombies_deleted,
                zombies_deferred = report.zombies_deferred,
                "reconciliation sweep finished"
            );
        }
        report
    }

    /// Publish a timeout event for every expired wait, if no other node is
    /// doing so.
    #[instrument(skip(self))]
    pub async fn expire_once(&self) -> TimeoutReport {
        let Some(handle) = self.try_sweep_lock(TIMEOUT_SWEEPER_LOCK_KEY).await else {
            return TimeoutReport {
                skipped: true,
                ..Default::default()
            };
        };

        let mut report = TimeoutReport::default();
        match self
            .store
            .expired_wait_instances(Utc::now(), self.config.timeout_batch_size)
            .await
        {
            Ok(expired) => {
                report.expired = expired.len();
                for instance in expired {
                    let event = NotifyEvent::timeout(instance.id).with_publisher(instance.publisher);
                    match self.queue.publish(event).await {
                        Ok(_) => report.events_published += 1,
                        Err(e) => {
                            warn!(wait_instance_id = %instance.id, error = %e, "failed to publish timeout event")
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to query expired waits"),
        }

        self.release(handle).await;

        if report.expired > 0 {
            info!(
                expired = report.expired,
                events_published = report.events_published,
                "timeout sweep finished"
            );
        }
        report
    }

    async fn reconcile(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let heads = match self.next_page().await {
            Ok(heads) => heads,
            Err(e) => {
                warn!(error = %e, "failed to fetch responses");
                return report;
            }
        };
        if heads.is_empty() {
            return report;
        }
        report.scanned = heads.len();

        let ids: Vec<String> = heads.iter().map(|h| h.correlation_id.clone()).collect();
        let mut unmatched: HashMap<String, chrono::DateTime<Utc>> = heads
            .into_iter()
            .map(|h| (h.correlation_id, h.created_at))
            .collect();

        let rows = match self.store.wait_queues_for_correlation_ids(&ids).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "failed to fetch wait queues");
                return report;
            }
        };

        let mut matched: BTreeMap<Uuid, (String, Vec<String>)> = BTreeMap::new();
        for row in rows {
            unmatched.remove(&row.correlation_id);
            matched
                .entry(row.wait_instance_id)
                .or_insert_with(|| (row.publisher, Vec::new()))
                .1
                .push(row.correlation_id);
        }

        for (wait_instance_id, (publisher, correlation_ids)) in matched {
            let event =
                NotifyEvent::with_hint(wait_instance_id, correlation_ids).with_publisher(publisher);
            match self.queue.publish(event).await {
                Ok(_) => report.events_published += 1,
                Err(e) => {
                    warn!(wait_instance_id = %wait_instance_id, error = %e, "failed to publish sweep event")
                }
            }
        }

        let grace = chrono::Duration::from_std(self.config.zombie_grace)
            .unwrap_or(chrono::Duration::minutes(5));
        let cutoff = Utc::now() - grace;
        let (expired, fresh): (Vec<_>, Vec<_>) = unmatched
            .into_iter()
            .partition(|(_, created_at)| *created_at < cutoff);
        report.zombies_deferred = fresh.len();

        if !expired.is_empty() {
            let zombies: Vec<String> = expired.into_iter().map(|(cid, _)| cid).collect();
            match self.store.delete_responses(&zombies).await {
                Ok(deleted) => {
                    debug!(deleted, "deleted zombie responses");
                    report.zombies_deleted = deleted;
                }
                Err(e) => warn!(error = %e, count = zombies.len(), "failed to delete zombie responses"),
            }
        }

        report
    }

    /// Fetch the page after the cursor and advance it. A short page means
    /// the end was reached, so the next run starts from the oldest again.
    async fn next_page(&self) -> crate::StoreResult<Vec<ResponseHead>> {
        let limit = self.config.sweep_batch_size;
        let mut cursor = self.cursor.lock().await;

        let mut heads = self.store.response_heads(cursor.as_ref(), limit).await?;
        if heads.is_empty() && cursor.is_some() {
            *cursor = None;
            heads = self.store.response_heads(None, limit).await?;
        }

        *cursor = if heads.len() >= limit {
            heads.last().cloned()
        } else {
            None
        };
        Ok(heads)
    }

    async fn try_sweep_lock(&self, key: &str) -> Option<LockHandle> {
        match self
            .locks
            .acquire(LockScope::Sweeper, key, self.config.sweeper_lock_wait)
            .await
        {
            Ok(Some(handle)) => Some(handle),
            Ok(None) => {
                debug!(lock = key, "sweep lock busy, skipping run");
                None
            }
            Err(e) => {
                warn!(lock = key, error = %e, "failed to acquire sweep lock");
                None
            }
        }
    }

    async fn release(&self, handle: LockHandle) {
        let name = handle.name();
        if let Err(e) = self.locks.release(handle).await {
            warn!(lock = %name, error = %e, "failed to release sweep lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackSpec;
    use crate::lock::MemoryLockService;
    use crate::model::{EventKind, NotifyResponse, ResponsePayload, WaitInstance};
    use crate::queue::MemoryNotifyQueue;
    use crate::registry::WaitRegistry;
    use crate::store::MemoryWaitStore;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryWaitStore>,
        queue: Arc<MemoryNotifyQueue>,
        locks: Arc<MemoryLockService>,
        sweeper: ReconciliationSweeper,
    }

    fn fixture() -> Fixture {
        fixture_with(EngineConfig::default())
    }

    fn fixture_with(config: EngineConfig) -> Fixture {
        let store = Arc::new(MemoryWaitStore::new());
        let queue = Arc::new(MemoryNotifyQueue::recording());
        let locks = Arc::new(MemoryLockService::default());
        let sweeper = ReconciliationSweeper::new(store.clone(), queue.clone(), locks.clone(), config);
        Fixture {
            store,
            queue,
            locks,
            sweeper,
        }
    }

    async fn store_response(store: &MemoryWaitStore, cid: &str) {
        store
            .insert_response(&NotifyResponse::new(cid, ResponsePayload::text(cid)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_store_is_idle() {
        let f = fixture();
        assert_eq!(f.sweeper.run_once().await, SweepReport::default());
        assert!(f.queue.published().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_publishes_one_hinted_event_per_instance() {
        let f = fixture();
        let registry = WaitRegistry::new(f.store.clone());
        let id = registry
            .wait_for_all(None, CallbackSpec::new("noop"), ["a", "b", "c"])
            .await
            .unwrap();
        store_response(&f.store, "a").await;
        store_response(&f.store, "b").await;

        let report = f.sweeper.run_once().await;
        assert_eq!(report.scanned, 2);
        assert_eq!(report.events_published, 1);

        let events = f.queue.published();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].wait_instance_id, id);
        let mut hint = events[0].correlation_ids.clone();
        hint.sort();
        assert_eq!(hint, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_fresh_zombies_are_kept_and_old_ones_deleted() {
        let f = fixture();
        store_response(&f.store, "fresh").await;
        store_response(&f.store, "old").await;
        f.store
            .backdate_response("old", Utc::now() - chrono::Duration::minutes(6))
            .await;

        let report = f.sweeper.run_once().await;
        assert_eq!(report.zombies_deleted, 1);
        assert_eq!(report.zombies_deferred, 1);
        assert!(f.store.get_response("fresh").await.is_some());
        assert!(f.store.get_response("old").await.is_none());

        // Running again removes nothing more
        let again = f.sweeper.run_once().await;
        assert_eq!(again.zombies_deleted, 0);
        assert!(f.store.get_response("fresh").await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_skips_when_lock_is_held() {
        let f = fixture();
        store_response(&f.store, "old").await;
        f.store
            .backdate_response("old", Utc::now() - chrono::Duration::hours(1))
            .await;
        let _held = f
            .locks
            .try_lock(LockScope::Sweeper, SWEEPER_LOCK_KEY)
            .await
            .unwrap()
            .unwrap();

        let report = f.sweeper.run_once().await;
        assert!(report.skipped);
        assert_eq!(f.store.response_count().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_releases_its_lock() {
        let f = fixture();
        f.sweeper.run_once().await;
        assert!(!f.locks.is_locked(LockScope::Sweeper, SWEEPER_LOCK_KEY));
    }

    #[tokio::test]
    async fn test_expire_once_publishes_timeout_events_for_expired_waits() {
        let f = fixture();
        let mut expired = WaitInstance::new(
            vec!["a".into()],
            CallbackSpec::new("noop"),
            Some(Duration::from_secs(1)),
        );
        expired.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        f.store.insert_wait_instance(&expired, &[]).await.unwrap();

        let live = WaitInstance::new(
            vec!["b".into()],
            CallbackSpec::new("noop"),
            Some(Duration::from_secs(3600)),
        );
        f.store.insert_wait_instance(&live, &[]).await.unwrap();

        let report = f.sweeper.expire_once().await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.events_published, 1);

        let events = f.queue.published();
        assert_eq!(events[0].wait_instance_id, expired.id);
        assert_eq!(events[0].kind, EventKind::Timeout);
    }

    #[tokio::test]
    async fn test_expired_wait_timeout_event_keeps_its_publisher() {
        let f = fixture();
        let mut expired = WaitInstance::new(
            vec!["a".into()],
            CallbackSpec::new("noop"),
            Some(Duration::from_secs(1)),
        )
        .with_publisher("orchestration");
        expired.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        f.store.insert_wait_instance(&expired, &[]).await.unwrap();

        f.sweeper.expire_once().await;

        let events = f.queue.published();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].publisher, "orchestration");
    }

    #[tokio::test]
    async fn test_hinted_event_is_published_on_the_waits_topic() {
        let f = fixture();
        let registry = WaitRegistry::with_publishers(f.store.clone(), ["orchestration"]);
        registry
            .wait_for_all_on("orchestration", None, CallbackSpec::new("noop"), ["a"])
            .await
            .unwrap();
        store_response(&f.store, "a").await;

        f.sweeper.run_once().await;

        let events = f.queue.published();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].publisher, "orchestration");
    }

    #[tokio::test]
    async fn test_responses_held_by_slow_waits_do_not_starve_newer_ones() {
        let f = fixture_with(EngineConfig::default().with_sweep_batch_size(3));
        let registry = WaitRegistry::new(f.store.clone());
        let an_hour_ago = Utc::now() - chrono::Duration::hours(1);

        // Three waits that each hold an old response while still waiting on
        // a slow id. Their responses fill a whole page on their own.
        for n in 1..=3 {
            let old = format!("old{}", n);
            let slow = format!("slow{}", n);
            registry
                .wait_for_all(None, CallbackSpec::new("noop"), [old.clone(), slow])
                .await
                .unwrap();
            store_response(&f.store, &old).await;
            f.store
                .backdate_response(&old, an_hour_ago + chrono::Duration::seconds(n))
                .await;
        }

        // Completion lands before its wait exists, so no eager event.
        store_response(&f.store, "late").await;
        let recoverable = registry
            .wait_for_all(None, CallbackSpec::new("noop"), ["late"])
            .await
            .unwrap();

        for _ in 0..5 {
            f.sweeper.run_once().await;
        }

        let recovered = f
            .queue
            .published()
            .into_iter()
            .filter(|e| e.wait_instance_id == recoverable)
            .count();
        assert!(recovered >= 1, "late response was never swept");
    }

    #[tokio::test]
    async fn test_orphan_behind_held_responses_is_eventually_deleted() {
        let f = fixture_with(EngineConfig::default().with_sweep_batch_size(2));
        let registry = WaitRegistry::new(f.store.clone());
        let two_hours_ago = Utc::now() - chrono::Duration::hours(2);

        for (n, held) in ["held1", "held2"].into_iter().enumerate() {
            registry
                .wait_for_all(None, CallbackSpec::new("noop"), [held, "never"])
                .await
                .unwrap();
            store_response(&f.store, held).await;
            f.store
                .backdate_response(held, two_hours_ago + chrono::Duration::seconds(n as i64))
                .await;
        }
        store_response(&f.store, "orphan").await;
        f.store
            .backdate_response("orphan", Utc::now() - chrono::Duration::hours(1))
            .await;

        let first = f.sweeper.run_once().await;
        assert_eq!(first.scanned, 2);
        assert_eq!(first.zombies_deleted, 0);

        let second = f.sweeper.run_once().await;
        assert_eq!(second.zombies_deleted, 1);
        assert!(f.store.get_response("orphan").await.is_none());

        // After the end of the table the scan wraps to the oldest again.
        let third = f.sweeper.run_once().await;
        assert_eq!(third.scanned, 2);
        assert!(f.store.get_response("held1").await.is_some());
    }
}
