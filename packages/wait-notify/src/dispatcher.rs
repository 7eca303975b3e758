//! Completion dispatcher: decides whether a wait is complete and, if so,
//! runs its callback exactly once.
//!
//! # Algorithm
//!
//! ```text
//! NotifyEvent
//!     │
//!     ├─► load instance ─── missing ──────────────► InstanceMissing
//!     │                └─── not NEW ──────────────► AlreadyFinalized
//!     ├─► load wait queue rows ─── none ──────────► NothingPending
//!     ├─► hint covers every row? ─── no ──────────► HintIncomplete
//!     ├─► response stored for every row? ─── no ──► ResponsesIncomplete
//!     ├─► acquire instance lock ─── timeout ──────► LockBusy
//!     │       ├─► re-check status ─── not NEW ────► AlreadyFinalized
//!     │       ├─► run callback (errors and panics captured)
//!     │       ├─► persist SUCCESS / ERROR
//!     │       └─► delete rows, mark responses consumed
//!     └─► release lock ───────────────────────────► Finalized(status)
//! ```
//!
//! A timeout event skips the hint and completeness checks: once the deadline
//! has passed it finalizes with whatever responses exist, possibly none.
//!
//! Nothing here returns `Err`. Every race (duplicate delivery, the sweep and
//! the eager path publishing for the same wait, a response that has not
//! landed yet) resolves to a no-op outcome and the next delivery or sweep
//! retries.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::FutureExt;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::callback::{CallbackRegistry, NotifyCallback};
use crate::config::EngineConfig;
use crate::lock::{LockScope, LockService};
use crate::model::{
    EventKind, NotifyEvent, NotifyResponse, ResponseMap, WaitInstance, WaitInstanceError,
    WaitQueue, WaitStatus,
};
use crate::store::WaitStore;

/// Result of handling one [`NotifyEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No wait instance with that id.
    InstanceMissing,
    /// The instance is already SUCCESS or ERROR.
    AlreadyFinalized,
    /// The instance has no outstanding wait queue rows.
    NothingPending,
    /// The event's hint does not cover every outstanding correlation id.
    HintIncomplete,
    /// Some correlation ids have not completed yet.
    ResponsesIncomplete { missing: Vec<String> },
    /// A timeout event arrived for an instance whose deadline has not passed.
    NotExpired,
    /// The instance lock could not be taken within the configured wait.
    LockBusy,
    /// The store could not be read; nothing was changed.
    StoreUnavailable,
    /// The callback ran and the instance moved to this terminal status.
    Finalized(WaitStatus),
}

impl DispatchOutcome {
    pub fn is_finalized(&self) -> bool {
        matches!(self, DispatchOutcome::Finalized(_))
    }
}

/// Which callback method a finalization runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Invocation {
    Notify,
    NotifyError,
    NotifyTimeout,
}

impl Invocation {
    fn as_str(&self) -> &'static str {
        match self {
            Invocation::Notify => "notify",
            Invocation::NotifyError => "notify_error",
            Invocation::NotifyTimeout => "notify_timeout",
        }
    }
}

pub struct CompletionDispatcher {
    store: Arc<dyn WaitStore>,
    locks: Arc<dyn LockService>,
    callbacks: Arc<CallbackRegistry>,
    config: EngineConfig,
}

impl CompletionDispatcher {
    pub fn new(
        store: Arc<dyn WaitStore>,
        locks: Arc<dyn LockService>,
        callbacks: Arc<CallbackRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            locks,
            callbacks,
            config,
        }
    }

    /// Handle one delivered event. Safe to call any number of times for the
    /// same event.
    #[instrument(skip(self, event), fields(wait_instance_id = %event.wait_instance_id, kind = event.kind.as_str()))]
    pub async fn handle(&self, event: &NotifyEvent) -> DispatchOutcome {
        let outcome = match event.kind {
            EventKind::Completion => self.handle_completion(event).await,
            EventKind::Timeout => self.handle_timeout(event.wait_instance_id).await,
        };
        debug!(outcome = ?outcome, "event handled");
        outcome
    }

    async fn handle_completion(&self, event: &NotifyEvent) -> DispatchOutcome {
        let id = event.wait_instance_id;

        let instance = match self.load_new_instance(id).await {
            Ok(instance) => instance,
            Err(outcome) => return outcome,
        };

        let rows = match self.store.wait_queues_for_instance(id).await {
            Ok(rows) if rows.is_empty() => return DispatchOutcome::NothingPending,
            Ok(rows) => rows,
            Err(e) => {
                warn!(wait_instance_id = %id, error = %e, "failed to load wait queues");
                return DispatchOutcome::StoreUnavailable;
            }
        };

        if !event.correlation_ids.is_empty() {
            let hint: HashSet<&str> = event.correlation_ids.iter().map(String::as_str).collect();
            if rows.iter().any(|r| !hint.contains(r.correlation_id.as_str())) {
                return DispatchOutcome::HintIncomplete;
            }
        }

        let responses = match self.load_responses(id, &rows).await {
            Ok(responses) => responses,
            Err(outcome) => return outcome,
        };

        if responses.len() < rows.len() {
            let present: HashSet<&str> =
                responses.iter().map(|r| r.correlation_id.as_str()).collect();
            let missing: Vec<String> = rows
                .iter()
                .filter(|r| !present.contains(r.correlation_id.as_str()))
                .map(|r| r.correlation_id.clone())
                .collect();
            debug!(wait_instance_id = %id, missing = ?missing, "wait not complete yet");
            return DispatchOutcome::ResponsesIncomplete { missing };
        }

        let is_error = responses.iter().any(|r| r.error);
        let invocation = if is_error {
            Invocation::NotifyError
        } else {
            Invocation::Notify
        };

        self.finalize(instance, rows, responses, invocation).await
    }

    async fn handle_timeout(&self, id: Uuid) -> DispatchOutcome {
        let instance = match self.load_new_instance(id).await {
            Ok(instance) => instance,
            Err(outcome) => return outcome,
        };

        if !instance.is_expired_at(Utc::now()) {
            return DispatchOutcome::NotExpired;
        }

        let rows = match self.store.wait_queues_for_instance(id).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(wait_instance_id = %id, error = %e, "failed to load wait queues");
                return DispatchOutcome::StoreUnavailable;
            }
        };
        // Still finalized, or every timeout sweep would select it again.
        if rows.is_empty() {
            warn!(wait_instance_id = %id, "expired wait has no outstanding rows");
        }

        let responses = match self.load_responses(id, &rows).await {
            Ok(responses) => responses,
            Err(outcome) => return outcome,
        };

        self.finalize(instance, rows, responses, Invocation::NotifyTimeout)
            .await
    }

    /// Load the instance, mapping every non-NEW case to its outcome.
    async fn load_new_instance(&self, id: Uuid) -> Result<WaitInstance, DispatchOutcome> {
        match self.store.get_wait_instance(id).await {
            Ok(Some(instance)) if instance.status == WaitStatus::New => Ok(instance),
            Ok(Some(_)) => Err(DispatchOutcome::AlreadyFinalized),
            Ok(None) => Err(DispatchOutcome::InstanceMissing),
            Err(e) => {
                warn!(wait_instance_id = %id, error = %e, "failed to load wait instance");
                Err(DispatchOutcome::StoreUnavailable)
            }
        }
    }

    async fn load_responses(
        &self,
        id: Uuid,
        rows: &[WaitQueue],
    ) -> Result<Vec<NotifyResponse>, DispatchOutcome> {
        let ids: Vec<String> = rows.iter().map(|r| r.correlation_id.clone()).collect();
        self.store.responses_for(&ids).await.map_err(|e| {
            warn!(wait_instance_id = %id, error = %e, "failed to load responses");
            DispatchOutcome::StoreUnavailable
        })
    }

    /// Steps that must run under the instance lock.
    async fn finalize(
        &self,
        instance: WaitInstance,
        rows: Vec<WaitQueue>,
        responses: Vec<NotifyResponse>,
        invocation: Invocation,
    ) -> DispatchOutcome {
        let id = instance.id;
        let key = id.to_string();

        let handle = match self
            .locks
            .acquire(LockScope::WaitInstance, &key, self.config.instance_lock_wait)
            .await
        {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                warn!(wait_instance_id = %id, "instance lock busy");
                return DispatchOutcome::LockBusy;
            }
            Err(e) => {
                warn!(wait_instance_id = %id, error = %e, "failed to acquire instance lock");
                return DispatchOutcome::LockBusy;
            }
        };

        let outcome = self
            .finalize_locked(instance, rows, responses, invocation)
            .await;

        if let Err(e) = self.locks.release(handle).await {
            warn!(wait_instance_id = %id, error = %e, "failed to release instance lock");
        }
        outcome
    }

    async fn finalize_locked(
        &self,
        instance: WaitInstance,
        rows: Vec<WaitQueue>,
        responses: Vec<NotifyResponse>,
        invocation: Invocation,
    ) -> DispatchOutcome {
        let id = instance.id;

        // Another consumer may have finalized while we waited for the lock.
        if let Err(outcome) = self.load_new_instance(id).await {
            return outcome;
        }

        let consumed: Vec<String> = responses.iter().map(|r| r.correlation_id.clone()).collect();
        let map: ResponseMap = responses
            .into_iter()
            .map(|r| (r.correlation_id, r.payload))
            .collect();

        let callback_ok = self.invoke(&instance, &map, invocation).await;
        let status = if callback_ok && invocation != Invocation::NotifyTimeout {
            WaitStatus::Success
        } else {
            WaitStatus::Error
        };

        if let Err(e) = self.store.update_wait_status(id, status).await {
            error!(wait_instance_id = %id, status = %status, error = %e, "failed to persist wait status");
        }

        for row in &rows {
            if let Err(e) = self.store.delete_wait_queue(row.id).await {
                warn!(wait_instance_id = %id, correlation_id = %row.correlation_id, error = %e, "failed to delete wait queue row");
            }
            if !consumed.contains(&row.correlation_id) {
                continue;
            }
            if let Err(e) = self.store.mark_response_consumed(&row.correlation_id).await {
                warn!(wait_instance_id = %id, correlation_id = %row.correlation_id, error = %e, "failed to mark response consumed");
            }
        }

        info!(
            wait_instance_id = %id,
            status = %status,
            callback = invocation.as_str(),
            "wait finalized"
        );
        DispatchOutcome::Finalized(status)
    }

    /// Resolve and run the callback. Returns true if it completed normally.
    /// Any failure is recorded as a [`WaitInstanceError`].
    async fn invoke(&self, instance: &WaitInstance, map: &ResponseMap, invocation: Invocation) -> bool {
        let callback = match self.callbacks.resolve(&instance.callback) {
            Ok(callback) => callback,
            Err(e) => {
                error!(
                    wait_instance_id = %instance.id,
                    callback_type = %instance.callback.callback_type,
                    error = %e,
                    "callback could not be resolved"
                );
                self.record_failure(instance.id, map, e.to_string(), format!("{:?}", e))
                    .await;
                return false;
            }
        };

        let result = std::panic::AssertUnwindSafe(call(callback.as_ref(), map, invocation))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(
                    wait_instance_id = %instance.id,
                    callback = invocation.as_str(),
                    error = %e,
                    "callback failed"
                );
                self.record_failure(instance.id, map, e.to_string(), format!("{:?}", e))
                    .await;
                false
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    wait_instance_id = %instance.id,
                    callback = invocation.as_str(),
                    panic = %message,
                    "callback panicked"
                );
                self.record_failure(
                    instance.id,
                    map,
                    format!("callback panicked: {}", message),
                    message,
                )
                .await;
                false
            }
        }
    }

    async fn record_failure(
        &self,
        wait_instance_id: Uuid,
        map: &ResponseMap,
        message: String,
        trace: String,
    ) {
        let record = WaitInstanceError::new(wait_instance_id, map.clone(), message, trace);
        if let Err(e) = self.store.insert_wait_instance_error(&record).await {
            warn!(wait_instance_id = %wait_instance_id, error = %e, "failed to record callback error");
        }
    }
}

async fn call(
    callback: &dyn NotifyCallback,
    map: &ResponseMap,
    invocation: Invocation,
) -> anyhow::Result<()> {
    match invocation {
        Invocation::Notify => callback.notify(map).await,
        Invocation::NotifyError => callback.notify_error(map).await,
        Invocation::NotifyTimeout => callback.notify_timeout(map).await,
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackSpec;
    use crate::lock::MemoryLockService;
    use crate::model::ResponsePayload;
    use crate::registry::WaitRegistry;
    use crate::store::MemoryWaitStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        notify: AtomicUsize,
        notify_error: AtomicUsize,
        notify_timeout: AtomicUsize,
    }

    #[async_trait]
    impl NotifyCallback for Counting {
        async fn notify(&self, _responses: &ResponseMap) -> anyhow::Result<()> {
            self.notify.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn notify_error(&self, _responses: &ResponseMap) -> anyhow::Result<()> {
            self.notify_error.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn notify_timeout(&self, _responses: &ResponseMap) -> anyhow::Result<()> {
            self.notify_timeout.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Panicking;

    #[async_trait]
    impl NotifyCallback for Panicking {
        async fn notify(&self, _responses: &ResponseMap) -> anyhow::Result<()> {
            panic!("kaboom");
        }

        async fn notify_error(&self, _responses: &ResponseMap) -> anyhow::Result<()> {
            Ok(())
        }
    }

    struct Fixture {
        store: Arc<MemoryWaitStore>,
        locks: Arc<MemoryLockService>,
        registry: WaitRegistry,
        dispatcher: CompletionDispatcher,
        counting: Arc<Counting>,
    }

    fn fixture_with(config: EngineConfig) -> Fixture {
        let store = Arc::new(MemoryWaitStore::new());
        let locks = Arc::new(MemoryLockService::default());
        let counting = Arc::new(Counting::default());

        let mut callbacks = CallbackRegistry::new();
        callbacks.register_instance("counting", counting.clone());
        callbacks.register_instance("panicking", Arc::new(Panicking));

        let dispatcher =
            CompletionDispatcher::new(store.clone(), locks.clone(), Arc::new(callbacks), config);
        Fixture {
            registry: WaitRegistry::new(store.clone()),
            store,
            locks,
            dispatcher,
            counting,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(EngineConfig::default())
    }

    async fn respond(store: &MemoryWaitStore, cid: &str, payload: ResponsePayload) {
        store
            .insert_response(&NotifyResponse::new(cid, payload))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_instance() {
        let f = fixture();
        let outcome = f
            .dispatcher
            .handle(&NotifyEvent::completion(Uuid::now_v7(), false))
            .await;
        assert_eq!(outcome, DispatchOutcome::InstanceMissing);
    }

    #[tokio::test]
    async fn test_incomplete_wait_is_left_alone() {
        let f = fixture();
        let id = f
            .registry
            .wait_for_all(None, CallbackSpec::new("counting"), ["a", "b"])
            .await
            .unwrap();
        respond(&f.store, "a", ResponsePayload::text("ok")).await;

        let outcome = f.dispatcher.handle(&NotifyEvent::completion(id, false)).await;
        assert_eq!(
            outcome,
            DispatchOutcome::ResponsesIncomplete {
                missing: vec!["b".to_string()]
            }
        );
        assert_eq!(f.counting.notify.load(Ordering::SeqCst), 0);
        assert_eq!(f.store.wait_queue_count().await, 2);
    }

    #[tokio::test]
    async fn test_partial_hint_is_incomplete_even_if_responses_exist() {
        let f = fixture();
        let id = f
            .registry
            .wait_for_all(None, CallbackSpec::new("counting"), ["a", "b"])
            .await
            .unwrap();
        respond(&f.store, "a", ResponsePayload::text("ok")).await;
        respond(&f.store, "b", ResponsePayload::text("ok")).await;

        let outcome = f
            .dispatcher
            .handle(&NotifyEvent::with_hint(id, vec!["a".into()]))
            .await;
        assert_eq!(outcome, DispatchOutcome::HintIncomplete);

        let outcome = f
            .dispatcher
            .handle(&NotifyEvent::with_hint(id, vec!["b".into(), "a".into()]))
            .await;
        assert_eq!(outcome, DispatchOutcome::Finalized(WaitStatus::Success));
    }

    #[tokio::test]
    async fn test_complete_wait_fires_once_and_cleans_up() {
        let f = fixture();
        let id = f
            .registry
            .wait_for_all(None, CallbackSpec::new("counting"), ["a", "b"])
            .await
            .unwrap();
        respond(&f.store, "a", ResponsePayload::text("ok")).await;
        respond(&f.store, "b", ResponsePayload::text("ok")).await;

        let event = NotifyEvent::completion(id, false);
        assert_eq!(
            f.dispatcher.handle(&event).await,
            DispatchOutcome::Finalized(WaitStatus::Success)
        );
        assert_eq!(
            f.dispatcher.handle(&event).await,
            DispatchOutcome::AlreadyFinalized
        );

        assert_eq!(f.counting.notify.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.wait_queue_count().await, 0);
        assert_eq!(
            f.store.get_response("a").await.unwrap().status,
            crate::model::ResponseStatus::Consumed
        );
        assert!(!f.locks.is_locked(LockScope::WaitInstance, &id.to_string()));
    }

    #[tokio::test]
    async fn test_error_response_routes_to_notify_error() {
        let f = fixture();
        let id = f
            .registry
            .wait_for_all(None, CallbackSpec::new("counting"), ["a", "b"])
            .await
            .unwrap();
        respond(&f.store, "a", ResponsePayload::text("ok")).await;
        respond(&f.store, "b", ResponsePayload::error("failed")).await;

        // The event's own error flag does not matter; the store decides.
        let outcome = f.dispatcher.handle(&NotifyEvent::completion(id, false)).await;
        assert_eq!(outcome, DispatchOutcome::Finalized(WaitStatus::Success));
        assert_eq!(f.counting.notify_error.load(Ordering::SeqCst), 1);
        assert_eq!(f.counting.notify.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_callback_becomes_error_record() {
        let f = fixture();
        let id = f
            .registry
            .wait_for_all(None, CallbackSpec::new("panicking"), ["a"])
            .await
            .unwrap();
        respond(&f.store, "a", ResponsePayload::text("ok")).await;

        let outcome = f.dispatcher.handle(&NotifyEvent::completion(id, false)).await;
        assert_eq!(outcome, DispatchOutcome::Finalized(WaitStatus::Error));

        let errors = f.store.wait_instance_errors().await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].error_message.contains("kaboom"));
        assert!(errors[0].responses.contains_key("a"));
        assert_eq!(f.store.wait_queue_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_callback_type_becomes_error_record() {
        let f = fixture();
        let id = f
            .registry
            .wait_for_all(None, CallbackSpec::new("nobody"), ["a"])
            .await
            .unwrap();
        respond(&f.store, "a", ResponsePayload::text("ok")).await;

        let outcome = f.dispatcher.handle(&NotifyEvent::completion(id, false)).await;
        assert_eq!(outcome, DispatchOutcome::Finalized(WaitStatus::Error));

        let errors = f.store.wait_instance_errors().await;
        assert!(errors[0].error_message.contains("unknown callback type"));
    }

    #[tokio::test]
    async fn test_lock_busy_leaves_wait_untouched() {
        let f = fixture_with(EngineConfig::default().with_instance_lock_wait(Duration::from_millis(20)));
        let id = f
            .registry
            .wait_for_all(None, CallbackSpec::new("counting"), ["a"])
            .await
            .unwrap();
        respond(&f.store, "a", ResponsePayload::text("ok")).await;
        let held = f
            .locks
            .try_lock(LockScope::WaitInstance, &id.to_string())
            .await
            .unwrap()
            .unwrap();

        let outcome = f.dispatcher.handle(&NotifyEvent::completion(id, false)).await;
        assert_eq!(outcome, DispatchOutcome::LockBusy);
        assert_eq!(f.counting.notify.load(Ordering::SeqCst), 0);

        f.locks.release(held).await.unwrap();
        let outcome = f.dispatcher.handle(&NotifyEvent::completion(id, false)).await;
        assert!(outcome.is_finalized());
    }

    #[tokio::test]
    async fn test_timeout_before_deadline_is_ignored() {
        let f = fixture();
        let id = f
            .registry
            .wait_for_all(
                Some(Duration::from_secs(3600)),
                CallbackSpec::new("counting"),
                ["a"],
            )
            .await
            .unwrap();

        let outcome = f.dispatcher.handle(&NotifyEvent::timeout(id)).await;
        assert_eq!(outcome, DispatchOutcome::NotExpired);
    }

    #[tokio::test]
    async fn test_timeout_finalizes_with_partial_responses() {
        let f = fixture();
        let mut instance = WaitInstance::new(
            vec!["a".into(), "b".into()],
            CallbackSpec::new("counting"),
            Some(Duration::from_secs(1)),
        );
        instance.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        let rows = vec![
            WaitQueue::new(instance.id, "a"),
            WaitQueue::new(instance.id, "b"),
        ];
        f.store.insert_wait_instance(&instance, &rows).await.unwrap();
        respond(&f.store, "a", ResponsePayload::text("ok")).await;

        let outcome = f.dispatcher.handle(&NotifyEvent::timeout(instance.id)).await;
        assert_eq!(outcome, DispatchOutcome::Finalized(WaitStatus::Error));
        assert_eq!(f.counting.notify_timeout.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.wait_queue_count().await, 0);
        // Timeout alone is not a callback failure
        assert!(f.store.wait_instance_errors().await.is_empty());

        // A late completion event is now a no-op
        respond(&f.store, "b", ResponsePayload::text("late")).await;
        let outcome = f
            .dispatcher
            .handle(&NotifyEvent::completion(instance.id, false))
            .await;
        assert_eq!(outcome, DispatchOutcome::AlreadyFinalized);
    }

    #[tokio::test]
    async fn test_expired_wait_without_rows_is_finalized_once() {
        let f = fixture();
        let mut instance = WaitInstance::new(
            vec!["a".into()],
            CallbackSpec::new("counting"),
            Some(Duration::from_secs(1)),
        );
        instance.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        f.store.insert_wait_instance(&instance, &[]).await.unwrap();

        let outcome = f.dispatcher.handle(&NotifyEvent::timeout(instance.id)).await;
        assert_eq!(outcome, DispatchOutcome::Finalized(WaitStatus::Error));
        assert_eq!(f.counting.notify_timeout.load(Ordering::SeqCst), 1);
        assert!(!f.locks.is_locked(LockScope::WaitInstance, &instance.id.to_string()));

        // No longer selected by the timeout sweep, and a redelivery is a no-op.
        assert!(f
            .store
            .expired_wait_instances(Utc::now(), 10)
            .await
            .unwrap()
            .is_empty());
        let outcome = f.dispatcher.handle(&NotifyEvent::timeout(instance.id)).await;
        assert_eq!(outcome, DispatchOutcome::AlreadyFinalized);
        assert_eq!(f.counting.notify_timeout.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_message_extracts_str_and_string() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
