//! Delivery of intermediate progress to waiting callbacks.
//!
//! ```text
//! update_progress(cid) ──► ProgressUpdate row
//!
//! ProgressUpdateService::run_once (periodic, cluster lock)
//!     ├─► oldest pending updates
//!     ├─► NEW waits on each update's correlation id
//!     │       └─► NotifyCallback::notify_progress (errors and panics logged)
//!     └─► delete delivered updates
//! ```
//!
//! Progress never changes a wait's status. An update whose waits could not
//! be looked up stays in the store for the next run; an update nobody waits
//! on is dropped.

use std::sync::Arc;

use futures::FutureExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::callback::CallbackRegistry;
use crate::config::{EngineConfig, PROGRESS_LOCK_KEY};
use crate::dispatcher::panic_message;
use crate::lock::{LockScope, LockService};
use crate::model::{ProgressUpdate, WaitStatus};
use crate::store::WaitStore;

/// What one progress run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressReport {
    /// Another node held the progress lock.
    pub skipped: bool,
    /// Updates removed from the store.
    pub delivered: usize,
    /// `notify_progress` calls that returned normally.
    pub callbacks_invoked: usize,
    /// `notify_progress` calls that failed, panicked or could not be resolved.
    pub callbacks_failed: usize,
}

pub struct ProgressUpdateService {
    store: Arc<dyn WaitStore>,
    locks: Arc<dyn LockService>,
    callbacks: Arc<CallbackRegistry>,
    config: EngineConfig,
}

impl ProgressUpdateService {
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

    /// Deliver pending progress updates if no other node is doing so.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> ProgressReport {
        let handle = match self
            .locks
            .acquire(LockScope::Sweeper, PROGRESS_LOCK_KEY, self.config.sweeper_lock_wait)
            .await
        {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                debug!("progress lock busy, skipping run");
                return ProgressReport {
                    skipped: true,
                    ..Default::default()
                };
            }
            Err(e) => {
                warn!(error = %e, "failed to acquire progress lock");
                return ProgressReport {
                    skipped: true,
                    ..Default::default()
                };
            }
        };

        let report = self.deliver().await;

        if let Err(e) = self.locks.release(handle).await {
            warn!(error = %e, "failed to release progress lock");
        }

        if report.delivered > 0 {
            info!(
                delivered = report.delivered,
                callbacks_invoked = report.callbacks_invoked,
                callbacks_failed = report.callbacks_failed,
                "progress updates delivered"
            );
        }
        report
    }

    async fn deliver(&self) -> ProgressReport {
        let mut report = ProgressReport::default();

        let updates = match self.store.progress_updates(self.config.progress_batch_size).await {
            Ok(updates) => updates,
            Err(e) => {
                warn!(error = %e, "failed to fetch progress updates");
                return report;
            }
        };

        let mut done: Vec<Uuid> = Vec::with_capacity(updates.len());
        for update in &updates {
            if self.deliver_one(update, &mut report).await {
                done.push(update.id);
            }
        }

        match self.store.delete_progress_updates(&done).await {
            Ok(deleted) => report.delivered = deleted as usize,
            Err(e) => warn!(error = %e, count = done.len(), "failed to delete progress updates"),
        }
        report
    }

    /// Returns false if the update should stay for a later run.
    async fn deliver_one(&self, update: &ProgressUpdate, report: &mut ProgressReport) -> bool {
        let cid = &update.correlation_id;
        let rows = match self
            .store
            .wait_queues_for_correlation_ids(std::slice::from_ref(cid))
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(correlation_id = %cid, error = %e, "failed to look up waiters for progress");
                return false;
            }
        };

        for row in rows {
            let instance = match self.store.get_wait_instance(row.wait_instance_id).await {
                Ok(Some(instance)) if instance.status == WaitStatus::New => instance,
                Ok(_) => continue,
                Err(e) => {
                    warn!(wait_instance_id = %row.wait_instance_id, error = %e, "failed to load wait instance");
                    return false;
                }
            };

            let callback = match self.callbacks.resolve(&instance.callback) {
                Ok(callback) => callback,
                Err(e) => {
                    warn!(wait_instance_id = %instance.id, error = %e, "progress callback could not be resolved");
                    report.callbacks_failed += 1;
                    continue;
                }
            };

            let result = std::panic::AssertUnwindSafe(callback.notify_progress(cid, &update.payload))
                .catch_unwind()
                .await;
            match result {
                Ok(Ok(())) => report.callbacks_invoked += 1,
                Ok(Err(e)) => {
                    warn!(wait_instance_id = %instance.id, correlation_id = %cid, error = %e, "progress callback failed");
                    report.callbacks_failed += 1;
                }
                Err(panic) => {
                    warn!(
                        wait_instance_id = %instance.id,
                        correlation_id = %cid,
                        panic = %panic_message(panic.as_ref()),
                        "progress callback panicked"
                    );
                    report.callbacks_failed += 1;
                }
            }
        }
        true
    }
}
