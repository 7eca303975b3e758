//! Completion signaling.
//!
//! `notify()` is the eager path: store the response, then tell every waiting
//! instance about it. If anything after the insert fails, the reconciliation
//! sweep finds the stored response later and republishes.

use std::sync::Arc;

use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::StoreError;
use crate::model::{NotifyEvent, NotifyResponse, ProgressUpdate, ResponsePayload};
use crate::queue::NotifyQueue;
use crate::rate_limit::{DuplicateAlarm, DuplicateSeverity};
use crate::store::WaitStore;

/// Records completions and fans them out to waiting instances.
pub struct CompletionPublisher {
    store: Arc<dyn WaitStore>,
    queue: Arc<dyn NotifyQueue>,
    duplicates: DuplicateAlarm,
}

impl CompletionPublisher {
    pub fn new(store: Arc<dyn WaitStore>, queue: Arc<dyn NotifyQueue>, config: &EngineConfig) -> Self {
        Self {
            store,
            queue,
            duplicates: DuplicateAlarm::per_hour(config.duplicate_alarms_per_hour),
        }
    }

    /// Signal that the work behind `correlation_id` finished.
    ///
    /// Returns the notification id, or `None` if the id was already notified
    /// or the response could not be stored. Never fails.
    #[instrument(skip(self, payload), fields(correlation_id = %correlation_id))]
    pub async fn notify(&self, correlation_id: &str, payload: ResponsePayload) -> Option<Uuid> {
        let response = NotifyResponse::new(correlation_id, payload);
        let error = response.error;

        match self.store.insert_response(&response).await {
            Ok(()) => {}
            Err(StoreError::DuplicateKey { .. }) => {
                match self.duplicates.record() {
                    DuplicateSeverity::Routine => {
                        warn!(correlation_id = %correlation_id, "duplicate notify ignored");
                    }
                    DuplicateSeverity::Alarm => {
                        error!(
                            correlation_id = %correlation_id,
                            "duplicate notify ignored; abnormal redelivery volume"
                        );
                    }
                }
                return None;
            }
            Err(e) => {
                error!(correlation_id = %correlation_id, error = %e, "failed to store response");
                return None;
            }
        }

        let rows = match self
            .store
            .wait_queues_for_correlation_ids(&[correlation_id.to_string()])
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                // Response is stored; the sweep will fan it out.
                warn!(correlation_id = %correlation_id, error = %e, "failed to look up waiters");
                return Some(response.id);
            }
        };

        for row in &rows {
            let event =
                NotifyEvent::completion(row.wait_instance_id, error).with_publisher(&row.publisher);
            if let Err(e) = self.queue.publish(event).await {
                warn!(
                    correlation_id = %correlation_id,
                    wait_instance_id = %row.wait_instance_id,
                    error = %e,
                    "failed to publish notify event"
                );
            }
        }

        debug!(
            correlation_id = %correlation_id,
            notification_id = %response.id,
            waiters = rows.len(),
            error,
            "response recorded"
        );
        Some(response.id)
    }

    /// Record intermediate progress for `correlation_id`. Delivered to the
    /// waits on that id by the progress sweep; never completes anything.
    #[instrument(skip(self, payload), fields(correlation_id = %correlation_id))]
    pub async fn update_progress(
        &self,
        correlation_id: &str,
        payload: ResponsePayload,
    ) -> Option<Uuid> {
        let update = ProgressUpdate::new(correlation_id, payload);
        match self.store.insert_progress_update(&update).await {
            Ok(()) => Some(update.id),
            Err(e) => {
                warn!(correlation_id = %correlation_id, error = %e, "failed to store progress update");
                None
            }
        }
    }
}
