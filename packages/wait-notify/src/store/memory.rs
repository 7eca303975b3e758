//! In-memory storage implementation for testing and development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::model::{
    NotifyResponse, ProgressUpdate, ResponseHead, ResponseStatus, WaitInstance, WaitInstanceError,
    WaitQueue, WaitStatus,
};
use crate::store::WaitStore;

#[derive(Default)]
struct State {
    instances: HashMap<Uuid, WaitInstance>,
    queues: HashMap<Uuid, WaitQueue>,
    /// Keyed by correlation id, which is the unique key.
    responses: HashMap<String, NotifyResponse>,
    errors: Vec<WaitInstanceError>,
    progress: Vec<ProgressUpdate>,
}

/// In-memory storage for wait instances, obligations and responses.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart.
#[derive(Default)]
pub struct MemoryWaitStore {
    state: RwLock<State>,
}

impl MemoryWaitStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending obligation rows.
    pub async fn wait_queue_count(&self) -> usize {
        self.state.read().await.queues.len()
    }

    /// Number of stored responses, consumed or not.
    pub async fn response_count(&self) -> usize {
        self.state.read().await.responses.len()
    }

    pub async fn get_response(&self, correlation_id: &str) -> Option<NotifyResponse> {
        self.state.read().await.responses.get(correlation_id).cloned()
    }

    /// Every error record written so far, in insertion order.
    pub async fn wait_instance_errors(&self) -> Vec<WaitInstanceError> {
        self.state.read().await.errors.clone()
    }

    /// Number of progress updates not yet delivered.
    pub async fn progress_update_count(&self) -> usize {
        self.state.read().await.progress.len()
    }

    /// Overwrite a response's creation time. Lets tests age a response past
    /// the zombie grace window without sleeping.
    pub async fn backdate_response(&self, correlation_id: &str, created_at: DateTime<Utc>) {
        if let Some(response) = self.state.write().await.responses.get_mut(correlation_id) {
            response.created_at = created_at;
        }
    }
}

#[async_trait]
impl WaitStore for MemoryWaitStore {
    async fn insert_wait_instance(
        &self,
        instance: &WaitInstance,
        queues: &[WaitQueue],
    ) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.instances.contains_key(&instance.id) {
            return Err(StoreError::DuplicateKey {
                key: instance.id.to_string(),
            });
        }
        state.instances.insert(instance.id, instance.clone());
        for queue in queues {
            state.queues.insert(queue.id, queue.clone());
        }
        Ok(())
    }

    async fn get_wait_instance(&self, id: Uuid) -> StoreResult<Option<WaitInstance>> {
        Ok(self.state.read().await.instances.get(&id).cloned())
    }

    async fn update_wait_status(&self, id: Uuid, status: WaitStatus) -> StoreResult<()> {
        let mut state = self.state.write().await;
        match state.instances.get_mut(&id) {
            Some(instance) => {
                instance.status = status;
                Ok(())
            }
            None => Err(StoreError::backend(anyhow::anyhow!(
                "wait instance {} not found",
                id
            ))),
        }
    }

    async fn expired_wait_instances(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<WaitInstance>> {
        let state = self.state.read().await;
        let mut expired: Vec<&WaitInstance> = state
            .instances
            .values()
            .filter(|i| i.status == WaitStatus::New && i.is_expired_at(now))
            .collect();
        expired.sort_by_key(|i| (i.expires_at, i.id));
        Ok(expired.into_iter().take(limit).cloned().collect())
    }

    async fn insert_wait_instance_error(&self, record: &WaitInstanceError) -> StoreResult<()> {
        self.state.write().await.errors.push(record.clone());
        Ok(())
    }

    async fn wait_queues_for_instance(
        &self,
        wait_instance_id: Uuid,
    ) -> StoreResult<Vec<WaitQueue>> {
        let state = self.state.read().await;
        let mut rows: Vec<WaitQueue> = state
            .queues
            .values()
            .filter(|q| q.wait_instance_id == wait_instance_id)
            .cloned()
            .collect();
        rows.sort_by_key(|q| q.id);
        Ok(rows)
    }

    async fn wait_queues_for_correlation_ids(
        &self,
        correlation_ids: &[String],
    ) -> StoreResult<Vec<WaitQueue>> {
        let state = self.state.read().await;
        let mut rows: Vec<WaitQueue> = state
            .queues
            .values()
            .filter(|q| correlation_ids.contains(&q.correlation_id))
            .cloned()
            .collect();
        rows.sort_by_key(|q| q.id);
        Ok(rows)
    }

    async fn delete_wait_queue(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.state.write().await.queues.remove(&id).is_some())
    }

    async fn insert_response(&self, response: &NotifyResponse) -> StoreResult<()> {
        let mut state = self.state.write().await;
        if state.responses.contains_key(&response.correlation_id) {
            return Err(StoreError::DuplicateKey {
                key: response.correlation_id.clone(),
            });
        }
        state
            .responses
            .insert(response.correlation_id.clone(), response.clone());
        Ok(())
    }

    async fn responses_for(&self, correlation_ids: &[String]) -> StoreResult<Vec<NotifyResponse>> {
        let state = self.state.read().await;
        Ok(correlation_ids
            .iter()
            .filter_map(|cid| state.responses.get(cid).cloned())
            .collect())
    }

    async fn response_heads(
        &self,
        after: Option<&ResponseHead>,
        limit: usize,
    ) -> StoreResult<Vec<ResponseHead>> {
        let state = self.state.read().await;
        let mut heads: Vec<ResponseHead> = state
            .responses
            .values()
            .map(|r| ResponseHead {
                created_at: r.created_at,
                correlation_id: r.correlation_id.clone(),
            })
            .filter(|head| after.map_or(true, |after| head > after))
            .collect();
        heads.sort();
        heads.truncate(limit);
        Ok(heads)
    }

    async fn mark_response_consumed(&self, correlation_id: &str) -> StoreResult<()> {
        if let Some(response) = self.state.write().await.responses.get_mut(correlation_id) {
            response.status = ResponseStatus::Consumed;
        }
        Ok(())
    }

    async fn delete_responses(&self, correlation_ids: &[String]) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let mut deleted = 0;
        for cid in correlation_ids {
            if state.responses.remove(cid).is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn insert_progress_update(&self, update: &ProgressUpdate) -> StoreResult<()> {
        self.state.write().await.progress.push(update.clone());
        Ok(())
    }

    async fn progress_updates(&self, limit: usize) -> StoreResult<Vec<ProgressUpdate>> {
        let state = self.state.read().await;
        Ok(state.progress.iter().take(limit).cloned().collect())
    }

    async fn delete_progress_updates(&self, ids: &[Uuid]) -> StoreResult<u64> {
        let mut state = self.state.write().await;
        let before = state.progress.len();
        state.progress.retain(|u| !ids.contains(&u.id));
        Ok((before - state.progress.len()) as u64)
    }
}
