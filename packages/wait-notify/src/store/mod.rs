//! Durable record storage for waits, obligations and responses.
//!
//! Available backends:
//! - `MemoryWaitStore` - In-memory storage (always available)
//! - `PostgresWaitStore` - PostgreSQL storage (requires `postgres` feature)
//!
//! # Implementer Notes
//!
//! - `insert_response` MUST enforce one response per correlation id and
//!   report a collision as [`StoreError::DuplicateKey`]. That constraint is
//!   what makes `notify()` idempotent without a lock.
//! - Lookups by correlation id and by wait instance id are on the hot path
//!   and should be indexed.
//!
//! [`StoreError::DuplicateKey`]: crate::StoreError::DuplicateKey

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryWaitStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresWaitStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;
use crate::model::{
    NotifyResponse, ProgressUpdate, ResponseHead, WaitInstance, WaitInstanceError, WaitQueue,
    WaitStatus,
};

/// Storage capabilities the engine needs.
#[async_trait]
pub trait WaitStore: Send + Sync {
    // -------------------------------------------------------------------------
    // Wait instances
    // -------------------------------------------------------------------------

    /// Persist a new instance together with its obligation rows.
    async fn insert_wait_instance(
        &self,
        instance: &WaitInstance,
        queues: &[WaitQueue],
    ) -> StoreResult<()>;

    async fn get_wait_instance(&self, id: Uuid) -> StoreResult<Option<WaitInstance>>;

    async fn update_wait_status(&self, id: Uuid, status: WaitStatus) -> StoreResult<()>;

    /// `NEW` instances whose deadline is at or before `now`, earliest first.
    async fn expired_wait_instances(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<WaitInstance>>;

    /// Append a diagnostic record for a failed callback.
    async fn insert_wait_instance_error(&self, record: &WaitInstanceError) -> StoreResult<()>;

    // -------------------------------------------------------------------------
    // Wait queue
    // -------------------------------------------------------------------------

    async fn wait_queues_for_instance(&self, wait_instance_id: Uuid)
        -> StoreResult<Vec<WaitQueue>>;

    async fn wait_queues_for_correlation_ids(
        &self,
        correlation_ids: &[String],
    ) -> StoreResult<Vec<WaitQueue>>;

    /// Returns false if the row was already gone.
    async fn delete_wait_queue(&self, id: Uuid) -> StoreResult<bool>;

    // -------------------------------------------------------------------------
    // Responses
    // -------------------------------------------------------------------------

    /// Insert a response; a second response for the same correlation id fails
    /// with `DuplicateKey`.
    async fn insert_response(&self, response: &NotifyResponse) -> StoreResult<()>;

    async fn responses_for(&self, correlation_ids: &[String]) -> StoreResult<Vec<NotifyResponse>>;

    /// Up to `limit` responses (id + creation time only) ordered by
    /// `(created_at, correlation_id)`, starting strictly after `after`.
    async fn response_heads(
        &self,
        after: Option<&ResponseHead>,
        limit: usize,
    ) -> StoreResult<Vec<ResponseHead>>;

    async fn mark_response_consumed(&self, correlation_id: &str) -> StoreResult<()>;

    /// Returns the number of responses deleted.
    async fn delete_responses(&self, correlation_ids: &[String]) -> StoreResult<u64>;

    // -------------------------------------------------------------------------
    // Progress updates
    // -------------------------------------------------------------------------

    async fn insert_progress_update(&self, update: &ProgressUpdate) -> StoreResult<()>;

    /// Up to `limit` undelivered progress updates, oldest first.
    async fn progress_updates(&self, limit: usize) -> StoreResult<Vec<ProgressUpdate>>;

    /// Returns the number of updates deleted.
    async fn delete_progress_updates(&self, ids: &[Uuid]) -> StoreResult<u64>;
}
