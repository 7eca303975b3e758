//! At-least-once transport for [`NotifyEvent`]s.
//!
//! Available backends:
//! - `MemoryNotifyQueue` - In-process queue with leases (always available)
//! - `PostgresNotifyQueue` - Table-backed queue (requires `postgres` feature)
//!
//! A claimed message stays invisible to other consumers until its lease
//! expires. If the consumer does not [`NotifyQueue::ack`] it by then (crash,
//! hang), the message is delivered again with `attempt` incremented. Consumers
//! must therefore tolerate duplicates, which the dispatcher does.
//!
//! Every event travels on a topic, its [`NotifyEvent::publisher`]. A consumer
//! claims from exactly one topic, so each publisher gets its own worker pool.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryNotifyQueue;

#[cfg(feature = "postgres")]
pub use postgres::PostgresNotifyQueue;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::NotifyEvent;

/// Default lease for a claimed message.
pub const DEFAULT_LEASE_MS: i64 = 60_000;

/// A claimed message ready for dispatch.
#[derive(Debug, Clone)]
pub struct ClaimedEvent {
    pub message_id: Uuid,
    pub event: NotifyEvent,
    /// 1 on first delivery.
    pub attempt: i32,
    pub priority: i32,
    /// When the message became (or will again become) visible.
    pub visible_at: DateTime<Utc>,
}

/// Trait for notify queue operations.
#[async_trait]
pub trait NotifyQueue: Send + Sync {
    /// Enqueue an event on its publisher's topic. Returns the message id.
    async fn publish(&self, event: NotifyEvent) -> Result<Uuid>;

    /// Claim up to `limit` visible messages from `topic` on behalf of
    /// `worker_id`.
    async fn claim(&self, topic: &str, worker_id: &str, limit: usize)
        -> Result<Vec<ClaimedEvent>>;

    /// Acknowledge a message so it is never delivered again.
    async fn ack(&self, message_id: Uuid) -> Result<()>;
}
