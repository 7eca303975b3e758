//! PostgreSQL-backed notify queue.
//!
//! Messages live in `notify_events`. Claiming uses `FOR UPDATE SKIP LOCKED`
//! so concurrent workers never block on each other, and stamps a lease on
//! each claimed row. A row whose lease has expired is claimable again.
//! Each row carries the topic it was published on and is only claimable by
//! consumers of that topic.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::FromRow;
use tracing::info;
use uuid::Uuid;

use super::{ClaimedEvent, NotifyQueue, DEFAULT_LEASE_MS};
use crate::model::NotifyEvent;

/// PostgreSQL-backed notify queue implementation.
#[derive(Clone)]
pub struct PostgresNotifyQueue {
    pool: PgPool,
    default_lease_ms: i64,
}

#[derive(FromRow)]
struct EventRow {
    id: Uuid,
    payload: Json<NotifyEvent>,
    attempt: i32,
    priority: i32,
    visible_at: DateTime<Utc>,
}

impl PostgresNotifyQueue {
    /// Create a queue on an existing pool and ensure its table exists.
    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        let queue = Self {
            pool,
            default_lease_ms: DEFAULT_LEASE_MS,
        };
        queue.run_migrations().await?;
        Ok(queue)
    }

    /// Override the lease duration for claimed messages.
    pub fn with_lease_duration(mut self, lease_ms: i64) -> Self {
        self.default_lease_ms = lease_ms;
        self
    }

    pub fn default_lease_ms(&self) -> i64 {
        self.default_lease_ms
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notify_events (
                id UUID PRIMARY KEY,
                wait_instance_id UUID NOT NULL,
                topic TEXT NOT NULL DEFAULT 'general',
                kind TEXT NOT NULL,
                payload JSONB NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0,
                visible_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                lease_expires_at TIMESTAMPTZ,
                worker_id TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "ALTER TABLE notify_events ADD COLUMN IF NOT EXISTS topic TEXT NOT NULL DEFAULT 'general'",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_notify_events_claim ON notify_events(topic, priority, visible_at)",
        )
        .execute(&self.pool)
        .await?;

        info!("notify queue migrations applied");
        Ok(())
    }

    /// Number of messages not yet acknowledged.
    pub async fn backlog(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM notify_events")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl NotifyQueue for PostgresNotifyQueue {
    async fn publish(&self, event: NotifyEvent) -> Result<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO notify_events (id, wait_instance_id, topic, kind, payload)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(event.wait_instance_id)
        .bind(&event.publisher)
        .bind(event.kind.as_str())
        .bind(Json(&event))
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn claim(&self, topic: &str, worker_id: &str, limit: usize) -> Result<Vec<ClaimedEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(
            r#"
            WITH next_events AS (
                SELECT id
                FROM notify_events
                WHERE topic = $4
                  AND ((lease_expires_at IS NULL AND visible_at <= NOW())
                       OR lease_expires_at < NOW())
                ORDER BY priority, visible_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE notify_events
            SET
                attempt = attempt + 1,
                lease_expires_at = NOW() + ($2 || ' milliseconds')::INTERVAL,
                worker_id = $3
            WHERE id IN (SELECT id FROM next_events)
            RETURNING id, payload, attempt, priority, visible_at
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(self.default_lease_ms.to_string())
        .bind(worker_id)
        .bind(topic)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ClaimedEvent {
                message_id: row.id,
                event: row.payload.0,
                attempt: row.attempt,
                priority: row.priority,
                visible_at: row.visible_at,
            })
            .collect())
    }

    async fn ack(&self, message_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM notify_events WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
