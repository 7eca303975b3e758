//! PostgreSQL advisory-lock service.
//!
//! Session advisory locks belong to a connection, so every held lock pins
//! one pooled connection until it is released. If the process dies, the
//! server drops the session and the lock with it.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPool;
use sqlx::Postgres;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::{LockHandle, LockScope, LockService};

pub struct PostgresLockService {
    pool: PgPool,
    held: Mutex<HashMap<Uuid, PoolConnection<Postgres>>>,
}

impl PostgresLockService {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(HashMap::new()),
        }
    }

    /// Number of locks this process currently holds.
    pub async fn held_count(&self) -> usize {
        self.held.lock().await.len()
    }
}

#[async_trait]
impl LockService for PostgresLockService {
    async fn try_lock(&self, scope: LockScope, key: &str) -> Result<Option<LockHandle>> {
        let mut conn = self.pool.acquire().await?;
        let handle = LockHandle::new(scope, key);

        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock(hashtext($1))")
            .bind(handle.name())
            .fetch_one(&mut *conn)
            .await?;

        if !acquired {
            return Ok(None);
        }

        self.held.lock().await.insert(handle.token, conn);
        Ok(Some(handle))
    }

    async fn release(&self, handle: LockHandle) -> Result<()> {
        let Some(mut conn) = self.held.lock().await.remove(&handle.token) else {
            return Ok(());
        };

        let unlocked = sqlx::query_as::<_, (bool,)>("SELECT pg_advisory_unlock(hashtext($1))")
            .bind(handle.name())
            .fetch_one(&mut *conn)
            .await;

        match unlocked {
            Ok((true,)) => Ok(()),
            Ok((false,)) => {
                warn!(lock = %handle.name(), "advisory lock was not held at release");
                Ok(())
            }
            Err(e) => {
                // Closing the session is the only other way to drop the lock.
                drop(conn.detach());
                Err(e.into())
            }
        }
    }
}
