//! Engine wiring for the Postgres deployment.
//!
//! Store and queue share `db_pool`. Advisory locks pin a session each, so
//! they draw from a separate `lock_pool` sized by [`Config::validate`].

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use wait_notify::{
    CallbackRegistry, PostgresLockService, PostgresNotifyQueue, PostgresWaitStore,
    WaitNotifyEngine,
};

use crate::config::Config;

/// Shared handles every task in the worker process runs against.
#[derive(Clone)]
pub struct ServerKernel {
    pub db_pool: PgPool,
    pub lock_pool: PgPool,
    pub engine: WaitNotifyEngine,
}

impl ServerKernel {
    /// Connect to the database and build the kernel.
    pub async fn connect(config: &Config, callbacks: CallbackRegistry) -> Result<Self> {
        config.validate()?;
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await
            .context("Failed to connect to database")?;

        Self::from_pool(pool, config, callbacks).await
    }

    /// Build the kernel on an existing store pool. The lock pool is opened
    /// from `config.database_url`.
    pub async fn from_pool(
        pool: PgPool,
        config: &Config,
        callbacks: CallbackRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let lock_pool = PgPoolOptions::new()
            .max_connections(config.lock_pool_size)
            .connect(&config.database_url)
            .await
            .context("Failed to open lock pool")?;

        Self::from_pools(pool, lock_pool, config, callbacks).await
    }

    /// Build the kernel on existing pools, creating tables as needed.
    pub async fn from_pools(
        pool: PgPool,
        lock_pool: PgPool,
        config: &Config,
        callbacks: CallbackRegistry,
    ) -> Result<Self> {
        let store = PostgresWaitStore::from_pool(pool.clone())
            .await
            .context("Failed to prepare wait store")?;
        let queue = PostgresNotifyQueue::from_pool(pool.clone())
            .await
            .context("Failed to prepare notify queue")?;
        let locks = PostgresLockService::new(lock_pool.clone());

        let mut builder =
            WaitNotifyEngine::builder(Arc::new(store), Arc::new(queue), Arc::new(locks))
                .with_callbacks(callbacks)
                .with_config(config.engine_config());
        for publisher in &config.publishers {
            builder = builder.with_publisher(publisher.clone());
        }
        let engine = builder.build();

        info!(
            max_connections = config.database_max_connections,
            lock_connections = config.lock_pool_size,
            publishers = ?config.publishers,
            "wait/notify kernel ready"
        );

        Ok(Self {
            db_pool: pool,
            lock_pool,
            engine,
        })
    }
}
