use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use wait_notify::{EngineConfig, WorkerConfig, DEFAULT_PUBLISHER};

/// Lock connections held by the periodic jobs at once: reconciliation sweep,
/// timeout sweep and progress delivery.
pub const SCHEDULED_LOCKS: u32 = 3;

/// Worker host configuration loaded from environment variables.
///
/// ## Connection pools
///
/// Every held advisory lock pins one connection until it is released, and a
/// dispatcher holds its wait lock while it reads and writes through the store.
/// Locks therefore live in their own pool of `lock_pool_size` connections so
/// they can never starve store queries. Each worker may hold one lock per
/// claimed event, so the lock pool must satisfy
///
/// ```text
/// lock_pool_size >= publishers * worker_concurrency * worker_batch_size + 3
/// ```
///
/// which [`Config::validate`] enforces. `LOCK_POOL_SIZE` defaults to exactly
/// that bound.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Store and queue pool size.
    pub database_max_connections: u32,
    /// Advisory lock pool size.
    pub lock_pool_size: u32,
    /// Publisher topics served by this process; workers run per topic.
    pub publishers: Vec<String>,
    pub worker_id: String,
    pub worker_concurrency: usize,
    pub worker_batch_size: usize,
    pub poll_interval: Duration,
    pub sweep_interval: Duration,
    pub timeout_sweep_interval: Duration,
    pub zombie_grace: Duration,
    pub webhook_timeout: Duration,
    pub progress_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        let publishers = parse_publishers(
            &env::var("NOTIFY_PUBLISHERS").unwrap_or_else(|_| DEFAULT_PUBLISHER.to_string()),
        );
        let worker_concurrency: usize = parse_var("WORKER_CONCURRENCY", 2)?;
        let worker_batch_size: usize = parse_var("WORKER_BATCH_SIZE", 10)?;
        let lock_pool_size = parse_var(
            "LOCK_POOL_SIZE",
            required_lock_connections(publishers.len(), worker_concurrency, worker_batch_size),
        )?;

        let config = Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 20)?,
            lock_pool_size,
            publishers,
            worker_id: env::var("WORKER_ID")
                .unwrap_or_else(|_| WorkerConfig::default().worker_id),
            worker_concurrency,
            worker_batch_size,
            poll_interval: Duration::from_millis(parse_var("POLL_INTERVAL_MS", 1000)?),
            sweep_interval: Duration::from_secs(parse_var("SWEEP_INTERVAL_SECS", 60)?),
            timeout_sweep_interval: Duration::from_secs(parse_var(
                "TIMEOUT_SWEEP_INTERVAL_SECS",
                60,
            )?),
            zombie_grace: Duration::from_secs(parse_var("ZOMBIE_GRACE_SECS", 300)?),
            webhook_timeout: Duration::from_secs(parse_var("WEBHOOK_TIMEOUT_SECS", 30)?),
            progress_interval: Duration::from_secs(parse_var("PROGRESS_INTERVAL_SECS", 5)?),
        };
        config.validate()?;
        Ok(config)
    }

    /// Lock connections this configuration can hold at the same time.
    pub fn required_lock_connections(&self) -> u32 {
        required_lock_connections(
            self.publishers.len(),
            self.worker_concurrency,
            self.worker_batch_size,
        )
    }

    /// Reject settings under which workers could exhaust a pool.
    pub fn validate(&self) -> Result<()> {
        if self.publishers.is_empty() {
            bail!("NOTIFY_PUBLISHERS must name at least one publisher");
        }
        if self.database_max_connections == 0 {
            bail!("DATABASE_MAX_CONNECTIONS must be at least 1");
        }
        let required = self.required_lock_connections();
        if self.lock_pool_size < required {
            bail!(
                "LOCK_POOL_SIZE is {} but {} publisher(s) x {} worker(s) x batch {} + {} scheduled jobs can hold {} locks",
                self.lock_pool_size,
                self.publishers.len(),
                self.worker_concurrency,
                self.worker_batch_size,
                SCHEDULED_LOCKS,
                required
            );
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::default().with_zombie_grace(self.zombie_grace)
    }

    /// Config for the `index`-th worker task consuming `topic`.
    pub fn worker_config(&self, topic: &str, index: usize) -> WorkerConfig {
        WorkerConfig::with_worker_id(format!("{}-{}-{}", self.worker_id, topic, index))
            .batch_size(self.worker_batch_size)
            .poll_interval(self.poll_interval)
            .topic(topic)
    }
}

fn required_lock_connections(publishers: usize, concurrency: usize, batch_size: usize) -> u32 {
    let per_workers = publishers
        .saturating_mul(concurrency)
        .saturating_mul(batch_size);
    u32::try_from(per_workers)
        .unwrap_or(u32::MAX)
        .saturating_add(SCHEDULED_LOCKS)
}

fn parse_publishers(raw: &str) -> Vec<String> {
    let mut publishers: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    publishers.sort();
    publishers.dedup();
    publishers
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse()
            .with_context(|| format!("{} must be a valid number", name)),
        Err(_) => Ok(default),
    }
}
