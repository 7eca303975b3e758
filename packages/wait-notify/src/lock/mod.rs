//! Named mutual-exclusion locks.
//!
//! Two scopes are used:
//! - [`LockScope::WaitInstance`] serializes finalization of one wait instance
//! - [`LockScope::Sweeper`] elects one sweeper per cluster per run
//!
//! Backends:
//! - `MemoryLockService` - process-local leases (always available)
//! - `PostgresLockService` - session advisory locks (requires `postgres` feature)

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryLockService;

#[cfg(feature = "postgres")]
pub use postgres::PostgresLockService;

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

/// How often [`LockService::acquire`] retries while waiting.
pub const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Namespace a lock key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    WaitInstance,
    Sweeper,
}

impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockScope::WaitInstance => "wait-instance",
            LockScope::Sweeper => "sweeper",
        }
    }

    /// The fully qualified lock name, e.g. `wait-instance:0190...`.
    pub fn qualify(&self, key: &str) -> String {
        format!("{}:{}", self.as_str(), key)
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proof of ownership for a held lock. Hand it back to
/// [`LockService::release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    pub scope: LockScope,
    pub key: String,
    pub token: Uuid,
}

impl LockHandle {
    pub fn new(scope: LockScope, key: impl Into<String>) -> Self {
        Self {
            scope,
            key: key.into(),
            token: Uuid::new_v4(),
        }
    }

    pub fn name(&self) -> String {
        self.scope.qualify(&self.key)
    }
}

/// Lock service operations.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Take the lock if it is free. `None` means someone else holds it.
    async fn try_lock(&self, scope: LockScope, key: &str) -> Result<Option<LockHandle>>;

    /// Release a lock previously returned by this service. Releasing a lock
    /// that has already been lost is not an error.
    async fn release(&self, handle: LockHandle) -> Result<()>;

    /// Wait up to `max_wait` for the lock. A zero wait is a single attempt.
    async fn acquire(
        &self,
        scope: LockScope,
        key: &str,
        max_wait: Duration,
    ) -> Result<Option<LockHandle>> {
        let deadline = Instant::now() + max_wait;
        loop {
            if let Some(handle) = self.try_lock(scope, key).await? {
                return Ok(Some(handle));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(ACQUIRE_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}
