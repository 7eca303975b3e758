//! In-memory lock service for testing and single-process embedding.
//!
//! ## Limitations
//!
//! - **Single-process only**: Locks are not shared across process boundaries
//! - Leases expire after `lease_duration`, so a holder that never releases
//!   blocks others for at most that long

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{LockHandle, LockScope, LockService};

#[derive(Debug, Clone)]
struct Lease {
    token: Uuid,
    expires_at: DateTime<Utc>,
}

fn poison_err<T>(_: PoisonError<T>) -> anyhow::Error {
    anyhow!("lock table poisoned")
}

/// In-memory lock service backed by expiring leases.
#[derive(Debug)]
pub struct MemoryLockService {
    leases: RwLock<HashMap<String, Lease>>,
    lease_duration: Duration,
}

impl Default for MemoryLockService {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

impl MemoryLockService {
    pub fn new(lease_duration: Duration) -> Self {
        Self {
            leases: RwLock::new(HashMap::new()),
            lease_duration,
        }
    }

    /// Returns true if a live lease exists for the lock.
    pub fn is_locked(&self, scope: LockScope, key: &str) -> bool {
        let now = Utc::now();
        self.leases
            .read()
            .map(|leases| {
                leases
                    .get(&scope.qualify(key))
                    .is_some_and(|lease| lease.expires_at > now)
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn try_lock(&self, scope: LockScope, key: &str) -> Result<Option<LockHandle>> {
        let mut leases = self.leases.write().map_err(poison_err)?;
        let now = Utc::now();
        let name = scope.qualify(key);

        if leases.get(&name).is_some_and(|lease| lease.expires_at > now) {
            return Ok(None);
        }

        let handle = LockHandle::new(scope, key);
        leases.insert(
            name,
            Lease {
                token: handle.token,
                expires_at: now
                    + chrono::Duration::from_std(self.lease_duration)
                        .unwrap_or(chrono::Duration::seconds(300)),
            },
        );
        Ok(Some(handle))
    }

    async fn release(&self, handle: LockHandle) -> Result<()> {
        let mut leases = self.leases.write().map_err(poison_err)?;
        let name = handle.name();
        // Only the current owner may release; a stale handle is a no-op.
        if leases.get(&name).is_some_and(|lease| lease.token == handle.token) {
            leases.remove(&name);
        }
        Ok(())
    }
}
