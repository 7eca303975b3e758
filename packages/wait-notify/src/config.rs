//! Engine tuning knobs.

use std::num::NonZeroU32;
use std::time::Duration;

/// Lock key for the reconciliation sweep.
pub const SWEEPER_LOCK_KEY: &str = "notify-response-sweeper";

/// Lock key for the timeout sweep.
pub const TIMEOUT_SWEEPER_LOCK_KEY: &str = "wait-timeout-sweeper";

/// Lock key for progress update delivery.
pub const PROGRESS_LOCK_KEY: &str = "progress-update-sweeper";

/// Configuration shared by the publisher, sweeper and dispatcher.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum responses examined per sweep run.
    pub sweep_batch_size: usize,
    /// Orphaned responses younger than this are left alone.
    pub zombie_grace: Duration,
    /// How long the dispatcher waits for an instance lock.
    pub instance_lock_wait: Duration,
    /// How long a sweeper waits for the cluster-wide sweep lock. Zero means
    /// one attempt: if another node is sweeping, skip this run.
    pub sweeper_lock_wait: Duration,
    /// Duplicate-notify warnings allowed per hour before escalating.
    pub duplicate_alarms_per_hour: NonZeroU32,
    /// Maximum expired instances handled per timeout sweep.
    pub timeout_batch_size: usize,
    /// Maximum progress updates delivered per run.
    pub progress_batch_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sweep_batch_size: 1000,
            zombie_grace: Duration::from_secs(5 * 60),
            instance_lock_wait: Duration::from_secs(60),
            sweeper_lock_wait: Duration::ZERO,
            duplicate_alarms_per_hour: NonZeroU32::MIN.saturating_add(7),
            timeout_batch_size: 500,
            progress_batch_size: 500,
        }
    }
}

impl EngineConfig {
    pub fn with_sweep_batch_size(mut self, size: usize) -> Self {
        self.sweep_batch_size = size;
        self
    }

    pub fn with_zombie_grace(mut self, grace: Duration) -> Self {
        self.zombie_grace = grace;
        self
    }

    pub fn with_instance_lock_wait(mut self, wait: Duration) -> Self {
        self.instance_lock_wait = wait;
        self
    }

    pub fn with_sweeper_lock_wait(mut self, wait: Duration) -> Self {
        self.sweeper_lock_wait = wait;
        self
    }

    pub fn with_duplicate_alarms_per_hour(mut self, per_hour: NonZeroU32) -> Self {
        self.duplicate_alarms_per_hour = per_hour;
        self
    }

    pub fn with_timeout_batch_size(mut self, size: usize) -> Self {
        self.timeout_batch_size = size;
        self
    }

    pub fn with_progress_batch_size(mut self, size: usize) -> Self {
        self.progress_batch_size = size;
        self
    }
}
