//! Budget for duplicate-notify log lines.
//!
//! A handful of duplicate completions per hour is normal redelivery noise.
//! Past the budget, duplicates are logged as an alarm instead.

use std::num::NonZeroU32;

use governor::{Quota, RateLimiter};

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// How a duplicate should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateSeverity {
    /// Within budget.
    Routine,
    /// Budget exhausted.
    Alarm,
}

/// Token bucket over duplicate-notify reports.
pub struct DuplicateAlarm {
    limiter: DefaultRateLimiter,
}

impl DuplicateAlarm {
    pub fn per_hour(permits: NonZeroU32) -> Self {
        Self {
            limiter: RateLimiter::direct(Quota::per_hour(permits)),
        }
    }

    /// Consume one permit if available.
    pub fn record(&self) -> DuplicateSeverity {
        match self.limiter.check() {
            Ok(()) => DuplicateSeverity::Routine,
            Err(_) => DuplicateSeverity::Alarm,
        }
    }
}

impl std::fmt::Debug for DuplicateAlarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DuplicateAlarm").finish_non_exhaustive()
    }
}
