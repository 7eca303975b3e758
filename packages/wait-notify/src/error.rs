//! Structured error types for the wait/notify engine.
//!
//! `WaitNotifyError` is what a caller of [`crate::WaitRegistry::wait_for_all`]
//! can see. `StoreError` is what a [`crate::WaitStore`] backend reports.
//!
//! # The Error Boundary Rule
//!
//! > **Only registration surfaces errors.**
//!
//! - `notify()` swallows everything and answers `None`
//! - the dispatcher and sweeper report what happened through outcome values
//!   and logs, never through `Err`
//!
//! # Example
//!
//! ```ignore
//! use wait_notify::{WaitNotifyError, StoreError};
//!
//! match registry.wait_for_all(None, spec, Vec::<String>::new()).await {
//!     Err(WaitNotifyError::InvalidArgument(reason)) => eprintln!("bad input: {reason}"),
//!     Err(WaitNotifyError::Store(StoreError::Backend(e))) => eprintln!("store down: {e}"),
//!     Err(e) => eprintln!("other: {e}"),
//!     Ok(id) => println!("registered {id}"),
//! }
//! ```

use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T, E = WaitNotifyError> = std::result::Result<T, E>;

/// Convenience alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// =============================================================================
// Store Error
// =============================================================================

/// Errors from the durable record store.
///
/// The distinction matters to the completion publisher:
/// - [`StoreError::DuplicateKey`] means the record already exists. A second
///   completion signal for the same correlation id lands here and is benign.
/// - [`StoreError::Backend`] means storage failed (timeout, connection,
///   serialization).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record with the same unique key already exists.
    #[error("duplicate key: {key}")]
    DuplicateKey {
        /// The colliding key.
        key: String,
    },

    /// Storage backend failed.
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// Create a backend error from any error type.
    pub fn backend(err: impl Into<anyhow::Error>) -> Self {
        StoreError::Backend(err.into())
    }

    /// Returns true if this is a unique-key collision.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey { .. })
    }
}

// =============================================================================
// Wait/Notify Error
// =============================================================================

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum WaitNotifyError {
    /// Caller supplied unusable input (e.g. no correlation ids).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The store rejected or failed a write during registration.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl WaitNotifyError {
    /// Create an invalid-argument error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        WaitNotifyError::InvalidArgument(reason.into())
    }
}
