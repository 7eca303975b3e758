//! # Wait/Notify
//!
//! Correlation-based completion coordination: register a wait on many
//! correlation ids, and fire its callback exactly once after every one of
//! them has completed.
//!
//! ## Core Concepts
//!
//! - A **wait** ([`WaitInstance`]) names a set of correlation ids and a
//!   callback ([`CallbackSpec`]).
//! - A **completion** ([`NotifyResponse`]) is stored at most once per
//!   correlation id.
//! - A **notify event** ([`NotifyEvent`]) asks the dispatcher to look at one
//!   wait again. Events are delivered at least once, in no particular order.
//!
//! ## Architecture
//!
//! ```text
//! wait_for_all() ──► WaitRegistry ──► WaitInstance + WaitQueue rows
//!
//! notify() ──► CompletionPublisher ──► NotifyResponse
//!                     │
//!                     └─► NotifyEvent per waiting instance ──┐
//!                                                           │
//! ReconciliationSweeper (periodic, cluster lock)            │
//!     ├─► hinted NotifyEvent per instance ──────────────────┤
//!     └─► delete zombie responses past the grace window     │
//!                                                           ▼
//!                                              NotifyQueue (one topic per publisher)
//!                                                           │
//!                                              DispatchWorker.claim(topic)
//!                                                           │
//!                                                           ▼
//!                              CompletionDispatcher (instance lock)
//!                                   └─► NotifyCallback, exactly once
//! ```
//!
//! ## Key Invariants
//!
//! 1. **At most one response per correlation id** - a second `notify()` for
//!    the same id is a suppressed duplicate
//! 2. **Terminal status is final** - NEW moves to SUCCESS or ERROR once
//! 3. **Completeness is re-derived from the store** - never inferred from
//!    event payloads or delivery order
//! 4. **Finalization happens under the instance lock** - with a status
//!    re-check after the lock is taken
//! 5. **Callback failures never escape** - they become ERROR plus a
//!    [`WaitInstanceError`] record
//!
//! Progress reported through `update_progress()` takes a side road: the
//! [`ProgressUpdateService`] hands it to `NotifyCallback::notify_progress`
//! on every NEW wait for that id, without touching the wait.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use wait_notify::{
//!     CallbackRegistry, CallbackSpec, MemoryLockService, MemoryNotifyQueue, MemoryWaitStore,
//!     ResponsePayload, WaitNotifyEngine, WorkerConfig,
//! };
//!
//! let mut callbacks = CallbackRegistry::new();
//! callbacks.register::<ResumePipeline>("pipeline:resume", vec![1]);
//!
//! let engine = WaitNotifyEngine::builder(
//!     Arc::new(MemoryWaitStore::new()),
//!     Arc::new(MemoryNotifyQueue::new()),
//!     Arc::new(MemoryLockService::default()),
//! )
//! .with_callbacks(callbacks)
//! .build();
//!
//! let spec = CallbackSpec::with_payload("pipeline:resume", &ResumePipeline { run_id })?;
//! engine.wait_for_all(None, spec, ["task-1", "task-2"]).await?;
//!
//! // ... elsewhere, as each task finishes
//! engine.notify("task-1", ResponsePayload::text("done")).await;
//!
//! // Consumers and the sweep run in the background
//! tokio::spawn(async move { engine.worker(WorkerConfig::default()).run(shutdown).await });
//! ```

pub mod callback;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod lock;
pub mod model;
pub mod progress;
pub mod publisher;
pub mod queue;
pub mod rate_limit;
pub mod registry;
pub mod store;
pub mod sweeper;
pub mod worker;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export error types
pub use error::{Result, StoreError, StoreResult, WaitNotifyError};

// Re-export records
pub use model::{
    ErrorResponse, EventKind, NotifyEvent, NotifyResponse, ProgressUpdate, ResponseHead,
    ResponseMap, ResponsePayload, ResponseStatus, WaitInstance, WaitInstanceError, WaitQueue,
    WaitStatus, DEFAULT_PUBLISHER, NG_ORCHESTRATION_PUBLISHER, ORCHESTRATION_PUBLISHER,
};

// Re-export callback types
pub use callback::{CallbackRegistry, CallbackResolveError, CallbackSpec, NotifyCallback};

// Re-export collaborator traits and backends
pub use lock::{LockHandle, LockScope, LockService, MemoryLockService};
pub use queue::{ClaimedEvent, MemoryNotifyQueue, NotifyQueue};
pub use store::{MemoryWaitStore, WaitStore};

#[cfg(feature = "postgres")]
pub use lock::PostgresLockService;
#[cfg(feature = "postgres")]
pub use queue::PostgresNotifyQueue;
#[cfg(feature = "postgres")]
pub use store::PostgresWaitStore;

// Re-export components
pub use config::EngineConfig;
pub use dispatcher::{CompletionDispatcher, DispatchOutcome};
pub use engine::{WaitNotifyEngine, WaitNotifyEngineBuilder};
pub use progress::{ProgressReport, ProgressUpdateService};
pub use publisher::CompletionPublisher;
pub use registry::WaitRegistry;
pub use sweeper::{ReconciliationSweeper, SweepReport, TimeoutReport};
pub use worker::{DispatchWorker, WorkerConfig};

// Re-export commonly used external types
pub use async_trait::async_trait;
