//! Testing utilities for code built on the wait/notify engine.
//!
//! # Feature Flag
//!
//! This module is only available with the `testing` feature:
//!
//! ```toml
//! [dev-dependencies]
//! wait-notify = { version = "0.1", features = ["testing"] }
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use wait_notify::testing::{MemoryEngine, RecordingCallback};
//!
//! let recorder = RecordingCallback::new();
//! let harness = MemoryEngine::with_callback("recorder", recorder.clone());
//!
//! let id = harness.engine.wait_for_all(None, CallbackSpec::new("recorder"), ["a", "b"]).await?;
//! harness.engine.notify("a", ResponsePayload::text("ok")).await;
//! harness.engine.notify("b", ResponsePayload::text("ok")).await;
//! harness.drain().await;
//!
//! assert_eq!(recorder.calls().len(), 1);
//! ```

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::callback::{CallbackRegistry, NotifyCallback};
use crate::config::EngineConfig;
use crate::dispatcher::DispatchOutcome;
use crate::engine::WaitNotifyEngine;
use crate::lock::MemoryLockService;
use crate::model::{ResponseMap, ResponsePayload};
use crate::queue::{MemoryNotifyQueue, NotifyQueue};
use crate::store::MemoryWaitStore;

/// Which callback method was invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Notify,
    NotifyError,
    NotifyTimeout,
    /// A progress update; `responses` holds the one correlation id.
    Progress,
}

/// One recorded callback invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub kind: CallKind,
    pub responses: ResponseMap,
}

/// Callback that records every invocation. Optionally fails every call.
#[derive(Debug, Clone, Default)]
pub struct RecordingCallback {
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    failure: Option<String>,
}

impl RecordingCallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// A recorder whose every call returns `Err(message)` after recording.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            calls: Arc::default(),
            failure: Some(message.into()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, kind: CallKind) -> usize {
        self.calls().iter().filter(|c| c.kind == kind).count()
    }

    fn record(&self, kind: CallKind, responses: &ResponseMap) -> Result<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                kind,
                responses: responses.clone(),
            });
        }
        match &self.failure {
            Some(message) => Err(anyhow::anyhow!("{}", message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl NotifyCallback for RecordingCallback {
    async fn notify(&self, responses: &ResponseMap) -> Result<()> {
        self.record(CallKind::Notify, responses)
    }

    async fn notify_error(&self, responses: &ResponseMap) -> Result<()> {
        self.record(CallKind::NotifyError, responses)
    }

    async fn notify_timeout(&self, responses: &ResponseMap) -> Result<()> {
        self.record(CallKind::NotifyTimeout, responses)
    }

    async fn notify_progress(&self, correlation_id: &str, progress: &ResponsePayload) -> Result<()> {
        let mut update = ResponseMap::new();
        update.insert(correlation_id.to_string(), progress.clone());
        self.record(CallKind::Progress, &update)
    }
}

/// An engine on in-memory backends, with its backends exposed for
/// inspection. The queue records every published event.
pub struct MemoryEngine {
    pub engine: WaitNotifyEngine,
    pub store: Arc<MemoryWaitStore>,
    pub queue: Arc<MemoryNotifyQueue>,
    pub locks: Arc<MemoryLockService>,
}

impl MemoryEngine {
    pub fn new(callbacks: CallbackRegistry, config: EngineConfig) -> Self {
        Self::with_publishers(callbacks, config, std::iter::empty::<String>())
    }

    /// Like [`MemoryEngine::new`], accepting waits on extra publishers.
    pub fn with_publishers<I, S>(callbacks: CallbackRegistry, config: EngineConfig, publishers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Arc::new(MemoryWaitStore::new());
        let queue = Arc::new(MemoryNotifyQueue::recording());
        let locks = Arc::new(MemoryLockService::default());

        let mut builder = WaitNotifyEngine::builder(store.clone(), queue.clone(), locks.clone())
            .with_callbacks(callbacks)
            .with_config(config);
        for publisher in publishers {
            builder = builder.with_publisher(publisher);
        }
        let engine = builder.build();

        Self {
            engine,
            store,
            queue,
            locks,
        }
    }

    /// An engine with a single in-process callback registered under `callback_type`.
    pub fn with_callback(callback_type: &'static str, callback: RecordingCallback) -> Self {
        let mut callbacks = CallbackRegistry::new();
        callbacks.register_instance(callback_type, Arc::new(callback));
        Self::new(callbacks, EngineConfig::default())
    }

    /// Dispatch queued events on every topic until the queue is empty,
    /// acknowledging each. Returns every outcome in processing order.
    pub async fn drain(&self) -> Vec<DispatchOutcome> {
        let dispatcher = self.engine.dispatcher();
        let mut outcomes = Vec::new();

        loop {
            let mut claimed = Vec::new();
            for topic in self.queue.topics() {
                if let Ok(batch) = self.queue.claim(&topic, "test-drain", 100).await {
                    claimed.extend(batch);
                }
            }
            if claimed.is_empty() {
                break;
            }
            for message in claimed {
                outcomes.push(dispatcher.handle(&message.event).await);
                let _ = self.queue.ack(message.message_id).await;
            }
        }

        outcomes
    }
}
