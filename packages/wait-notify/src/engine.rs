//! Engine facade wiring the registry, publisher, sweepers and dispatcher to
//! one set of backends.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::callback::{CallbackRegistry, CallbackSpec};
use crate::config::EngineConfig;
use crate::dispatcher::CompletionDispatcher;
use crate::error::Result;
use crate::lock::LockService;
use crate::model::ResponsePayload;
use crate::progress::ProgressUpdateService;
use crate::publisher::CompletionPublisher;
use crate::queue::NotifyQueue;
use crate::registry::WaitRegistry;
use crate::store::WaitStore;
use crate::sweeper::ReconciliationSweeper;
use crate::worker::{DispatchWorker, WorkerConfig};

/// One handle on the whole wait/notify engine.
///
/// Cheap to clone; all components are shared.
#[derive(Clone)]
pub struct WaitNotifyEngine {
    registry: WaitRegistry,
    publisher: Arc<CompletionPublisher>,
    sweeper: Arc<ReconciliationSweeper>,
    progress: Arc<ProgressUpdateService>,
    dispatcher: Arc<CompletionDispatcher>,
    queue: Arc<dyn NotifyQueue>,
    config: EngineConfig,
}

impl WaitNotifyEngine {
    pub fn builder(
        store: Arc<dyn WaitStore>,
        queue: Arc<dyn NotifyQueue>,
        locks: Arc<dyn LockService>,
    ) -> WaitNotifyEngineBuilder {
        WaitNotifyEngineBuilder {
            store,
            queue,
            locks,
            callbacks: CallbackRegistry::new(),
            publishers: BTreeSet::new(),
            config: EngineConfig::default(),
        }
    }

    /// See [`WaitRegistry::wait_for_all`].
    pub async fn wait_for_all<I, S>(
        &self,
        timeout: Option<Duration>,
        callback: CallbackSpec,
        correlation_ids: I,
    ) -> Result<Uuid>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry
            .wait_for_all(timeout, callback, correlation_ids)
            .await
    }

    /// See [`WaitRegistry::wait_for_all_on`].
    pub async fn wait_for_all_on<I, S>(
        &self,
        publisher: &str,
        timeout: Option<Duration>,
        callback: CallbackSpec,
        correlation_ids: I,
    ) -> Result<Uuid>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.registry
            .wait_for_all_on(publisher, timeout, callback, correlation_ids)
            .await
    }

    /// See [`CompletionPublisher::notify`].
    pub async fn notify(&self, correlation_id: &str, payload: ResponsePayload) -> Option<Uuid> {
        self.publisher.notify(correlation_id, payload).await
    }

    /// See [`CompletionPublisher::update_progress`].
    pub async fn update_progress(
        &self,
        correlation_id: &str,
        payload: ResponsePayload,
    ) -> Option<Uuid> {
        self.publisher.update_progress(correlation_id, payload).await
    }

    pub fn registry(&self) -> &WaitRegistry {
        &self.registry
    }

    pub fn sweeper(&self) -> Arc<ReconciliationSweeper> {
        self.sweeper.clone()
    }

    pub fn progress(&self) -> Arc<ProgressUpdateService> {
        self.progress.clone()
    }

    pub fn dispatcher(&self) -> Arc<CompletionDispatcher> {
        self.dispatcher.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A new queue consumer sharing this engine's dispatcher.
    pub fn worker(&self, config: WorkerConfig) -> DispatchWorker {
        DispatchWorker::new(self.queue.clone(), self.dispatcher.clone(), config)
    }
}

/// Builder for [`WaitNotifyEngine`].
pub struct WaitNotifyEngineBuilder {
    store: Arc<dyn WaitStore>,
    queue: Arc<dyn NotifyQueue>,
    locks: Arc<dyn LockService>,
    callbacks: CallbackRegistry,
    publishers: BTreeSet<String>,
    config: EngineConfig,
}

impl WaitNotifyEngineBuilder {
    /// Callbacks that stored waits may name.
    pub fn with_callbacks(mut self, callbacks: CallbackRegistry) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Accept waits on `publisher` in addition to the default topic. Each
    /// publisher needs its own workers (see [`WorkerConfig::topic`]).
    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publishers.insert(publisher.into());
        self
    }

    pub fn build(self) -> WaitNotifyEngine {
        let registry = WaitRegistry::with_publishers(self.store.clone(), self.publishers);
        let callbacks = Arc::new(self.callbacks);
        let publisher = Arc::new(CompletionPublisher::new(
            self.store.clone(),
            self.queue.clone(),
            &self.config,
        ));
        let sweeper = Arc::new(ReconciliationSweeper::new(
            self.store.clone(),
            self.queue.clone(),
            self.locks.clone(),
            self.config.clone(),
        ));
        let progress = Arc::new(ProgressUpdateService::new(
            self.store.clone(),
            self.locks.clone(),
            callbacks.clone(),
            self.config.clone(),
        ));
        let dispatcher = Arc::new(CompletionDispatcher::new(
            self.store,
            self.locks,
            callbacks,
            self.config.clone(),
        ));

        WaitNotifyEngine {
            registry,
            publisher,
            sweeper,
            progress,
            dispatcher,
            queue: self.queue,
            config: self.config,
        }
    }
}
