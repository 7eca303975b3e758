//! Callback capabilities and the registry that revives them from storage.
//!
//! This module provides:
//! - [`NotifyCallback`] - The capability a wait fires once all its ids complete
//! - [`CallbackSpec`] - The stored description of which callback to run
//! - [`CallbackRegistry`] - Maps spec type names back to live callbacks
//! - [`CallbackResolveError`] - Explicit failure modes for resolution
//!
//! # Design Philosophy
//!
//! The engine owns the interface only. What a callback does (advance a
//! pipeline, post to a webhook, resume a workflow) belongs to the host that
//! registers it.
//!
//! # Example
//!
//! ```ignore
//! use wait_notify::{CallbackRegistry, CallbackSpec, NotifyCallback, ResponseMap};
//!
//! #[derive(Serialize, Deserialize)]
//! struct ResumeStep { execution_id: Uuid }
//!
//! #[async_trait]
//! impl NotifyCallback for ResumeStep {
//!     async fn notify(&self, responses: &ResponseMap) -> anyhow::Result<()> { /* ... */ }
//!     async fn notify_error(&self, responses: &ResponseMap) -> anyhow::Result<()> { /* ... */ }
//! }
//!
//! let mut registry = CallbackRegistry::new();
//! registry.register::<ResumeStep>("pipeline:resume-step", vec![1]);
//!
//! // At registration time, store the spec alongside the wait
//! let spec = CallbackSpec::with_payload("pipeline:resume-step", &ResumeStep { execution_id })?;
//! engine.wait_for_all(None, spec, ["task-1", "task-2"]).await?;
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::model::{ResponseMap, ResponsePayload};

/// The capability invoked when a wait finalizes.
///
/// Exactly one of `notify`, `notify_error` and `notify_timeout` runs, exactly
/// once per wait instance. Returning `Err` (or panicking) moves the wait to
/// `ERROR` and records a [`crate::WaitInstanceError`]; it is never retried.
///
/// `notify_progress` is separate: it may run any number of times while the
/// wait is still `NEW`, and its failures are only logged.
#[async_trait]
pub trait NotifyCallback: Send + Sync {
    /// Every correlation id completed and none of them reported an error.
    async fn notify(&self, responses: &ResponseMap) -> Result<()>;

    /// Every correlation id completed and at least one reported an error.
    async fn notify_error(&self, responses: &ResponseMap) -> Result<()>;

    /// The wait passed its deadline. `responses` holds only the ids that
    /// completed in time.
    async fn notify_timeout(&self, responses: &ResponseMap) -> Result<()> {
        self.notify_error(responses).await
    }

    /// Intermediate progress for one of the wait's correlation ids.
    async fn notify_progress(&self, _correlation_id: &str, _progress: &ResponsePayload) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Callback Spec
// =============================================================================

/// Serialized description of the callback a wait should run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackSpec {
    /// Registry key (e.g. `"webhook"`, `"pipeline:resume-step"`).
    pub callback_type: String,
    /// Payload schema version, checked against the registered versions.
    pub version: i32,
    pub payload: serde_json::Value,
}

impl CallbackSpec {
    /// A version-1 spec with no payload.
    pub fn new(callback_type: impl Into<String>) -> Self {
        Self {
            callback_type: callback_type.into(),
            version: 1,
            payload: serde_json::Value::Null,
        }
    }

    /// A version-1 spec carrying a serialized payload.
    pub fn with_payload<T: Serialize>(
        callback_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            callback_type: callback_type.into(),
            version: 1,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }
}

// =============================================================================
// Resolution
// =============================================================================

/// Resolution errors with explicit failure modes.
///
/// All of them are permanent: the dispatcher treats any of them as a failed
/// callback and moves the wait to `ERROR`.
#[derive(Debug, thiserror::Error)]
pub enum CallbackResolveError {
    /// No callback is registered under this type name.
    #[error("unknown callback type: {0}")]
    UnknownCallbackType(String),

    /// The spec version is not supported by the registered callback.
    #[error("unsupported version {version} for callback {callback_type}")]
    UnsupportedVersion {
        callback_type: String,
        version: i32,
    },

    /// The payload could not be turned into a callback.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] anyhow::Error),
}

/// Type-erased callback factory.
type CallbackFactory =
    Box<dyn Fn(&serde_json::Value) -> Result<Arc<dyn NotifyCallback>> + Send + Sync>;

struct RegisteredCallback {
    /// `None` accepts every version.
    supported_versions: Option<Vec<i32>>,
    factory: CallbackFactory,
}

/// Registry for turning stored [`CallbackSpec`]s back into callbacks.
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: HashMap<&'static str, RegisteredCallback>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a serializable callback type with supported versions.
    ///
    /// # Panics
    ///
    /// Panics if a callback is already registered for this type name.
    pub fn register<C>(&mut self, callback_type: &'static str, supported_versions: Vec<i32>)
    where
        C: NotifyCallback + DeserializeOwned + 'static,
    {
        let factory: CallbackFactory = Box::new(|payload: &serde_json::Value| {
            let callback: C = serde_json::from_value(payload.clone())
                .map_err(|e| anyhow::anyhow!("JSON deserialization failed: {}", e))?;
            Ok(Arc::new(callback) as Arc<dyn NotifyCallback>)
        });

        self.insert(
            callback_type,
            RegisteredCallback {
                supported_versions: Some(supported_versions),
                factory,
            },
        );
    }

    /// Register a shared, in-process callback instance.
    ///
    /// The spec payload is ignored and every version resolves to `callback`.
    ///
    /// # Panics
    ///
    /// Panics if a callback is already registered for this type name.
    pub fn register_instance(&mut self, callback_type: &'static str, callback: Arc<dyn NotifyCallback>) {
        let factory: CallbackFactory = Box::new(move |_: &serde_json::Value| Ok(Arc::clone(&callback)));
        self.insert(
            callback_type,
            RegisteredCallback {
                supported_versions: None,
                factory,
            },
        );
    }

    fn insert(&mut self, callback_type: &'static str, entry: RegisteredCallback) {
        if self.callbacks.contains_key(callback_type) {
            panic!("callback already registered for type: {}", callback_type);
        }
        self.callbacks.insert(callback_type, entry);
    }

    /// Resolve a stored spec to a live callback.
    ///
    /// # Errors
    ///
    /// - the type is not registered (`UnknownCallbackType`)
    /// - the version is not supported (`UnsupportedVersion`)
    /// - the payload cannot be deserialized (`InvalidPayload`)
    pub fn resolve(
        &self,
        spec: &CallbackSpec,
    ) -> Result<Arc<dyn NotifyCallback>, CallbackResolveError> {
        let entry = self
            .callbacks
            .get(spec.callback_type.as_str())
            .ok_or_else(|| CallbackResolveError::UnknownCallbackType(spec.callback_type.clone()))?;

        if let Some(versions) = &entry.supported_versions {
            if !versions.contains(&spec.version) {
                return Err(CallbackResolveError::UnsupportedVersion {
                    callback_type: spec.callback_type.clone(),
                    version: spec.version,
                });
            }
        }

        (entry.factory)(&spec.payload).map_err(CallbackResolveError::InvalidPayload)
    }

    pub fn has(&self, callback_type: &str) -> bool {
        self.callbacks.contains_key(callback_type)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("registered_types", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}
