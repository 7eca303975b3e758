//! Registration of waits.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::callback::CallbackSpec;
use crate::error::{Result, WaitNotifyError};
use crate::model::{WaitInstance, WaitQueue, DEFAULT_PUBLISHER};
use crate::store::WaitStore;

/// Registers interest in a set of correlation ids.
#[derive(Clone)]
pub struct WaitRegistry {
    store: Arc<dyn WaitStore>,
    /// Topics a wait may be registered on. Always includes the default.
    publishers: Arc<BTreeSet<String>>,
}

impl WaitRegistry {
    /// A registry that only knows the default publisher.
    pub fn new(store: Arc<dyn WaitStore>) -> Self {
        Self::with_publishers(store, std::iter::empty::<String>())
    }

    /// A registry that accepts the default publisher plus `publishers`.
    pub fn with_publishers<I, S>(store: Arc<dyn WaitStore>, publishers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut known: BTreeSet<String> = publishers.into_iter().map(Into::into).collect();
        known.insert(DEFAULT_PUBLISHER.to_string());
        Self {
            store,
            publishers: Arc::new(known),
        }
    }

    /// Every publisher topic waits can be routed on, sorted.
    pub fn publishers(&self) -> impl Iterator<Item = &str> {
        self.publishers.iter().map(String::as_str)
    }

    /// Register a wait that fires `callback` once every id has completed.
    ///
    /// Each call creates an independent wait, even for an id set that is
    /// already being waited on. Duplicate ids within one call collapse.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if no ids are given or an id is blank
    /// - `Store` if the instance or its obligations could not be persisted
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
        self.wait_for_all_on(DEFAULT_PUBLISHER, timeout, callback, correlation_ids)
            .await
    }

    /// Like [`WaitRegistry::wait_for_all`], but every event for the wait is
    /// published on `publisher` and only consumers of that topic handle it.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` if `publisher` is not registered, no ids are
    ///   given, or an id is blank
    /// - `Store` if the instance or its obligations could not be persisted
    #[instrument(skip_all, fields(publisher = %publisher, callback_type = %callback.callback_type))]
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
        if !self.publishers.contains(publisher) {
            return Err(WaitNotifyError::invalid_argument(format!(
                "unknown publisher: {}",
                publisher
            )));
        }
        let ids = normalize_ids(correlation_ids)?;

        let instance = WaitInstance::new(ids, callback, timeout).with_publisher(publisher);
        let queues: Vec<WaitQueue> = instance
            .correlation_ids
            .iter()
            .map(|cid| WaitQueue::for_instance(&instance, cid.clone()))
            .collect();

        self.store.insert_wait_instance(&instance, &queues).await?;

        debug!(
            wait_instance_id = %instance.id,
            publisher = %instance.publisher,
            correlation_ids = ?instance.correlation_ids,
            "wait registered"
        );
        Ok(instance.id)
    }
}

/// Drop duplicates (first occurrence wins) and reject empty input.
fn normalize_ids<I, S>(correlation_ids: I) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for id in correlation_ids {
        let id: String = id.into();
        if id.trim().is_empty() {
            return Err(WaitNotifyError::invalid_argument(
                "correlation ids must not be blank",
            ));
        }
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }

    if ids.is_empty() {
        return Err(WaitNotifyError::invalid_argument(
            "at least one correlation id is required",
        ));
    }
    Ok(ids)
}
