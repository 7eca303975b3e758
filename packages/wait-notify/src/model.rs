//! Records the engine persists and the messages it moves between components.
//!
//! ```text
//! WaitInstance 1 ──── * WaitQueue * ──── 1 NotifyResponse
//!   (callback)          (instance, cid)       (cid, payload)
//! ```
//!
//! A `WaitQueue` row is a pending obligation: "instance X still needs the
//! completion of correlation id Y". A `NotifyResponse` is the completion
//! itself, stored at most once per correlation id.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::callback::CallbackSpec;

/// Responses keyed by correlation id, as handed to a callback.
pub type ResponseMap = BTreeMap<String, ResponsePayload>;

/// Topic every wait is routed on unless registered on another publisher.
pub const DEFAULT_PUBLISHER: &str = "general";
/// Topic for pipeline orchestration waits.
pub const ORCHESTRATION_PUBLISHER: &str = "orchestration";
/// Topic for next-generation pipeline orchestration waits.
pub const NG_ORCHESTRATION_PUBLISHER: &str = "ng_orchestration";

fn default_publisher() -> String {
    DEFAULT_PUBLISHER.to_string()
}

// =============================================================================
// Wait Status
// =============================================================================

/// Lifecycle of a [`WaitInstance`].
///
/// `New` moves to exactly one of the terminal states and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WaitStatus {
    /// Registered, callback not yet run.
    New,
    /// Callback ran and returned normally.
    Success,
    /// Callback failed, could not be resolved, or the wait timed out.
    Error,
}

impl WaitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitStatus::New => "NEW",
            WaitStatus::Success => "SUCCESS",
            WaitStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WaitStatus::New)
    }
}

impl fmt::Display for WaitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaitStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(WaitStatus::New),
            "SUCCESS" => Ok(WaitStatus::Success),
            "ERROR" => Ok(WaitStatus::Error),
            other => Err(anyhow!("unknown wait status: {}", other)),
        }
    }
}

// =============================================================================
// Wait Instance
// =============================================================================

/// One registered "wait for all of these correlation ids" request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitInstance {
    pub id: Uuid,
    /// Required correlation ids, duplicates removed, registration order kept.
    pub correlation_ids: Vec<String>,
    /// Which callback to run once every id has completed.
    pub callback: CallbackSpec,
    /// Queue topic that events for this wait are published on.
    #[serde(default = "default_publisher")]
    pub publisher: String,
    pub status: WaitStatus,
    /// Optional time budget for the whole wait.
    pub timeout: Option<Duration>,
    /// `created_at + timeout`, precomputed so the timeout sweep can query it.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WaitInstance {
    /// Create a fresh instance in `New` status.
    pub fn new(
        correlation_ids: Vec<String>,
        callback: CallbackSpec,
        timeout: Option<Duration>,
    ) -> Self {
        let created_at = Utc::now();
        let expires_at = timeout
            .and_then(|t| chrono::Duration::from_std(t).ok())
            .map(|t| created_at + t);

        Self {
            id: Uuid::now_v7(),
            correlation_ids,
            callback,
            publisher: default_publisher(),
            status: WaitStatus::New,
            timeout,
            expires_at,
            created_at,
        }
    }

    /// Route this wait's events on `publisher` instead of the default topic.
    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = publisher.into();
        self
    }

    /// Returns true if the instance has a deadline and `now` is past it.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

// =============================================================================
// Wait Queue
// =============================================================================

/// A pending (wait instance, correlation id) obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitQueue {
    pub id: Uuid,
    pub wait_instance_id: Uuid,
    pub correlation_id: String,
    /// Copied from the instance so fan-out can route without loading it.
    #[serde(default = "default_publisher")]
    pub publisher: String,
    pub created_at: DateTime<Utc>,
}

impl WaitQueue {
    pub fn new(wait_instance_id: Uuid, correlation_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            wait_instance_id,
            correlation_id: correlation_id.into(),
            publisher: default_publisher(),
            created_at: Utc::now(),
        }
    }

    /// An obligation row for `instance`, on the instance's publisher.
    pub fn for_instance(instance: &WaitInstance, correlation_id: impl Into<String>) -> Self {
        Self {
            publisher: instance.publisher.clone(),
            ..Self::new(instance.id, correlation_id)
        }
    }
}

// =============================================================================
// Response Payload
// =============================================================================

/// Error details carried by a failed unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Opaque completion payload.
///
/// The engine only ever asks [`ResponsePayload::is_error`]; everything else
/// is for the callback to interpret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ResponsePayload {
    Data(serde_json::Value),
    Text(String),
    List(Vec<serde_json::Value>),
    Error(ErrorResponse),
}

impl ResponsePayload {
    pub fn is_error(&self) -> bool {
        matches!(self, ResponsePayload::Error(_))
    }

    pub fn text(value: impl Into<String>) -> Self {
        ResponsePayload::Text(value.into())
    }

    pub fn error(message: impl Into<String>) -> Self {
        ResponsePayload::Error(ErrorResponse {
            message: message.into(),
            details: None,
        })
    }
}

// =============================================================================
// Notify Response
// =============================================================================

/// Whether a stored response has been handed to a callback yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Pending,
    Consumed,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Pending => "PENDING",
            ResponseStatus::Consumed => "CONSUMED",
        }
    }
}

impl FromStr for ResponseStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ResponseStatus::Pending),
            "CONSUMED" => Ok(ResponseStatus::Consumed),
            other => Err(anyhow!("unknown response status: {}", other)),
        }
    }
}

/// The stored completion result for one correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyResponse {
    /// Notification id handed back to the caller of `notify()`.
    pub id: Uuid,
    /// Unique key: at most one response per correlation id.
    pub correlation_id: String,
    pub payload: ResponsePayload,
    pub error: bool,
    pub status: ResponseStatus,
    pub created_at: DateTime<Utc>,
}

impl NotifyResponse {
    /// Create a pending response; the error flag is derived from the payload.
    pub fn new(correlation_id: impl Into<String>, payload: ResponsePayload) -> Self {
        Self {
            id: Uuid::now_v7(),
            correlation_id: correlation_id.into(),
            error: payload.is_error(),
            payload,
            status: ResponseStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Projection of a response used by the reconciliation sweep.
///
/// Ordered by `(created_at, correlation_id)`, which is also the sweep's
/// paging key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResponseHead {
    pub created_at: DateTime<Utc>,
    pub correlation_id: String,
}

// =============================================================================
// Progress Update
// =============================================================================

/// Intermediate progress reported for a correlation id that has not
/// completed yet. Delivered to waiting callbacks and then discarded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub id: Uuid,
    pub correlation_id: String,
    pub payload: ResponsePayload,
    pub created_at: DateTime<Utc>,
}

impl ProgressUpdate {
    pub fn new(correlation_id: impl Into<String>, payload: ResponsePayload) -> Self {
        Self {
            id: Uuid::now_v7(),
            correlation_id: correlation_id.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

// =============================================================================
// Notify Event
// =============================================================================

/// Why a [`NotifyEvent`] was published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// One or more correlation ids completed; check for completeness.
    #[default]
    Completion,
    /// The instance passed its deadline; finalize it as an error.
    Timeout,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Completion => "completion",
            EventKind::Timeout => "timeout",
        }
    }
}

impl FromStr for EventKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "completion" => Ok(EventKind::Completion),
            "timeout" => Ok(EventKind::Timeout),
            other => Err(anyhow!("unknown event kind: {}", other)),
        }
    }
}

/// Transport message asking the dispatcher to look at one wait instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyEvent {
    pub wait_instance_id: Uuid,
    /// Hint of the correlation ids known to have completed. Empty means "no
    /// hint"; a non-empty hint may still be partial.
    #[serde(default)]
    pub correlation_ids: Vec<String>,
    pub error: bool,
    #[serde(default)]
    pub kind: EventKind,
    /// Queue topic the event travels on.
    #[serde(default = "default_publisher")]
    pub publisher: String,
}

impl NotifyEvent {
    /// Eager-path event: no hint, error flag from the triggering response.
    pub fn completion(wait_instance_id: Uuid, error: bool) -> Self {
        Self {
            wait_instance_id,
            correlation_ids: Vec::new(),
            error,
            kind: EventKind::Completion,
            publisher: default_publisher(),
        }
    }

    /// Sweep-path event carrying every matched correlation id.
    pub fn with_hint(wait_instance_id: Uuid, correlation_ids: Vec<String>) -> Self {
        Self {
            wait_instance_id,
            correlation_ids,
            error: false,
            kind: EventKind::Completion,
            publisher: default_publisher(),
        }
    }

    pub fn timeout(wait_instance_id: Uuid) -> Self {
        Self {
            wait_instance_id,
            correlation_ids: Vec::new(),
            error: true,
            kind: EventKind::Timeout,
            publisher: default_publisher(),
        }
    }

    /// Send this event on `publisher` instead of the default topic.
    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = publisher.into();
        self
    }
}

// =============================================================================
// Wait Instance Error
// =============================================================================

/// Diagnostic snapshot written when a callback fails during finalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitInstanceError {
    pub id: Uuid,
    pub wait_instance_id: Uuid,
    pub responses: ResponseMap,
    pub error_message: String,
    /// Full error chain (or panic message) as rendered at capture time.
    pub stack_trace: String,
    pub created_at: DateTime<Utc>,
}

impl WaitInstanceError {
    pub fn new(
        wait_instance_id: Uuid,
        responses: ResponseMap,
        error_message: impl Into<String>,
        stack_trace: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            wait_instance_id,
            responses,
            error_message: error_message.into(),
            stack_trace: stack_trace.into(),
            created_at: Utc::now(),
        }
    }
}
