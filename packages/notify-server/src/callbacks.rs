//! Callbacks this host knows how to run.
//!
//! Waits registered against this worker store a [`CallbackSpec`] naming one
//! of the types below. The spec payload is the callback itself, so any node
//! can rebuild it after a restart.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use wait_notify::{CallbackRegistry, CallbackSpec, NotifyCallback, ResponseMap};

pub const WEBHOOK_CALLBACK: &str = "webhook";

static HTTP_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Set the timeout used by every webhook delivery in this process.
///
/// Only the first call has an effect.
pub fn configure_http_client(timeout: Duration) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build webhook HTTP client")?;
    let _ = HTTP_CLIENT.set(client);
    Ok(())
}

fn http_client() -> reqwest::Client {
    HTTP_CLIENT.get_or_init(reqwest::Client::new).clone()
}

/// Outcome reported to the webhook receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    Completed,
    Failed,
    TimedOut,
}

/// Body POSTed to the webhook URL.
#[derive(Debug, Serialize)]
pub struct WebhookBody<'a> {
    pub outcome: WebhookOutcome,
    #[serde(skip_serializing_if = "is_null")]
    pub context: &'a serde_json::Value,
    pub responses: &'a ResponseMap,
}

fn is_null(value: &&serde_json::Value) -> bool {
    value.is_null()
}

/// POSTs the collected responses to a URL once the wait finalizes.
///
/// A non-2xx answer fails the callback, which moves the wait to ERROR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookCallback {
    pub url: String,
    /// Opaque caller data echoed back in the body.
    #[serde(default)]
    pub context: serde_json::Value,
    #[serde(skip, default = "http_client")]
    client: reqwest::Client,
}

impl WebhookCallback {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            context: serde_json::Value::Null,
            client: http_client(),
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// The spec to pass to `wait_for_all`.
    pub fn spec(&self) -> Result<CallbackSpec> {
        CallbackSpec::with_payload(WEBHOOK_CALLBACK, self).context("Failed to serialize webhook")
    }

    async fn deliver(&self, outcome: WebhookOutcome, responses: &ResponseMap) -> Result<()> {
        let body = WebhookBody {
            outcome,
            context: &self.context,
            responses,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Webhook request to {} failed", self.url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Webhook {} returned {}", self.url, status);
        }

        debug!(url = %self.url, ?outcome, "webhook delivered");
        Ok(())
    }
}

#[async_trait]
impl NotifyCallback for WebhookCallback {
    async fn notify(&self, responses: &ResponseMap) -> Result<()> {
        self.deliver(WebhookOutcome::Completed, responses).await
    }

    async fn notify_error(&self, responses: &ResponseMap) -> Result<()> {
        self.deliver(WebhookOutcome::Failed, responses).await
    }

    async fn notify_timeout(&self, responses: &ResponseMap) -> Result<()> {
        self.deliver(WebhookOutcome::TimedOut, responses).await
    }
}

/// Registry with every callback type this host serves.
pub fn build_registry() -> CallbackRegistry {
    let mut registry = CallbackRegistry::new();
    registry.register::<WebhookCallback>(WEBHOOK_CALLBACK, vec![1]);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use wait_notify::ResponsePayload;

    #[test]
    fn test_webhook_spec_resolves_from_registry() {
        let webhook = WebhookCallback::new("http://localhost:9/hook")
            .with_context(serde_json::json!({ "job": 7 }));
        let spec = webhook.spec().unwrap();

        assert_eq!(spec.callback_type, WEBHOOK_CALLBACK);
        assert_eq!(spec.payload["url"], "http://localhost:9/hook");
        assert_eq!(spec.payload["context"]["job"], 7);
        assert!(build_registry().resolve(&spec).is_ok());
    }

    #[test]
    fn test_webhook_spec_requires_url() {
        let spec = CallbackSpec::with_payload(WEBHOOK_CALLBACK, &serde_json::json!({})).unwrap();
        assert!(build_registry().resolve(&spec).is_err());
    }

    #[test]
    fn test_webhook_body_shape() {
        let responses = ResponseMap::from([("a".to_string(), ResponsePayload::text("A"))]);
        let body = WebhookBody {
            outcome: WebhookOutcome::TimedOut,
            context: &serde_json::Value::Null,
            responses: &responses,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["outcome"], "timed_out");
        assert!(json.get("context").is_none());
        assert!(json["responses"].get("a").is_some());
    }

    #[tokio::test]
    async fn test_unreachable_webhook_fails_callback() {
        // Port 9 (discard) is not listening in test environments.
        let webhook = WebhookCallback::new("http://127.0.0.1:9/hook");
        let result = webhook.notify(&ResponseMap::new()).await;
        assert!(result.is_err());
    }
}
