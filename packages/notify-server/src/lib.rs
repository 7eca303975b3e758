//! Postgres-backed host for the wait/notify engine: configuration, the
//! callbacks it can run, and the kernel the `notify_worker` binary starts.

pub mod callbacks;
pub mod config;
pub mod kernel;

pub use callbacks::{build_registry, WebhookCallback, WEBHOOK_CALLBACK};
pub use config::Config;
pub use kernel::{start_scheduler, ServerKernel};
