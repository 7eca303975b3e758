//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! ```text
//! Scheduler (every SWEEP_INTERVAL_SECS)
//!     └─► ReconciliationSweeper::run_once()
//!             └─► hinted NotifyEvents + zombie response cleanup
//!
//! Scheduler (every TIMEOUT_SWEEP_INTERVAL_SECS)
//!     └─► ReconciliationSweeper::expire_once()
//!             └─► Timeout NotifyEvents for expired waits
//!
//! Scheduler (every PROGRESS_INTERVAL_SECS)
//!     └─► ProgressUpdateService::run_once()
//!             └─► notify_progress on NEW waits
//! ```
//!
//! All runs take a cluster-wide lock, so every node can schedule them.

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use wait_notify::WaitNotifyEngine;

use crate::config::Config;

/// Start all scheduled tasks
pub async fn start_scheduler(engine: WaitNotifyEngine, config: &Config) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let sweeper = engine.sweeper();
    let sweep_job = Job::new_repeated_async(config.sweep_interval, move |_uuid, _lock| {
        let sweeper = sweeper.clone();
        Box::pin(async move {
            let report = sweeper.run_once().await;
            if report.skipped {
                tracing::debug!("Reconciliation sweep skipped, lock held elsewhere");
            }
        })
    })?;

    scheduler.add(sweep_job).await?;

    let sweeper = engine.sweeper();
    let timeout_job = Job::new_repeated_async(config.timeout_sweep_interval, move |_uuid, _lock| {
        let sweeper = sweeper.clone();
        Box::pin(async move {
            let report = sweeper.expire_once().await;
            if report.expired > 0 {
                tracing::info!(
                    expired = report.expired,
                    events_published = report.events_published,
                    "Expired waits queued for timeout"
                );
            }
        })
    })?;

    scheduler.add(timeout_job).await?;

    let progress = engine.progress();
    let progress_job = Job::new_repeated_async(config.progress_interval, move |_uuid, _lock| {
        let progress = progress.clone();
        Box::pin(async move {
            let report = progress.run_once().await;
            if report.callbacks_failed > 0 {
                tracing::warn!(
                    failed = report.callbacks_failed,
                    "Some progress callbacks failed"
                );
            }
        })
    })?;

    scheduler.add(progress_job).await?;
    scheduler.start().await?;

    tracing::info!(
        sweep_interval_secs = config.sweep_interval.as_secs(),
        timeout_interval_secs = config.timeout_sweep_interval.as_secs(),
        progress_interval_secs = config.progress_interval.as_secs(),
        "Scheduled tasks started"
    );
    Ok(scheduler)
}
