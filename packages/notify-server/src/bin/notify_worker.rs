//! Notify Worker
//!
//! Runs dispatch workers against the shared notify queue, plus the
//! reconciliation and timeout sweeps, until Ctrl-C.

use anyhow::{Context, Result};
use notify_server::{build_registry, callbacks, start_scheduler, Config, ServerKernel};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wait_notify=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting notify worker");

    let config = Config::from_env().context("Failed to load configuration")?;
    callbacks::configure_http_client(config.webhook_timeout)?;

    let kernel = ServerKernel::connect(&config, build_registry()).await?;

    let shutdown = CancellationToken::new();
    let mut workers = Vec::with_capacity(config.publishers.len() * config.worker_concurrency);
    for topic in &config.publishers {
        for index in 0..config.worker_concurrency {
            let worker = kernel.engine.worker(config.worker_config(topic, index));
            let token = shutdown.clone();
            workers.push(tokio::spawn(async move { worker.run(token).await }));
        }
    }

    let mut scheduler = start_scheduler(kernel.engine.clone(), &config).await?;

    tracing::info!(
        workers = workers.len(),
        publishers = ?config.publishers,
        lock_pool_size = config.lock_pool_size,
        worker_id = %config.worker_id,
        "Notify worker running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    shutdown.cancel();
    if let Err(e) = scheduler.shutdown().await {
        tracing::warn!("Scheduler shutdown failed: {}", e);
    }

    for handle in workers {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Worker exited with error: {}", e),
            Err(e) => tracing::error!("Worker task panicked: {}", e),
        }
    }

    kernel.db_pool.close().await;
    kernel.lock_pool.close().await;
    tracing::info!("Notify worker stopped");
    Ok(())
}
