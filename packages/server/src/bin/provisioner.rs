// Reconciliation worker entrypoint: claim loop plus stale-job reaper.

use std::sync::Arc;

use anyhow::{Context, Result};
use server_core::kernel::jobs::{PgJobStore, Reaper};
use server_core::kernel::provisioner::{PgProvisionerStore, Worker};
use server_core::kernel::runtime::DockerRuntime;
use server_core::Config;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("load configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("connect to database")?;

    let runtime = Arc::new(
        DockerRuntime::connect(config.docker_host.as_deref())
            .context("connect to container daemon")?,
    );
    let jobs = Arc::new(PgJobStore::new(pool.clone()));
    let store = Arc::new(PgProvisionerStore::new(pool.clone()));

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        signal_token.cancel();
    });

    let reaper = Reaper::new(Arc::clone(&jobs), config.stale_job_timeout);
    let reaper_shutdown = shutdown.clone();
    let reaper_handle = tokio::spawn(reaper.run(reaper_shutdown));

    let worker = Worker::new(
        jobs,
        store,
        runtime,
        config.worker_id.clone(),
        config.job_poll_interval,
    );
    worker.run(shutdown).await;

    let _ = reaper_handle.await;
    Ok(())
}
