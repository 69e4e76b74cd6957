#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Inner AI background worker
//!
//! Runs scheduled billing maintenance against the shared database.

mod expiry_job;

use std::sync::Arc;

use anyhow::Context;
use innerai_billing::{PgBillingStore, SubscriptionExpiry};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::expiry_job::{run_expiry_sweep, DEFAULT_EXPIRY_CRON};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,innerai_worker=debug,innerai_billing=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }
    init_tracing();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(5);
    let expiry_cron =
        std::env::var("EXPIRY_CRON").unwrap_or_else(|_| DEFAULT_EXPIRY_CRON.to_string());

    let pool = innerai_shared::create_pool(&database_url, max_connections)
        .await
        .context("failed to connect to database")?;
    let expiry = SubscriptionExpiry::new(Arc::new(PgBillingStore::new(pool)));

    tracing::info!(cron = %expiry_cron, "Starting Inner AI worker");

    // Catch up on anything that lapsed while the worker was down
    run_expiry_sweep(&expiry).await;

    let mut scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow::anyhow!("failed to create scheduler: {:?}", e))?;

    let job_expiry = expiry.clone();
    let job = Job::new_async(expiry_cron.as_str(), move |_id, _scheduler| {
        let expiry = job_expiry.clone();
        Box::pin(async move {
            run_expiry_sweep(&expiry).await;
        })
    })
    .map_err(|e| anyhow::anyhow!("invalid EXPIRY_CRON '{}': {:?}", expiry_cron, e))?;

    scheduler
        .add(job)
        .await
        .map_err(|e| anyhow::anyhow!("failed to schedule expiry job: {:?}", e))?;
    scheduler
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start scheduler: {:?}", e))?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received, stopping worker");

    scheduler
        .shutdown()
        .await
        .map_err(|e| anyhow::anyhow!("failed to stop scheduler: {:?}", e))?;
    Ok(())
}
