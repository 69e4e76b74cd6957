//! Inner AI API server

use std::sync::Arc;

use anyhow::Context;
use innerai_api::{create_router, AppState, Config};
use innerai_billing::{BillingService, PgBillingStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,innerai_api=debug,innerai_billing=debug,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    let config = Config::from_env().context("invalid configuration")?;
    init_tracing(config.log_json);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Inner AI API");

    let pool = innerai_shared::create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("failed to connect to database")?;

    if config.run_migrations {
        tracing::info!("Running migrations...");
        let migration_pool = innerai_shared::create_migration_pool(&config.database_url)
            .await
            .context("failed to open migration connection")?;
        innerai_shared::run_migrations(&migration_pool)
            .await
            .context("failed to run migrations")?;
        migration_pool.close().await;
    }

    let billing = BillingService::new(config.billing.clone(), Arc::new(PgBillingStore::new(pool)))
        .context("failed to initialise billing")?;

    tracing::info!(
        mercadopago = billing.mercadopago.is_some(),
        stripe = billing.stripe.is_some(),
        billing_enabled = config.enable_billing,
        "Billing webhooks configured"
    );

    let bind_address = config.bind_address.clone();
    let app = create_router(AppState::new(config, billing));

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    tracing::info!(address = %bind_address, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
