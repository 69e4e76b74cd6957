//! Health check endpoints

use std::time::Instant;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    pub healthy: bool,
    pub latency_ms: u128,
}

#[derive(Debug, Serialize)]
pub struct WebhookHealth {
    pub mercadopago: bool,
    pub stripe: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: DatabaseHealth,
    pub webhooks: WebhookHealth,
}

async fn check_database(state: &AppState) -> DatabaseHealth {
    let started = Instant::now();
    let healthy = match state.billing.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Database health check failed");
            false
        }
    };
    DatabaseHealth {
        healthy,
        latency_ms: started.elapsed().as_millis(),
    }
}

/// GET /health: dependency report, 503 when the database is unreachable
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = check_database(&state).await;
    let (status, label) = if database.healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        status,
        Json(HealthResponse {
            status: label,
            version: env!("CARGO_PKG_VERSION"),
            database,
            webhooks: WebhookHealth {
                mercadopago: state.billing.mercadopago.is_some(),
                stripe: state.billing.stripe.is_some(),
            },
        }),
    )
}

/// GET /health/live
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if check_database(&state).await.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
