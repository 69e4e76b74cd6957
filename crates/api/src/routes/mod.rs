//! API routes

pub mod credits;
pub mod health;
pub mod subscription;
pub mod usage;
pub mod webhooks;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, state::AppState};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Public API routes (no session) - under /api/v1
    let mut public_api_routes =
        Router::new().route("/credits/packages", get(credits::list_packages));

    // Webhooks authenticate by signature; mounted only for configured processors
    if state.config.enable_billing {
        if state.billing.mercadopago.is_some() {
            public_api_routes =
                public_api_routes.route("/webhooks/mercadopago", post(webhooks::mercadopago));
        }
        if state.billing.stripe.is_some() {
            public_api_routes = public_api_routes.route("/webhooks/stripe", post(webhooks::stripe));
        }
    }

    // Protected API routes (session required) - under /api/v1
    let protected_api_routes = Router::new()
        .route("/usage/check", post(usage::check_usage))
        .route("/usage", post(usage::record_usage))
        .route("/usage/stats", get(usage::get_usage_stats))
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/history", get(credits::get_history))
        .route("/credits/consume", post(credits::consume_credits))
        .route("/subscription", get(subscription::get_subscription))
        .layer(middleware::from_fn_with_state(auth_state, require_auth));

    let api_v1_routes = Router::new()
        .merge(public_api_routes)
        .merge(protected_api_routes);

    let cors = cors_layer(&state.config.cors_allowed_origins);

    Router::new()
        .merge(health_routes)
        .nest("/api/v1", api_v1_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(DefaultBodyLimit::max(1024 * 1024)),
        )
        .with_state(state)
}
