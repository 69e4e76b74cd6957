//! Payment processor webhook endpoints
//!
//! The body is taken as raw text so the signature is checked over exactly
//! the bytes the processor signed.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use innerai_billing::WebhookOutcome;
use serde::Serialize;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

pub const MERCADOPAGO_SIGNATURE_HEADER: &str = "x-signature";
pub const STRIPE_SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    #[serde(flatten)]
    pub outcome: WebhookOutcome,
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// POST /api/v1/webhooks/mercadopago
pub async fn mercadopago(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<(StatusCode, Json<WebhookResponse>)> {
    let webhook = state
        .billing
        .mercadopago
        .as_ref()
        .ok_or(ApiError::NotFound)?;

    let outcome = webhook
        .handle(&body, header_value(&headers, MERCADOPAGO_SIGNATURE_HEADER))
        .await?;

    tracing::info!(outcome = ?outcome, "MercadoPago webhook processed");

    Ok((
        StatusCode::OK,
        Json(WebhookResponse {
            received: true,
            outcome,
        }),
    ))
}

/// POST /api/v1/webhooks/stripe
pub async fn stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<(StatusCode, Json<WebhookResponse>)> {
    let webhook = state.billing.stripe.as_ref().ok_or(ApiError::NotFound)?;

    let outcome = webhook
        .handle(&body, header_value(&headers, STRIPE_SIGNATURE_HEADER))
        .await?;

    tracing::info!(outcome = ?outcome, "Stripe webhook processed");

    Ok((
        StatusCode::OK,
        Json(WebhookResponse {
            received: true,
            outcome,
        }),
    ))
}
