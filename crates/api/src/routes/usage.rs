//! Usage limit and recording routes

use axum::{extract::State, http::StatusCode, Json};
use innerai_billing::{UsageDecision, UsageStats};
use innerai_shared::UsageRecord;
use serde::Deserialize;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct CheckUsageRequest {
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordUsageRequest {
    pub model: String,
    #[serde(default)]
    pub input_tokens: i64,
    #[serde(default)]
    pub output_tokens: i64,
    #[serde(default)]
    pub cost_micros: i64,
}

/// POST /api/v1/usage/check
///
/// 200 with the decision when the call may proceed, 429 when a limit is
/// reached, 403 when the model is outside the plan.
pub async fn check_usage(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(req): Json<CheckUsageRequest>,
) -> ApiResult<Json<UsageDecision>> {
    let decision = state
        .billing
        .usage
        .enforce(auth_user.user_id, req.model.as_deref())
        .await?;
    Ok(Json(decision))
}

/// POST /api/v1/usage
pub async fn record_usage(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(req): Json<RecordUsageRequest>,
) -> ApiResult<(StatusCode, Json<UsageRecord>)> {
    let record = state
        .billing
        .usage
        .record(
            auth_user.user_id,
            &req.model,
            req.input_tokens,
            req.output_tokens,
            req.cost_micros,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/v1/usage/stats
pub async fn get_usage_stats(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Json<UsageStats>> {
    let stats = state.billing.usage.stats(auth_user.user_id).await?;
    Ok(Json(stats))
}
