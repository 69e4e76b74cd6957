//! Current plan and subscription

use axum::{extract::State, Json};
use innerai_shared::{models_for_tier, PlanLimits, PlanTier, Subscription};
use serde::Serialize;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub plan: PlanTier,
    pub limits: PlanLimits,
    pub models: Vec<&'static str>,
    pub subscription: Option<Subscription>,
}

/// GET /api/v1/subscription
pub async fn get_subscription(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Json<SubscriptionResponse>> {
    let store = &state.billing.store;
    let user = store
        .get_user(auth_user.user_id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let subscription = store.active_subscription(auth_user.user_id).await?;

    Ok(Json(SubscriptionResponse {
        plan: user.plan,
        limits: user.plan.limits(),
        models: models_for_tier(user.plan),
        subscription,
    }))
}
