//! Credit balance and ledger routes

use axum::{
    extract::{Query, State},
    Json,
};
use innerai_billing::CreditPackage;
use innerai_shared::CreditTransaction;
use serde::{Deserialize, Serialize};

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balance: i64,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub transactions: Vec<CreditTransaction>,
}

#[derive(Debug, Serialize)]
pub struct PackagesResponse {
    pub packages: &'static [CreditPackage],
}

#[derive(Debug, Deserialize)]
pub struct ConsumeCreditsRequest {
    pub amount: i64,
    pub description: String,
    #[serde(default)]
    pub reference_id: Option<String>,
}

/// GET /api/v1/credits/balance
pub async fn get_balance(
    State(state): State<AppState>,
    auth_user: AuthUser,
) -> ApiResult<Json<BalanceResponse>> {
    let balance = state.billing.credits.balance(auth_user.user_id).await?;
    Ok(Json(BalanceResponse { balance }))
}

/// GET /api/v1/credits/history?limit=&offset=
pub async fn get_history(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let transactions = state
        .billing
        .credits
        .history(auth_user.user_id, query.limit, query.offset)
        .await?;
    Ok(Json(HistoryResponse { transactions }))
}

/// GET /api/v1/credits/packages
pub async fn list_packages(State(state): State<AppState>) -> Json<PackagesResponse> {
    Json(PackagesResponse {
        packages: state.billing.credits.packages(),
    })
}

/// POST /api/v1/credits/consume
pub async fn consume_credits(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(req): Json<ConsumeCreditsRequest>,
) -> ApiResult<Json<BalanceResponse>> {
    let balance = state
        .billing
        .credits
        .consume(auth_user.user_id, req.amount, &req.description, req.reference_id)
        .await?;
    Ok(Json(BalanceResponse { balance }))
}
