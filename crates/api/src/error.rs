//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use innerai_billing::BillingError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthorized,
    #[error("Invalid webhook signature")]
    InvalidSignature(String),

    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,

    // Usage and billing errors
    #[error("{0}")]
    ModelNotAllowed(String),
    #[error("{0}")]
    UsageLimitExceeded(String),
    #[error("{0}")]
    InsufficientCredits(String),

    // Upstream and internal errors
    #[error("Payment provider error")]
    Provider(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
    #[error("Service unavailable")]
    ServiceUnavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            ApiError::InvalidSignature(_) => (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE", self.to_string()),

            // Validation
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),

            // Usage and billing
            ApiError::ModelNotAllowed(msg) => (StatusCode::FORBIDDEN, "MODEL_NOT_ALLOWED", msg.clone()),
            ApiError::UsageLimitExceeded(msg) => (StatusCode::TOO_MANY_REQUESTS, "USAGE_LIMIT_EXCEEDED", msg.clone()),
            ApiError::InsufficientCredits(msg) => (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_CREDITS", msg.clone()),

            // Upstream and internal
            ApiError::Provider(_) => (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", self.to_string()),
            ApiError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR", "Database error".to_string()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string()),
            ApiError::ServiceUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", self.to_string()),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        if err.is_signature_error() {
            return ApiError::InvalidSignature(err.to_string());
        }
        match err {
            BillingError::WebhookPayloadInvalid(msg) => ApiError::BadRequest(msg),
            BillingError::InvalidTier(msg) | BillingError::InvalidAmount(msg) => {
                ApiError::Validation(msg)
            }
            BillingError::UserNotFound(_) => ApiError::NotFound,
            e @ BillingError::ModelNotAllowed { .. } => ApiError::ModelNotAllowed(e.to_string()),
            e @ BillingError::UsageLimitExceeded { .. } => {
                ApiError::UsageLimitExceeded(e.to_string())
            }
            e @ BillingError::InsufficientCredits { .. } => {
                ApiError::InsufficientCredits(e.to_string())
            }
            BillingError::Provider(msg) => {
                tracing::error!(error = %msg, "Payment provider error");
                ApiError::Provider(msg)
            }
            BillingError::DatabaseUnavailable(msg) => {
                tracing::error!(error = %msg, "Database unavailable");
                ApiError::ServiceUnavailable
            }
            BillingError::Database(msg) => {
                tracing::error!(error = %msg, "Database error");
                ApiError::Database(msg)
            }
            other => {
                tracing::error!(error = %other, "Billing error");
                ApiError::Internal
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
