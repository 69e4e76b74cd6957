//! Billing error types

use innerai_shared::{PlanTier, UserId};
use thiserror::Error;

use crate::usage::LimitKind;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Webhook signature header missing")]
    WebhookSignatureMissing,

    #[error("Webhook signature header malformed: {0}")]
    WebhookSignatureMalformed(String),

    #[error("Webhook timestamp outside tolerance ({age_secs}s old)")]
    WebhookTimestampExpired { age_secs: i64 },

    #[error("Webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("Webhook payload invalid: {0}")]
    WebhookPayloadInvalid(String),

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Invalid plan tier: {0}")]
    InvalidTier(String),

    #[error("Model {model} is not available on the {tier} plan")]
    ModelNotAllowed { model: String, tier: PlanTier },

    #[error("{kind} limit reached ({used}/{limit}) on the {tier} plan")]
    UsageLimitExceeded {
        kind: LimitKind,
        used: u64,
        limit: u64,
        tier: PlanTier,
    },

    #[error("Insufficient credits. Required: {required}, Available: {available}")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Payment provider error: {0}")]
    Provider(String),

    #[error("Database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BillingError {
    /// Whether the error came from webhook authentication (maps to 401)
    pub fn is_signature_error(&self) -> bool {
        matches!(
            self,
            BillingError::WebhookSignatureMissing
                | BillingError::WebhookSignatureMalformed(_)
                | BillingError::WebhookTimestampExpired { .. }
                | BillingError::WebhookSignatureInvalid
        )
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                BillingError::DatabaseUnavailable(err.to_string())
            }
            _ => BillingError::Database(err.to_string()),
        }
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Provider(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
