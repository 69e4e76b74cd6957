// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Inner AI Billing Module
//!
//! Payment webhooks, plan activation and usage limits.
//!
//! ## Features
//!
//! - **Webhook Verification**: HMAC-SHA256 signatures with a replay window
//! - **Reconciliation**: Idempotent payment → subscription → plan activation
//! - **Usage Limits**: Per-plan model access, daily messages, monthly tokens
//! - **Credits**: Prepaid credit ledger
//! - **Expiry**: Downgrade lapsed subscriptions to the free plan

pub mod config;
pub mod credits;
pub mod error;
pub mod expiry;
pub mod provider;
pub mod reconcile;
pub mod signature;
pub mod store;
pub mod usage;
pub mod webhooks;

use std::sync::Arc;

// Config
pub use config::BillingConfig;

// Credits
pub use credits::{CreditGrant, CreditLedger, CreditPackage, CREDIT_PACKAGES};

// Error
pub use error::{BillingError, BillingResult};

// Expiry
pub use expiry::{ExpirySummary, SubscriptionExpiry};

// Provider
pub use provider::{MercadoPagoClient, PaymentLookup, ProviderPayment, ProviderStatus};

// Reconcile
pub use reconcile::{Activation, PaymentNotification, PaymentReconciler, ReconcileOutcome};

// Signature
pub use signature::{SignatureScheme, WebhookVerifier, SIGNATURE_TOLERANCE};

// Store
pub use store::{BillingStore, InMemoryBillingStore, PgBillingStore, UsageTotals};

// Usage
pub use usage::{
    LimitKind, LimitUsage, UsageDecision, UsageLimiter, UsageStats, UsageWindows,
    MAX_COST_MICROS_PER_CALL, MAX_TOKENS_PER_CALL,
};

// Webhooks
pub use webhooks::{MercadoPagoWebhook, PaymentSource, StripeWebhook, WebhookOutcome};

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub store: Arc<dyn BillingStore>,
    pub reconciler: PaymentReconciler,
    pub usage: UsageLimiter,
    pub credits: CreditLedger,
    pub expiry: SubscriptionExpiry,
    /// `None` when no MercadoPago webhook secret is configured
    pub mercadopago: Option<MercadoPagoWebhook>,
    /// `None` when no Stripe webhook secret is configured
    pub stripe: Option<StripeWebhook>,
}

impl BillingService {
    /// Create a Postgres-backed billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        Self::new(BillingConfig::from_env()?, Arc::new(PgBillingStore::new(pool)))
    }

    /// Create a billing service with explicit config and store
    pub fn new(config: BillingConfig, store: Arc<dyn BillingStore>) -> BillingResult<Self> {
        config.validate()?;
        let reconciler = PaymentReconciler::new(store.clone());

        let mercadopago = match &config.mercadopago_webhook_secret {
            Some(secret) => {
                let verifier = WebhookVerifier::new(SignatureScheme::MercadoPago, secret.clone())?
                    .with_tolerance(config.signature_tolerance);
                let source = match (&config.mercadopago_access_token, config.mercadopago_trust_embedded) {
                    (_, true) => PaymentSource::TrustEmbedded,
                    (Some(token), false) => PaymentSource::Lookup(Arc::new(MercadoPagoClient::new(
                        token.clone(),
                        config.mercadopago_api_url.clone(),
                    )?)),
                    (None, false) => {
                        return Err(BillingError::Config(
                            "MercadoPago access token missing".to_string(),
                        ))
                    }
                };
                Some(MercadoPagoWebhook::new(verifier, source, reconciler.clone())?)
            }
            None => {
                tracing::warn!("MERCADOPAGO_WEBHOOK_SECRET not set, MercadoPago webhooks disabled");
                None
            }
        };

        let credits = CreditLedger::new(store.clone());

        let stripe = match &config.stripe_webhook_secret {
            Some(secret) => {
                let verifier = WebhookVerifier::new(SignatureScheme::Stripe, secret.clone())?
                    .with_tolerance(config.signature_tolerance);
                Some(StripeWebhook::new(verifier, reconciler.clone(), credits.clone())?)
            }
            None => {
                tracing::warn!("STRIPE_WEBHOOK_SECRET not set, Stripe webhooks disabled");
                None
            }
        };

        Ok(Self {
            usage: UsageLimiter::new(store.clone()),
            credits,
            expiry: SubscriptionExpiry::new(store.clone()),
            reconciler,
            mercadopago,
            stripe,
            store,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhooks_enabled_by_secrets() {
        let store: Arc<dyn BillingStore> = Arc::new(InMemoryBillingStore::new());

        let service = BillingService::new(BillingConfig::default(), store.clone()).unwrap();
        assert!(service.mercadopago.is_none());
        assert!(service.stripe.is_none());

        let config = BillingConfig {
            mercadopago_webhook_secret: Some("mp".to_string()),
            mercadopago_trust_embedded: true,
            stripe_webhook_secret: Some("whsec_x".to_string()),
            ..Default::default()
        };
        let service = BillingService::new(config, store).unwrap();
        assert!(service.mercadopago.is_some());
        assert!(service.stripe.is_some());
    }
}
