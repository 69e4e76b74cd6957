//! Billing configuration

use time::Duration;

use crate::error::{BillingError, BillingResult};
use crate::provider::MERCADOPAGO_API_URL;
use crate::signature::SIGNATURE_TOLERANCE;

/// Payment processor credentials and webhook settings
#[derive(Clone)]
pub struct BillingConfig {
    /// MercadoPago webhook signing secret; MercadoPago webhooks are disabled when unset
    pub mercadopago_webhook_secret: Option<String>,
    /// MercadoPago access token used to re-fetch payments
    pub mercadopago_access_token: Option<String>,
    pub mercadopago_api_url: String,
    /// Trust the payment embedded in the notification instead of re-fetching it
    pub mercadopago_trust_embedded: bool,
    /// Stripe webhook signing secret (`whsec_...`); Stripe webhooks are disabled when unset
    pub stripe_webhook_secret: Option<String>,
    pub signature_tolerance: Duration,
}

impl std::fmt::Debug for BillingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("BillingConfig")
            .field("mercadopago_webhook_secret", &redact(&self.mercadopago_webhook_secret))
            .field("mercadopago_access_token", &redact(&self.mercadopago_access_token))
            .field("mercadopago_api_url", &self.mercadopago_api_url)
            .field("mercadopago_trust_embedded", &self.mercadopago_trust_embedded)
            .field("stripe_webhook_secret", &redact(&self.stripe_webhook_secret))
            .field("signature_tolerance", &self.signature_tolerance)
            .finish()
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            mercadopago_webhook_secret: None,
            mercadopago_access_token: None,
            mercadopago_api_url: MERCADOPAGO_API_URL.to_string(),
            mercadopago_trust_embedded: false,
            stripe_webhook_secret: None,
            signature_tolerance: SIGNATURE_TOLERANCE,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl BillingConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let tolerance_secs = match non_empty_env("WEBHOOK_SIGNATURE_TOLERANCE_SECS") {
            Some(v) => v.parse::<i64>().map_err(|_| {
                BillingError::Config(format!("WEBHOOK_SIGNATURE_TOLERANCE_SECS is not a number: {}", v))
            })?,
            None => SIGNATURE_TOLERANCE.whole_seconds(),
        };

        let config = Self {
            mercadopago_webhook_secret: non_empty_env("MERCADOPAGO_WEBHOOK_SECRET"),
            mercadopago_access_token: non_empty_env("MERCADOPAGO_ACCESS_TOKEN"),
            mercadopago_api_url: non_empty_env("MERCADOPAGO_API_URL")
                .unwrap_or_else(|| MERCADOPAGO_API_URL.to_string()),
            mercadopago_trust_embedded: non_empty_env("MERCADOPAGO_TRUST_EMBEDDED")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            stripe_webhook_secret: non_empty_env("STRIPE_WEBHOOK_SECRET"),
            signature_tolerance: Duration::seconds(tolerance_secs),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BillingResult<()> {
        if self.signature_tolerance <= Duration::ZERO {
            return Err(BillingError::Config(
                "webhook signature tolerance must be positive".to_string(),
            ));
        }
        if self.mercadopago_webhook_secret.is_some()
            && !self.mercadopago_trust_embedded
            && self.mercadopago_access_token.is_none()
        {
            return Err(BillingError::Config(
                "MERCADOPAGO_ACCESS_TOKEN is required to verify MercadoPago payments \
                 (or set MERCADOPAGO_TRUST_EMBEDDED=true)"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(BillingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_mercadopago_needs_token_unless_trusting() {
        let mut config = BillingConfig {
            mercadopago_webhook_secret: Some("secret".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(BillingError::Config(_))));

        config.mercadopago_trust_embedded = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = BillingConfig {
            stripe_webhook_secret: Some("whsec_live_abc".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("whsec_live_abc"));
        assert!(debug.contains("REDACTED"));
    }
}
