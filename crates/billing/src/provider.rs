//! Payment provider lookups
//!
//! A MercadoPago notification only carries the payment id. The authoritative
//! status, amount and plan come from the payments API, fetched through
//! [`PaymentLookup`].

use std::time::Duration;

use async_trait::async_trait;
use innerai_shared::{BillingCycle, PlanTier, UserId};
use serde::Deserialize;

use crate::error::{BillingError, BillingResult};

/// MercadoPago API base URL
pub const MERCADOPAGO_API_URL: &str = "https://api.mercadopago.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Payment status as reported by the provider, collapsed to what billing acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Approved,
    Pending,
    Rejected,
    Unknown(String),
}

impl ProviderStatus {
    pub fn from_mercadopago(status: &str) -> Self {
        match status.trim().to_lowercase().as_str() {
            "approved" => Self::Approved,
            "pending" | "in_process" | "in_mediation" | "authorized" => Self::Pending,
            "rejected" | "cancelled" | "refunded" | "charged_back" => Self::Rejected,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// Provider payment resolved to billing terms
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPayment {
    pub external_id: String,
    pub status: ProviderStatus,
    pub user_id: UserId,
    pub plan: PlanTier,
    pub billing_cycle: BillingCycle,
    pub amount_cents: i64,
    pub currency: String,
}

/// Fetches a payment's current state from the provider
#[async_trait]
pub trait PaymentLookup: Send + Sync {
    async fn fetch_payment(&self, payment_id: &str) -> BillingResult<ProviderPayment>;
}

/// MercadoPago ids arrive as numbers in API responses and as strings in
/// some notification forms
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    Number(u64),
    Text(String),
}

impl ResourceId {
    pub fn into_string(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_string(),
        }
    }
}

/// Payment resource as returned by `GET /v1/payments/{id}`
#[derive(Debug, Deserialize)]
pub struct MercadoPagoPayment {
    pub id: ResourceId,
    pub status: String,
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(default)]
    pub transaction_amount: Option<f64>,
    #[serde(default)]
    pub currency_id: Option<String>,
    #[serde(default)]
    pub metadata: PaymentMetadata,
}

#[derive(Debug, Default, Deserialize)]
pub struct PaymentMetadata {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub billing_cycle: Option<String>,
}

/// `external_reference` set by checkout: either a bare user id or a JSON
/// object carrying the purchase
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CheckoutReference {
    user_id: String,
    #[serde(default)]
    plan_id: Option<String>,
    #[serde(default)]
    billing_cycle: Option<String>,
}

impl MercadoPagoPayment {
    pub fn into_provider_payment(self) -> BillingResult<ProviderPayment> {
        let external_id = self.id.into_string();

        let reference = self
            .external_reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        let checkout = reference.and_then(|r| serde_json::from_str::<CheckoutReference>(r).ok());

        let user_ref = match (&checkout, reference) {
            (Some(c), _) => Some(c.user_id.clone()),
            (None, Some(r)) => Some(r.to_string()),
            (None, None) => self.metadata.user_id.clone(),
        }
        .ok_or_else(|| {
            BillingError::WebhookPayloadInvalid(format!(
                "payment {} has no user reference",
                external_id
            ))
        })?;
        let user_id: UserId = user_ref.parse().map_err(|_| {
            BillingError::WebhookPayloadInvalid(format!(
                "payment {} references invalid user id: {}",
                external_id, user_ref
            ))
        })?;

        let plan_ref = checkout
            .as_ref()
            .and_then(|c| c.plan_id.clone())
            .or(self.metadata.plan_id)
            .ok_or_else(|| {
                BillingError::WebhookPayloadInvalid(format!("payment {} has no plan", external_id))
            })?;
        let plan: PlanTier = plan_ref.parse().map_err(BillingError::InvalidTier)?;

        let cycle_ref = checkout
            .and_then(|c| c.billing_cycle)
            .or(self.metadata.billing_cycle);
        let billing_cycle = BillingCycle::parse_or_default(cycle_ref.as_deref());

        let amount_cents = self
            .transaction_amount
            .map(|amount| (amount * 100.0).round() as i64)
            .unwrap_or(0);

        Ok(ProviderPayment {
            external_id,
            status: ProviderStatus::from_mercadopago(&self.status),
            user_id,
            plan,
            billing_cycle,
            amount_cents,
            currency: self.currency_id.unwrap_or_else(|| "BRL".to_string()),
        })
    }
}

/// Resolve a payment resource embedded in a notification body, for
/// deployments that trust the notification instead of re-fetching it
pub fn payment_from_embedded(resource: serde_json::Value) -> BillingResult<ProviderPayment> {
    let payment: MercadoPagoPayment = serde_json::from_value(resource).map_err(|e| {
        BillingError::WebhookPayloadInvalid(format!("embedded payment invalid: {}", e))
    })?;
    payment.into_provider_payment()
}

/// MercadoPago payments API client
#[derive(Clone)]
pub struct MercadoPagoClient {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl std::fmt::Debug for MercadoPagoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MercadoPagoClient")
            .field("base_url", &self.base_url)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl MercadoPagoClient {
    pub fn new(access_token: impl Into<String>, base_url: impl Into<String>) -> BillingResult<Self> {
        let access_token = access_token.into();
        if access_token.trim().is_empty() {
            return Err(BillingError::Config(
                "MercadoPago access token is empty".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BillingError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token,
        })
    }
}

#[async_trait]
impl PaymentLookup for MercadoPagoClient {
    async fn fetch_payment(&self, payment_id: &str) -> BillingResult<ProviderPayment> {
        if payment_id.is_empty() || !payment_id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(BillingError::WebhookPayloadInvalid(format!(
                "invalid payment id: {}",
                payment_id
            )));
        }

        let url = format!("{}/v1/payments/{}", self.base_url, payment_id);
        tracing::debug!(payment_id = %payment_id, "Fetching MercadoPago payment");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BillingError::Provider(format!(
                "MercadoPago payment {} not found",
                payment_id
            )));
        }
        if !status.is_success() {
            tracing::warn!(
                payment_id = %payment_id,
                status = %status,
                "MercadoPago payment lookup failed"
            );
            return Err(BillingError::Provider(format!(
                "MercadoPago returned {} for payment {}",
                status, payment_id
            )));
        }

        let payment: MercadoPagoPayment = response.json().await?;
        payment.into_provider_payment()
    }
}
