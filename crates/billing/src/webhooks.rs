//! Payment webhook receivers
//!
//! Each receiver authenticates the raw body before parsing anything, then
//! turns the notification into a [`PaymentNotification`] for the reconciler.
//! Handlers are safe to call repeatedly with the same delivery.

use std::collections::HashMap;
use std::sync::Arc;

use innerai_shared::{BillingCycle, PaymentProvider, PaymentStatus, PlanTier, UserId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::credits::{CreditGrant, CreditLedger};
use crate::error::{BillingError, BillingResult};
use crate::provider::{payment_from_embedded, PaymentLookup, ProviderPayment, ProviderStatus, ResourceId};
use crate::reconcile::{PaymentNotification, PaymentReconciler, ReconcileOutcome};
use crate::signature::{SignatureScheme, WebhookVerifier};

/// What a webhook delivery did, reported back to the processor's caller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// State changed: plan activated, extended or cancelled
    Applied {
        plan: PlanTier,
        #[serde(with = "time::serde::rfc3339::option")]
        expires_at: Option<OffsetDateTime>,
    },
    /// Already processed; nothing changed
    Duplicate,
    /// Payment status stored without touching the subscription
    Recorded { status: PaymentStatus },
    /// Prepaid credits added to the balance
    Credited { credits: i64, balance: i64 },
    /// Acknowledged but not actionable
    Ignored { reason: String },
}

impl WebhookOutcome {
    fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }
}

impl From<CreditGrant> for WebhookOutcome {
    fn from(grant: CreditGrant) -> Self {
        match grant {
            CreditGrant::Granted { credits, balance } => Self::Credited { credits, balance },
            CreditGrant::Duplicate => Self::Duplicate,
        }
    }
}

impl From<ReconcileOutcome> for WebhookOutcome {
    fn from(outcome: ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Activated { activation } => Self::Applied {
                plan: activation.plan(),
                expires_at: Some(activation.expires_at()),
            },
            ReconcileOutcome::Cancelled { .. } => Self::Applied {
                plan: PlanTier::Free,
                expires_at: None,
            },
            ReconcileOutcome::Duplicate => Self::Duplicate,
            ReconcileOutcome::Recorded { status } => Self::Recorded { status },
            ReconcileOutcome::Ignored { reason } => Self::Ignored { reason },
        }
    }
}

// =============================================================================
// MercadoPago
// =============================================================================

/// Where the MercadoPago receiver gets the payment's status from
#[derive(Clone)]
pub enum PaymentSource {
    /// Re-fetch the payment from the provider API
    Lookup(Arc<dyn PaymentLookup>),
    /// Use the payment resource embedded in the notification's `data`
    TrustEmbedded,
}

/// Notification body. Two shapes are sent:
/// IPN `{ "id": "...", "topic": "payment" }` and
/// webhooks `{ "data": { "id": "..." }, "type": "payment" }`.
#[derive(Debug, Deserialize)]
struct MercadoPagoNotification {
    #[serde(default)]
    id: Option<ResourceId>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    resource: Option<String>,
}

impl MercadoPagoNotification {
    fn topic(&self) -> Option<&str> {
        self.topic.as_deref().or(self.kind.as_deref())
    }

    /// Payment id referenced by the notification
    fn payment_id(&self) -> Option<String> {
        let from_data = self
            .data
            .as_ref()
            .and_then(|d| d.get("id"))
            .and_then(|v| serde_json::from_value::<ResourceId>(v.clone()).ok())
            .map(ResourceId::into_string);
        // In the webhook shape the top-level id is the notification's own id
        let from_ipn = match self.data {
            None => self.id.clone().map(ResourceId::into_string),
            Some(_) => None,
        };
        // `resource` may be a bare id or a URL ending in the id
        let from_resource = self
            .resource
            .as_deref()
            .and_then(|r| r.trim_end_matches('/').rsplit('/').next())
            .map(str::to_string);

        from_data
            .or(from_ipn)
            .or(from_resource)
            .filter(|id| !id.is_empty())
    }
}

/// MercadoPago webhook receiver
#[derive(Clone)]
pub struct MercadoPagoWebhook {
    verifier: WebhookVerifier,
    source: PaymentSource,
    reconciler: PaymentReconciler,
}

impl MercadoPagoWebhook {
    pub fn new(
        verifier: WebhookVerifier,
        source: PaymentSource,
        reconciler: PaymentReconciler,
    ) -> BillingResult<Self> {
        if verifier.scheme() != SignatureScheme::MercadoPago {
            return Err(BillingError::Config(
                "MercadoPago webhook needs a MercadoPago verifier".to_string(),
            ));
        }
        Ok(Self {
            verifier,
            source,
            reconciler,
        })
    }

    pub async fn handle(&self, body: &str, signature: Option<&str>) -> BillingResult<WebhookOutcome> {
        self.handle_at(body, signature, OffsetDateTime::now_utc()).await
    }

    pub async fn handle_at(
        &self,
        body: &str,
        signature: Option<&str>,
        now: OffsetDateTime,
    ) -> BillingResult<WebhookOutcome> {
        if let Err(e) = self.verifier.verify_at(body, signature, now) {
            tracing::warn!(error = %e, "Rejected MercadoPago webhook");
            return Err(e);
        }

        let notification: MercadoPagoNotification = serde_json::from_str(body).map_err(|e| {
            BillingError::WebhookPayloadInvalid(format!("invalid JSON: {}", e))
        })?;

        tracing::info!(
            topic = ?notification.topic(),
            has_data = notification.data.is_some(),
            "MercadoPago webhook received"
        );

        match notification.topic() {
            Some("payment") => {}
            other => {
                return Ok(WebhookOutcome::ignored(format!(
                    "unhandled topic: {}",
                    other.unwrap_or("none")
                )))
            }
        }

        let payment = match &self.source {
            PaymentSource::Lookup(lookup) => {
                let payment_id = notification.payment_id().ok_or_else(|| {
                    BillingError::WebhookPayloadInvalid("notification has no payment id".to_string())
                })?;
                lookup.fetch_payment(&payment_id).await?
            }
            PaymentSource::TrustEmbedded => {
                let resource = notification
                    .data
                    .filter(|d| d.get("status").is_some())
                    .ok_or_else(|| {
                        BillingError::WebhookPayloadInvalid(
                            "notification carries no payment status".to_string(),
                        )
                    })?;
                payment_from_embedded(resource)?
            }
        };

        let outcome = self
            .reconciler
            .reconcile_at(mercadopago_notification(payment), now)
            .await?;
        Ok(outcome.into())
    }
}

fn mercadopago_notification(payment: ProviderPayment) -> PaymentNotification {
    PaymentNotification {
        provider: PaymentProvider::MercadoPago,
        external_id: payment.external_id,
        user_id: payment.user_id,
        plan: payment.plan,
        billing_cycle: payment.billing_cycle,
        amount_cents: payment.amount_cents,
        currency: payment.currency,
        status: payment.status,
        subscription_ref: None,
    }
}

// =============================================================================
// Stripe
// =============================================================================

const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
const CUSTOMER_SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

/// Event envelope; only the fields billing acts on are decoded
#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSession {
    id: stripe::CheckoutSessionId,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    amount_total: Option<i64>,
    #[serde(default)]
    currency: Option<stripe::Currency>,
    /// Subscription id, or the expanded subscription object
    #[serde(default)]
    subscription: Option<serde_json::Value>,
}

impl StripeCheckoutSession {
    fn subscription_id(&self) -> Option<String> {
        match self.subscription.as_ref()? {
            serde_json::Value::String(id) => Some(id.clone()),
            serde_json::Value::Object(obj) => {
                obj.get("id").and_then(|v| v.as_str()).map(str::to_string)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: stripe::SubscriptionId,
}

/// Stripe webhook receiver
#[derive(Clone)]
pub struct StripeWebhook {
    verifier: WebhookVerifier,
    reconciler: PaymentReconciler,
    credits: CreditLedger,
}

impl StripeWebhook {
    pub fn new(
        verifier: WebhookVerifier,
        reconciler: PaymentReconciler,
        credits: CreditLedger,
    ) -> BillingResult<Self> {
        if verifier.scheme() != SignatureScheme::Stripe {
            return Err(BillingError::Config(
                "Stripe webhook needs a Stripe verifier".to_string(),
            ));
        }
        Ok(Self {
            verifier,
            reconciler,
            credits,
        })
    }

    pub async fn handle(&self, body: &str, signature: Option<&str>) -> BillingResult<WebhookOutcome> {
        self.handle_at(body, signature, OffsetDateTime::now_utc()).await
    }

    pub async fn handle_at(
        &self,
        body: &str,
        signature: Option<&str>,
        now: OffsetDateTime,
    ) -> BillingResult<WebhookOutcome> {
        if let Err(e) = self.verifier.verify_at(body, signature, now) {
            tracing::warn!(error = %e, "Rejected Stripe webhook");
            return Err(e);
        }

        let event: StripeEvent = serde_json::from_str(body).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse Stripe event JSON");
            BillingError::WebhookPayloadInvalid(format!("invalid Stripe event: {}", e))
        })?;

        tracing::info!(event_id = %event.id, event_type = %event.kind, "Stripe webhook received");

        match event.kind.as_str() {
            CHECKOUT_SESSION_COMPLETED => self.handle_checkout_completed(event, now).await,
            CUSTOMER_SUBSCRIPTION_DELETED => self.handle_subscription_deleted(event, now).await,
            other => {
                tracing::debug!(event_type = %other, "Unhandled Stripe event type");
                Ok(WebhookOutcome::ignored(format!("unhandled event type: {}", other)))
            }
        }
    }

    async fn handle_checkout_completed(
        &self,
        event: StripeEvent,
        now: OffsetDateTime,
    ) -> BillingResult<WebhookOutcome> {
        let session: StripeCheckoutSession = serde_json::from_value(event.data.object)
            .map_err(|e| {
                BillingError::WebhookPayloadInvalid(format!("expected checkout session: {}", e))
            })?;
        let metadata = session.metadata.clone().unwrap_or_default();

        let user_ref = metadata
            .get("userId")
            .cloned()
            .or_else(|| session.client_reference_id.clone());

        if let Some(package_ref) = metadata.get("creditPackage") {
            return self
                .handle_credit_purchase(&event.id, &session, user_ref, package_ref)
                .await;
        }

        let plan_ref = metadata
            .get("planId")
            .or_else(|| metadata.get("planType"))
            .cloned();

        let (Some(user_ref), Some(plan_ref)) = (user_ref, plan_ref) else {
            tracing::warn!(
                event_id = %event.id,
                session_id = %session.id,
                "Checkout session without billing metadata"
            );
            return Ok(WebhookOutcome::ignored("checkout session without billing metadata"));
        };

        let user_id: UserId = user_ref.parse().map_err(|_| {
            BillingError::WebhookPayloadInvalid(format!("invalid userId in metadata: {}", user_ref))
        })?;
        let plan: PlanTier = plan_ref.parse().map_err(BillingError::InvalidTier)?;
        let billing_cycle =
            BillingCycle::parse_or_default(metadata.get("billingCycle").map(String::as_str));

        let notification = PaymentNotification {
            provider: PaymentProvider::Stripe,
            external_id: session.id.to_string(),
            user_id,
            plan,
            billing_cycle,
            amount_cents: session.amount_total.unwrap_or(0),
            currency: session
                .currency
                .map(|c| c.to_string().to_uppercase())
                .unwrap_or_else(|| "BRL".to_string()),
            status: ProviderStatus::Approved,
            subscription_ref: session.subscription_id(),
        };

        let outcome = self.reconciler.reconcile_at(notification, now).await?;
        Ok(outcome.into())
    }

    /// One-off checkout for a prepaid credit package
    async fn handle_credit_purchase(
        &self,
        event_id: &str,
        session: &StripeCheckoutSession,
        user_ref: Option<String>,
        package_ref: &str,
    ) -> BillingResult<WebhookOutcome> {
        let Some(user_ref) = user_ref else {
            tracing::warn!(event_id, session_id = %session.id, "Credit checkout without userId");
            return Ok(WebhookOutcome::ignored("credit checkout without userId"));
        };
        let user_id: UserId = user_ref.parse().map_err(|_| {
            BillingError::WebhookPayloadInvalid(format!("invalid userId in metadata: {}", user_ref))
        })?;

        let Some(package) = self.credits.package(package_ref) else {
            tracing::warn!(event_id, package = %package_ref, "Unknown credit package");
            return Ok(WebhookOutcome::ignored(format!(
                "unknown credit package: {}",
                package_ref
            )));
        };

        if let Some(paid) = session.amount_total {
            if paid != package.price_cents {
                tracing::error!(
                    event_id,
                    session_id = %session.id,
                    package = package.id,
                    paid,
                    price_cents = package.price_cents,
                    "Credit checkout amount does not match package price"
                );
                return Ok(WebhookOutcome::ignored("amount does not match credit package"));
            }
        }

        let grant = self
            .credits
            .purchase(user_id, package, session.id.as_str())
            .await?;
        Ok(grant.into())
    }

    async fn handle_subscription_deleted(
        &self,
        event: StripeEvent,
        now: OffsetDateTime,
    ) -> BillingResult<WebhookOutcome> {
        let subscription: StripeSubscription = serde_json::from_value(event.data.object)
            .map_err(|e| {
                BillingError::WebhookPayloadInvalid(format!("expected subscription: {}", e))
            })?;

        let outcome = self
            .reconciler
            .cancel(PaymentProvider::Stripe, subscription.id.as_str(), now)
            .await?;
        Ok(outcome.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BillingStore, InMemoryBillingStore};
    use async_trait::async_trait;
    use serde_json::json;
    use time::macros::datetime;

    const MP_SECRET: &str = "mp-webhook-secret";
    const STRIPE_SECRET: &str = "whsec_test_secret";

    struct FixedLookup(ProviderPayment);

    #[async_trait]
    impl PaymentLookup for FixedLookup {
        async fn fetch_payment(&self, payment_id: &str) -> BillingResult<ProviderPayment> {
            assert_eq!(payment_id, self.0.external_id);
            Ok(self.0.clone())
        }
    }

    fn now() -> OffsetDateTime {
        datetime!(2025-03-10 12:00 UTC)
    }

    async fn mercadopago(
        status: ProviderStatus,
    ) -> (Arc<InMemoryBillingStore>, MercadoPagoWebhook, WebhookVerifier, UserId) {
        let store = Arc::new(InMemoryBillingStore::new());
        let user_id = store.insert_user("mp@example.com", PlanTier::Free).await;
        let lookup = FixedLookup(ProviderPayment {
            external_id: "1234567".to_string(),
            status,
            user_id,
            plan: PlanTier::Pro,
            billing_cycle: BillingCycle::Monthly,
            amount_cents: 4700,
            currency: "BRL".to_string(),
        });
        let verifier = WebhookVerifier::new(SignatureScheme::MercadoPago, MP_SECRET).unwrap();
        let webhook = MercadoPagoWebhook::new(
            verifier.clone(),
            PaymentSource::Lookup(Arc::new(lookup)),
            PaymentReconciler::new(store.clone()),
        )
        .unwrap();
        (store, webhook, verifier, user_id)
    }

    #[tokio::test]
    async fn test_mercadopago_webhook_form_activates_plan() {
        let (store, webhook, verifier, user_id) = mercadopago(ProviderStatus::Approved).await;
        let body = json!({ "id": 99, "type": "payment", "data": { "id": "1234567" } }).to_string();
        let signature = verifier.sign(&body, now().unix_timestamp()).unwrap();

        let outcome = webhook.handle_at(&body, Some(&signature), now()).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Applied { plan: PlanTier::Pro, .. }));
        assert_eq!(
            store.get_user(user_id).await.unwrap().unwrap().plan,
            PlanTier::Pro
        );

        // Redelivery is a no-op
        let outcome = webhook.handle_at(&body, Some(&signature), now()).await.unwrap();
        assert_eq!(outcome, WebhookOutcome::Duplicate);
        assert_eq!(store.subscriptions_for(user_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_mercadopago_ipn_form() {
        let (_store, webhook, verifier, _user_id) = mercadopago(ProviderStatus::Pending).await;
        let body = json!({ "id": 1234567, "topic": "payment" }).to_string();
        let signature = verifier.sign(&body, now().unix_timestamp()).unwrap();

        let outcome = webhook.handle_at(&body, Some(&signature), now()).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Recorded {
                status: PaymentStatus::Pending
            }
        );
    }

    #[tokio::test]
    async fn test_mercadopago_resource_url() {
        let (_store, webhook, verifier, _user_id) = mercadopago(ProviderStatus::Approved).await;
        let body = json!({
            "resource": "https://api.mercadolibre.com/collections/notifications/1234567",
            "topic": "payment"
        })
        .to_string();
        let signature = verifier.sign(&body, now().unix_timestamp()).unwrap();

        let outcome = webhook.handle_at(&body, Some(&signature), now()).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Applied { .. }));
    }

    #[tokio::test]
    async fn test_mercadopago_bad_signature_changes_nothing() {
        let (store, webhook, verifier, user_id) = mercadopago(ProviderStatus::Approved).await;
        let body = json!({ "type": "payment", "data": { "id": "1234567" } }).to_string();
        let signature = verifier.sign(&body, now().unix_timestamp()).unwrap();
        let tampered = body.replace("1234567", "7654321");

        let err = webhook
            .handle_at(&tampered, Some(&signature), now())
            .await
            .unwrap_err();
        assert!(err.is_signature_error());

        let err = webhook.handle_at(&body, None, now()).await.unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureMissing));

        assert!(store.payments_for(user_id).await.is_empty());
        assert_eq!(
            store.get_user(user_id).await.unwrap().unwrap().plan,
            PlanTier::Free
        );
    }

    #[tokio::test]
    async fn test_mercadopago_malformed_body() {
        let (_store, webhook, verifier, _user_id) = mercadopago(ProviderStatus::Approved).await;
        let body = "{not json";
        let signature = verifier.sign(body, now().unix_timestamp()).unwrap();

        let err = webhook.handle_at(body, Some(&signature), now()).await.unwrap_err();
        assert!(matches!(err, BillingError::WebhookPayloadInvalid(_)));
    }

    #[tokio::test]
    async fn test_mercadopago_other_topics_ignored() {
        let (_store, webhook, verifier, _user_id) = mercadopago(ProviderStatus::Approved).await;
        let body = json!({ "id": 1, "topic": "merchant_order" }).to_string();
        let signature = verifier.sign(&body, now().unix_timestamp()).unwrap();

        let outcome = webhook.handle_at(&body, Some(&signature), now()).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn test_mercadopago_trust_embedded() {
        let store = Arc::new(InMemoryBillingStore::new());
        let user_id = store.insert_user("mp@example.com", PlanTier::Free).await;
        let verifier = WebhookVerifier::new(SignatureScheme::MercadoPago, MP_SECRET).unwrap();
        let webhook = MercadoPagoWebhook::new(
            verifier.clone(),
            PaymentSource::TrustEmbedded,
            PaymentReconciler::new(store.clone()),
        )
        .unwrap();

        let body = json!({
            "type": "payment",
            "data": {
                "id": 42,
                "status": "approved",
                "external_reference": user_id.to_string(),
                "metadata": { "plan_id": "lite", "billing_cycle": "yearly" }
            }
        })
        .to_string();
        let signature = verifier.sign(&body, now().unix_timestamp()).unwrap();

        let outcome = webhook.handle_at(&body, Some(&signature), now()).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Applied {
                plan: PlanTier::Lite,
                expires_at: Some(datetime!(2026-03-10 12:00 UTC)),
            }
        );

        // Without an embedded status the notification is unusable
        let bare = json!({ "type": "payment", "data": { "id": 43 } }).to_string();
        let signature = verifier.sign(&bare, now().unix_timestamp()).unwrap();
        let err = webhook.handle_at(&bare, Some(&signature), now()).await.unwrap_err();
        assert!(matches!(err, BillingError::WebhookPayloadInvalid(_)));
    }

    #[test]
    fn test_verifier_scheme_must_match() {
        let store = Arc::new(InMemoryBillingStore::new());
        let stripe_verifier = WebhookVerifier::new(SignatureScheme::Stripe, STRIPE_SECRET).unwrap();
        assert!(MercadoPagoWebhook::new(
            stripe_verifier,
            PaymentSource::TrustEmbedded,
            PaymentReconciler::new(store)
        )
        .is_err());
    }

    async fn stripe_webhook() -> (Arc<InMemoryBillingStore>, StripeWebhook, WebhookVerifier, UserId) {
        let store = Arc::new(InMemoryBillingStore::new());
        let user_id = store.insert_user("stripe@example.com", PlanTier::Free).await;
        let verifier = WebhookVerifier::new(SignatureScheme::Stripe, STRIPE_SECRET).unwrap();
        let webhook = StripeWebhook::new(
            verifier.clone(),
            PaymentReconciler::new(store.clone()),
            CreditLedger::new(store.clone()),
        )
        .unwrap();
        (store, webhook, verifier, user_id)
    }

    fn checkout_event(user_id: UserId) -> String {
        json!({
            "id": "evt_1",
            "object": "event",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_a1",
                    "object": "checkout.session",
                    "amount_total": 4700,
                    "currency": "brl",
                    "subscription": "sub_123",
                    "metadata": {
                        "userId": user_id.to_string(),
                        "planId": "pro",
                        "billingCycle": "monthly"
                    }
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_stripe_checkout_then_cancel() {
        let (store, webhook, verifier, user_id) = stripe_webhook().await;
        let body = checkout_event(user_id);
        let signature = verifier.sign(&body, now().unix_timestamp()).unwrap();

        let outcome = webhook.handle_at(&body, Some(&signature), now()).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Applied {
                plan: PlanTier::Pro,
                expires_at: Some(datetime!(2025-04-10 12:00 UTC)),
            }
        );
        let payment = store
            .find_payment(PaymentProvider::Stripe, "cs_test_a1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.amount_cents, 4700);
        assert_eq!(payment.currency, "BRL");

        let deleted = json!({
            "id": "evt_2",
            "type": "customer.subscription.deleted",
            "data": { "object": { "id": "sub_123", "object": "subscription" } }
        })
        .to_string();
        let signature = verifier.sign(&deleted, now().unix_timestamp()).unwrap();
        let outcome = webhook.handle_at(&deleted, Some(&signature), now()).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Applied {
                plan: PlanTier::Free,
                expires_at: None,
            }
        );
        assert_eq!(
            store.get_user(user_id).await.unwrap().unwrap().plan,
            PlanTier::Free
        );
    }

    #[tokio::test]
    async fn test_stripe_replay_is_duplicate() {
        let (store, webhook, verifier, user_id) = stripe_webhook().await;
        let body = checkout_event(user_id);
        let signature = verifier.sign(&body, now().unix_timestamp()).unwrap();

        webhook.handle_at(&body, Some(&signature), now()).await.unwrap();
        let replay = webhook.handle_at(&body, Some(&signature), now()).await.unwrap();

        assert_eq!(replay, WebhookOutcome::Duplicate);
        assert_eq!(store.payments_for(user_id).await.len(), 1);
        assert_eq!(store.subscriptions_for(user_id).await.len(), 1);
    }

    #[tokio::test]
    async fn test_stripe_stale_signature_rejected() {
        let (_store, webhook, verifier, user_id) = stripe_webhook().await;
        let body = checkout_event(user_id);
        let signed_at = now().unix_timestamp() - 301;
        let signature = verifier.sign(&body, signed_at).unwrap();

        let err = webhook
            .handle_at(&body, Some(&signature), now())
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::WebhookTimestampExpired { .. }));
    }

    #[tokio::test]
    async fn test_stripe_unhandled_event_ignored() {
        let (_store, webhook, verifier, _user_id) = stripe_webhook().await;
        let body = json!({
            "id": "evt_3",
            "type": "invoice.paid",
            "data": { "object": { "id": "in_1", "object": "invoice" } }
        })
        .to_string();
        let signature = verifier.sign(&body, now().unix_timestamp()).unwrap();

        let outcome = webhook.handle_at(&body, Some(&signature), now()).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn test_stripe_checkout_without_metadata_ignored() {
        let (store, webhook, verifier, user_id) = stripe_webhook().await;
        let body = json!({
            "id": "evt_4",
            "type": "checkout.session.completed",
            "data": { "object": { "id": "cs_test_b2", "object": "checkout.session" } }
        })
        .to_string();
        let signature = verifier.sign(&body, now().unix_timestamp()).unwrap();

        let outcome = webhook.handle_at(&body, Some(&signature), now()).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));
        assert!(store.payments_for(user_id).await.is_empty());
    }

    fn credit_checkout(event_id: &str, user_id: UserId, package: &str, amount: i64) -> String {
        json!({
            "id": event_id,
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_test_credits",
                    "object": "checkout.session",
                    "mode": "payment",
                    "amount_total": amount,
                    "currency": "brl",
                    "metadata": {
                        "userId": user_id.to_string(),
                        "creditPackage": package
                    }
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_stripe_credit_checkout_funds_balance_once() {
        let (store, webhook, verifier, user_id) = stripe_webhook().await;
        let body = credit_checkout("evt_5", user_id, "popular", 9_900);
        let signature = verifier.sign(&body, now().unix_timestamp()).unwrap();

        let outcome = webhook.handle_at(&body, Some(&signature), now()).await.unwrap();
        assert_eq!(
            outcome,
            WebhookOutcome::Credited {
                credits: 10_000,
                balance: 10_000
            }
        );

        let replay = webhook.handle_at(&body, Some(&signature), now()).await.unwrap();
        assert_eq!(replay, WebhookOutcome::Duplicate);

        let user = store.get_user(user_id).await.unwrap().unwrap();
        assert_eq!(user.credit_balance, 10_000);
        assert_eq!(user.plan, PlanTier::Free);
        assert!(store.payments_for(user_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_stripe_credit_checkout_rejects_wrong_amount_or_package() {
        let (store, webhook, verifier, user_id) = stripe_webhook().await;

        let underpaid = credit_checkout("evt_6", user_id, "premium", 100);
        let signature = verifier.sign(&underpaid, now().unix_timestamp()).unwrap();
        let outcome = webhook.handle_at(&underpaid, Some(&signature), now()).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));

        let unknown = credit_checkout("evt_7", user_id, "mega", 9_900);
        let signature = verifier.sign(&unknown, now().unix_timestamp()).unwrap();
        let outcome = webhook.handle_at(&unknown, Some(&signature), now()).await.unwrap();
        assert!(matches!(outcome, WebhookOutcome::Ignored { .. }));

        assert_eq!(
            store.get_user(user_id).await.unwrap().unwrap().credit_balance,
            0
        );
    }
}
