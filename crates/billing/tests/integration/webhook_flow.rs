//! End-to-end billing flow against the in-memory store
//!
//! Drives signed webhook deliveries through [`BillingService`] and checks
//! the resulting plan, payments, subscriptions and usage decisions.
//!
//! ## Running Tests
//! ```bash
//! cargo test -p innerai-billing --test webhook_flow
//! ```

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use innerai_billing::{
    BillingConfig, BillingError, BillingService, BillingStore, InMemoryBillingStore, LimitKind,
    SignatureScheme, UsageDecision, WebhookOutcome, WebhookVerifier,
};
use innerai_shared::{PaymentStatus, PlanTier, SubscriptionStatus, UserId};
use serde_json::json;
use time::OffsetDateTime;

const MP_SECRET: &str = "mp-integration-secret";
const STRIPE_SECRET: &str = "whsec_integration_secret";

// ============================================================================
// Test Utilities
// ============================================================================

struct Harness {
    store: Arc<InMemoryBillingStore>,
    service: BillingService,
    mp_signer: WebhookVerifier,
    stripe_signer: WebhookVerifier,
}

fn setup() -> Harness {
    let store = Arc::new(InMemoryBillingStore::new());
    let config = BillingConfig {
        mercadopago_webhook_secret: Some(MP_SECRET.to_string()),
        mercadopago_trust_embedded: true,
        stripe_webhook_secret: Some(STRIPE_SECRET.to_string()),
        ..Default::default()
    };
    let service = BillingService::new(config, store.clone()).unwrap();

    Harness {
        store,
        service,
        mp_signer: WebhookVerifier::new(SignatureScheme::MercadoPago, MP_SECRET).unwrap(),
        stripe_signer: WebhookVerifier::new(SignatureScheme::Stripe, STRIPE_SECRET).unwrap(),
    }
}

fn approved_payment(payment_id: u64, user_id: UserId, plan: &str) -> String {
    json!({
        "type": "payment",
        "data": {
            "id": payment_id,
            "status": "approved",
            "transaction_amount": 47.0,
            "currency_id": "BRL",
            "external_reference": json!({
                "userId": user_id.to_string(),
                "planId": plan,
                "billingCycle": "monthly"
            }).to_string()
        }
    })
    .to_string()
}

fn sign_now(signer: &WebhookVerifier, body: &str) -> String {
    signer
        .sign(body, OffsetDateTime::now_utc().unix_timestamp())
        .unwrap()
}

// ============================================================================
// Webhook Idempotency
// ============================================================================

#[tokio::test]
async fn test_mercadopago_replay_yields_one_payment_and_subscription() {
    let h = setup();
    let user_id = h.store.insert_user("replay@example.com", PlanTier::Free).await;
    let webhook = h.service.mercadopago.as_ref().unwrap();

    let body = approved_payment(5550001, user_id, "pro");
    let signature = sign_now(&h.mp_signer, &body);

    let first = webhook.handle(&body, Some(&signature)).await.unwrap();
    assert!(matches!(first, WebhookOutcome::Applied { plan: PlanTier::Pro, .. }));

    for _ in 0..3 {
        let again = webhook.handle(&body, Some(&signature)).await.unwrap();
        assert_eq!(again, WebhookOutcome::Duplicate);
    }

    let payments = h.store.payments_for(user_id).await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Completed);
    assert_eq!(payments[0].amount_cents, 4700);

    let subscriptions = h.store.subscriptions_for(user_id).await;
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0].status, SubscriptionStatus::Active);

    let user = h.store.get_user(user_id).await.unwrap().unwrap();
    assert_eq!(user.plan, PlanTier::Pro);
}

#[tokio::test]
async fn test_concurrent_deliveries_activate_once() {
    let h = setup();
    let user_id = h.store.insert_user("race@example.com", PlanTier::Free).await;
    let webhook = h.service.mercadopago.clone().unwrap();

    let body = approved_payment(5550002, user_id, "lite");
    let signature = sign_now(&h.mp_signer, &body);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let webhook = webhook.clone();
        let body = body.clone();
        let signature = signature.clone();
        handles.push(tokio::spawn(async move {
            webhook.handle(&body, Some(&signature)).await
        }));
    }

    let mut applied = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap() {
            WebhookOutcome::Applied { .. } => applied += 1,
            WebhookOutcome::Duplicate => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(h.store.payments_for(user_id).await.len(), 1);
    assert_eq!(h.store.subscriptions_for(user_id).await.len(), 1);
}

#[tokio::test]
async fn test_pending_then_approved_activates() {
    let h = setup();
    let user_id = h.store.insert_user("pending@example.com", PlanTier::Free).await;
    let webhook = h.service.mercadopago.as_ref().unwrap();

    let pending = approved_payment(5550003, user_id, "pro").replace("approved", "in_process");
    let signature = sign_now(&h.mp_signer, &pending);
    let outcome = webhook.handle(&pending, Some(&signature)).await.unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Recorded {
            status: PaymentStatus::Pending
        }
    );
    assert_eq!(
        h.store.get_user(user_id).await.unwrap().unwrap().plan,
        PlanTier::Free
    );

    let approved = approved_payment(5550003, user_id, "pro");
    let signature = sign_now(&h.mp_signer, &approved);
    let outcome = webhook.handle(&approved, Some(&signature)).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Applied { .. }));

    let payments = h.store.payments_for(user_id).await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status, PaymentStatus::Completed);
}

// ============================================================================
// Signature Rejection
// ============================================================================

#[tokio::test]
async fn test_tampered_delivery_changes_nothing() {
    let h = setup();
    let user_id = h.store.insert_user("tamper@example.com", PlanTier::Free).await;

    let body = approved_payment(5550004, user_id, "lite");
    let signature = sign_now(&h.mp_signer, &body);
    let upgraded = body.replace("\\\"lite\\\"", "\\\"enterprise\\\"");
    assert_ne!(upgraded, body);

    let err = h
        .service
        .mercadopago
        .as_ref()
        .unwrap()
        .handle(&upgraded, Some(&signature))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::WebhookSignatureInvalid));

    // Signed with the other provider's scheme
    let stripe_signature = sign_now(&h.stripe_signer, &body);
    let err = h
        .service
        .mercadopago
        .as_ref()
        .unwrap()
        .handle(&body, Some(&stripe_signature))
        .await
        .unwrap_err();
    assert!(err.is_signature_error());

    assert!(h.store.payments_for(user_id).await.is_empty());
    assert!(h.store.subscriptions_for(user_id).await.is_empty());
    assert_eq!(
        h.store.get_user(user_id).await.unwrap().unwrap().plan,
        PlanTier::Free
    );
}

// ============================================================================
// Stripe Checkout
// ============================================================================

#[tokio::test]
async fn test_stripe_checkout_upgrades_and_lifts_limits() {
    let h = setup();
    let user_id = h.store.insert_user("stripe@example.com", PlanTier::Free).await;

    // Free plan cannot call an advanced model
    let decision = h.service.usage.check(user_id, Some("gpt-4o")).await.unwrap();
    assert!(matches!(
        decision,
        UsageDecision::Denied {
            kind: LimitKind::Model,
            ..
        }
    ));

    let body = json!({
        "id": "evt_integration_1",
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "cs_test_integration",
                "amount_total": 2900,
                "currency": "brl",
                "metadata": {
                    "userId": user_id.to_string(),
                    "planId": "lite",
                    "billingCycle": "monthly"
                }
            }
        }
    })
    .to_string();
    let signature = sign_now(&h.stripe_signer, &body);
    let stripe = h.service.stripe.as_ref().unwrap();

    let outcome = stripe.handle(&body, Some(&signature)).await.unwrap();
    assert!(matches!(outcome, WebhookOutcome::Applied { plan: PlanTier::Lite, .. }));
    assert_eq!(
        stripe.handle(&body, Some(&signature)).await.unwrap(),
        WebhookOutcome::Duplicate
    );

    let decision = h.service.usage.check(user_id, Some("gpt-4o")).await.unwrap();
    assert!(decision.is_allowed());
    assert_eq!(decision.plan(), PlanTier::Lite);
}

#[tokio::test]
async fn test_stripe_credit_checkout_funds_consumption() {
    let h = setup();
    let user_id = h.store.insert_user("credits@example.com", PlanTier::Free).await;

    // Nothing to spend before a purchase
    let err = h
        .service
        .credits
        .consume(user_id, 500, "image generation", None)
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InsufficientCredits { .. }));

    let body = json!({
        "id": "evt_integration_credits",
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": "cs_test_credit_pack",
                "amount_total": 5900,
                "currency": "brl",
                "metadata": {
                    "userId": user_id.to_string(),
                    "creditPackage": "basic"
                }
            }
        }
    })
    .to_string();
    let signature = sign_now(&h.stripe_signer, &body);
    let stripe = h.service.stripe.as_ref().unwrap();

    let outcome = stripe.handle(&body, Some(&signature)).await.unwrap();
    assert_eq!(
        outcome,
        WebhookOutcome::Credited {
            credits: 5_000,
            balance: 5_000
        }
    );
    assert_eq!(
        stripe.handle(&body, Some(&signature)).await.unwrap(),
        WebhookOutcome::Duplicate
    );

    let balance = h
        .service
        .credits
        .consume(user_id, 500, "image generation", None)
        .await
        .unwrap();
    assert_eq!(balance, 4_500);
}

// ============================================================================
// Usage Limits
// ============================================================================

#[tokio::test]
async fn test_daily_limit_boundary() {
    let h = setup();
    let user_id = h.store.insert_user("limits@example.com", PlanTier::Free).await;
    let daily = PlanTier::Free.limits().daily_messages.unwrap();

    // One below the limit is still allowed
    for _ in 0..daily - 1 {
        h.service
            .usage
            .record(user_id, "gpt-4o-mini", 10, 20, 0)
            .await
            .unwrap();
    }
    let decision = h.service.usage.check(user_id, None).await.unwrap();
    match decision {
        UsageDecision::Allowed {
            remaining_messages_today,
            ..
        } => assert_eq!(remaining_messages_today, Some(1)),
        other => panic!("expected allowed, got {:?}", other),
    }

    // At the limit the next call is refused
    h.service
        .usage
        .record(user_id, "gpt-4o-mini", 10, 20, 0)
        .await
        .unwrap();
    let err = h
        .service
        .usage
        .enforce(user_id, Some("gpt-4o-mini"))
        .await
        .unwrap_err();
    match err {
        BillingError::UsageLimitExceeded {
            kind,
            used,
            limit,
            tier,
        } => {
            assert_eq!(kind, LimitKind::DailyMessages);
            assert_eq!(used, daily);
            assert_eq!(limit, daily);
            assert_eq!(tier, PlanTier::Free);
        }
        other => panic!("expected usage limit error, got {:?}", other),
    }
}

// ============================================================================
// Expiry
// ============================================================================

#[tokio::test]
async fn test_expiry_returns_user_to_free() {
    let h = setup();
    let user_id = h.store.insert_user("expiry@example.com", PlanTier::Free).await;
    let body = approved_payment(5550005, user_id, "pro");
    let signature = sign_now(&h.mp_signer, &body);
    h.service
        .mercadopago
        .as_ref()
        .unwrap()
        .handle(&body, Some(&signature))
        .await
        .unwrap();

    // Nothing lapses today
    let summary = h.service.expiry.run(OffsetDateTime::now_utc()).await.unwrap();
    assert_eq!(summary.expired, 0);

    let later = OffsetDateTime::now_utc() + time::Duration::days(40);
    let summary = h.service.expiry.run(later).await.unwrap();
    assert_eq!(summary.expired, 1);
    assert_eq!(
        h.store.get_user(user_id).await.unwrap().unwrap().plan,
        PlanTier::Free
    );
    assert!(h
        .store
        .active_subscription(user_id)
        .await
        .unwrap()
        .is_none());
}
