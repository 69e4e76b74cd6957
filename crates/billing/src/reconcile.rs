//! Payment reconciliation
//!
//! Turns a verified payment notification into the payment / subscription /
//! user state it implies. Every transition is idempotent: the payment's
//! `(provider, external_id)` is the idempotency key, and the activation runs
//! in a single store transaction so a retried delivery converges to the same
//! end state.

use std::sync::Arc;

use innerai_shared::{
    BillingCycle, PaymentProvider, PaymentStatus, PlanTier, Subscription, SubscriptionId,
    SubscriptionStatus, UserId,
};
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::provider::ProviderStatus;
use crate::store::{BillingStore, Completion, CompletedPayment, PaymentUpdate};

/// A payment state change reported by a processor
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentNotification {
    pub provider: PaymentProvider,
    pub external_id: String,
    pub user_id: UserId,
    pub plan: PlanTier,
    pub billing_cycle: BillingCycle,
    pub amount_cents: i64,
    pub currency: String,
    pub status: ProviderStatus,
    /// Provider subscription id to store on the subscription (Stripe); defaults to the payment id
    pub subscription_ref: Option<String>,
}

/// How a completed payment changed the user's subscription
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Activation {
    /// Same plan already active: validity window pushed out by one cycle
    Extended {
        subscription_id: SubscriptionId,
        plan: PlanTier,
        #[serde(with = "time::serde::rfc3339")]
        expires_at: OffsetDateTime,
    },
    /// New subscription created, replacing the previous active one if any
    Created {
        subscription: Subscription,
        replaced: Option<SubscriptionId>,
    },
}

impl Activation {
    pub fn plan(&self) -> PlanTier {
        match self {
            Activation::Extended { plan, .. } => *plan,
            Activation::Created { subscription, .. } => subscription.plan,
        }
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        match self {
            Activation::Extended { expires_at, .. } => *expires_at,
            Activation::Created { subscription, .. } => subscription.expires_at,
        }
    }
}

/// Decide how a completed payment activates a plan.
///
/// If the user already holds an active subscription on the same plan, it is
/// extended from whichever is later of now and its current expiry. Otherwise
/// the existing subscription (if any) is replaced by a fresh one starting now.
pub fn plan_activation(
    existing: Option<&Subscription>,
    payment: &CompletedPayment,
    now: OffsetDateTime,
) -> Activation {
    if let Some(current) = existing {
        if current.plan == payment.plan && current.status == SubscriptionStatus::Active {
            let from = current.expires_at.max(now);
            return Activation::Extended {
                subscription_id: current.id,
                plan: current.plan,
                expires_at: payment.billing_cycle.advance(from),
            };
        }
    }

    Activation::Created {
        subscription: Subscription {
            id: SubscriptionId::new(),
            user_id: payment.user_id,
            plan: payment.plan,
            status: SubscriptionStatus::Active,
            provider: payment.provider,
            external_id: Some(
                payment
                    .subscription_ref
                    .clone()
                    .unwrap_or_else(|| payment.external_id.clone()),
            ),
            started_at: now,
            expires_at: payment.billing_cycle.advance(now),
            cancelled_at: None,
        },
        replaced: existing.map(|s| s.id),
    }
}

/// Result of reconciling one notification
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Payment completed and plan activated
    Activated { activation: Activation },
    /// Payment was already completed; nothing changed
    Duplicate,
    /// Non-terminal or failed payment recorded without touching the subscription
    Recorded { status: PaymentStatus },
    /// Subscription cancelled and user returned to the free plan
    Cancelled { subscription: Subscription },
    /// Notification carried nothing actionable
    Ignored { reason: String },
}

/// Applies payment notifications to the billing store
#[derive(Clone)]
pub struct PaymentReconciler {
    store: Arc<dyn BillingStore>,
}

impl PaymentReconciler {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub async fn reconcile(&self, notification: PaymentNotification) -> BillingResult<ReconcileOutcome> {
        self.reconcile_at(notification, OffsetDateTime::now_utc()).await
    }

    pub async fn reconcile_at(
        &self,
        notification: PaymentNotification,
        now: OffsetDateTime,
    ) -> BillingResult<ReconcileOutcome> {
        let provider = notification.provider;
        let external_id = notification.external_id.clone();

        tracing::info!(
            provider = %provider,
            external_id = %external_id,
            user_id = %notification.user_id,
            plan = %notification.plan,
            status = ?notification.status,
            "Reconciling payment notification"
        );

        // Fast path for replays; complete_payment re-checks under lock
        if let Some(existing) = self.store.find_payment(provider, &external_id).await? {
            if existing.status == PaymentStatus::Completed {
                tracing::info!(
                    provider = %provider,
                    external_id = %external_id,
                    "Payment already completed, duplicate delivery ignored"
                );
                return Ok(ReconcileOutcome::Duplicate);
            }
        }

        match notification.status {
            ProviderStatus::Approved => self.complete(notification, now).await,
            ProviderStatus::Pending => self.record(notification, PaymentStatus::Pending).await,
            ProviderStatus::Rejected => self.record(notification, PaymentStatus::Failed).await,
            ProviderStatus::Unknown(ref status) => {
                tracing::warn!(
                    provider = %provider,
                    external_id = %external_id,
                    status = %status,
                    "Unhandled payment status"
                );
                Ok(ReconcileOutcome::Ignored {
                    reason: format!("unhandled payment status: {}", status),
                })
            }
        }
    }

    async fn complete(
        &self,
        notification: PaymentNotification,
        now: OffsetDateTime,
    ) -> BillingResult<ReconcileOutcome> {
        if !notification.plan.is_paid() {
            tracing::warn!(
                external_id = %notification.external_id,
                user_id = %notification.user_id,
                "Approved payment references the free plan"
            );
            return Ok(ReconcileOutcome::Ignored {
                reason: "approved payment for the free plan".to_string(),
            });
        }

        let payment = CompletedPayment {
            provider: notification.provider,
            external_id: notification.external_id,
            user_id: notification.user_id,
            plan: notification.plan,
            billing_cycle: notification.billing_cycle,
            amount_cents: notification.amount_cents,
            currency: notification.currency,
            subscription_ref: notification.subscription_ref,
        };

        match self.store.complete_payment(&payment, now).await? {
            Completion::Applied(activation) => {
                tracing::info!(
                    provider = %payment.provider,
                    external_id = %payment.external_id,
                    user_id = %payment.user_id,
                    plan = %activation.plan(),
                    expires_at = %activation.expires_at(),
                    "Payment completed, plan activated"
                );
                Ok(ReconcileOutcome::Activated { activation })
            }
            Completion::AlreadyCompleted => {
                tracing::info!(
                    provider = %payment.provider,
                    external_id = %payment.external_id,
                    "Payment completed concurrently by another delivery"
                );
                Ok(ReconcileOutcome::Duplicate)
            }
        }
    }

    async fn record(
        &self,
        notification: PaymentNotification,
        status: PaymentStatus,
    ) -> BillingResult<ReconcileOutcome> {
        let update = PaymentUpdate {
            provider: notification.provider,
            external_id: notification.external_id,
            user_id: notification.user_id,
            plan: notification.plan,
            billing_cycle: notification.billing_cycle,
            amount_cents: notification.amount_cents,
            currency: notification.currency,
            status,
        };

        match self.store.record_payment_status(&update).await? {
            PaymentStatus::Completed => Ok(ReconcileOutcome::Duplicate),
            stored => {
                tracing::info!(
                    provider = %update.provider,
                    external_id = %update.external_id,
                    status = %stored,
                    "Payment status recorded"
                );
                Ok(ReconcileOutcome::Recorded { status: stored })
            }
        }
    }

    /// Cancel the subscription a provider reference points at (e.g. Stripe
    /// `customer.subscription.deleted`). Unknown or already closed
    /// subscriptions are a no-op so replays converge.
    pub async fn cancel(
        &self,
        provider: PaymentProvider,
        external_id: &str,
        now: OffsetDateTime,
    ) -> BillingResult<ReconcileOutcome> {
        match self.store.cancel_subscription(provider, external_id, now).await? {
            Some(subscription) => {
                tracing::info!(
                    provider = %provider,
                    external_id = %external_id,
                    user_id = %subscription.user_id,
                    "Subscription cancelled, user moved to free plan"
                );
                Ok(ReconcileOutcome::Cancelled { subscription })
            }
            None => Ok(ReconcileOutcome::Ignored {
                reason: format!("no active subscription for {}", external_id),
            }),
        }
    }

    /// Guard used by callers that must not act for unknown users
    pub async fn require_user(&self, user_id: UserId) -> BillingResult<()> {
        match self.store.get_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(BillingError::UserNotFound(user_id)),
        }
    }
}
