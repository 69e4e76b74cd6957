//! Subscription expiry sweep
//!
//! Marks lapsed subscriptions expired and returns their users to the free
//! plan. One bad row does not stop the sweep.

use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::store::BillingStore;

/// Counts from one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpirySummary {
    pub found: usize,
    pub expired: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct SubscriptionExpiry {
    store: Arc<dyn BillingStore>,
}

impl SubscriptionExpiry {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    /// Expire every active subscription whose window ended before `now`.
    ///
    /// Only listing the candidates can fail the whole sweep.
    pub async fn run(&self, now: OffsetDateTime) -> BillingResult<ExpirySummary> {
        let due = self.store.due_for_expiry(now).await?;
        let mut summary = ExpirySummary {
            found: due.len(),
            ..Default::default()
        };

        if due.is_empty() {
            tracing::debug!("No lapsed subscriptions");
            return Ok(summary);
        }

        tracing::info!(count = due.len(), "Expiring lapsed subscriptions");

        for subscription in due {
            match self.store.expire_subscription(subscription.id, now).await {
                Ok(true) => {
                    summary.expired += 1;
                    tracing::info!(
                        subscription_id = %subscription.id,
                        user_id = %subscription.user_id,
                        plan = %subscription.plan,
                        expires_at = %subscription.expires_at,
                        "Subscription expired, user moved to free plan"
                    );
                }
                // Renewed, extended or cancelled since it was listed
                Ok(false) => {}
                Err(e) => {
                    summary.failed += 1;
                    tracing::error!(
                        subscription_id = %subscription.id,
                        user_id = %subscription.user_id,
                        error = %e,
                        "Failed to expire subscription"
                    );
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryBillingStore;
    use crate::provider::ProviderStatus;
    use crate::reconcile::{PaymentNotification, PaymentReconciler, ReconcileOutcome};
    use innerai_shared::{
        BillingCycle, PaymentProvider, PlanTier, Subscription, SubscriptionId, SubscriptionStatus,
        UserId,
    };
    use time::macros::datetime;

    fn subscription(user_id: UserId, expires_at: OffsetDateTime) -> Subscription {
        Subscription {
            id: SubscriptionId::new(),
            user_id,
            plan: PlanTier::Pro,
            status: SubscriptionStatus::Active,
            provider: PaymentProvider::MercadoPago,
            external_id: None,
            started_at: datetime!(2025-01-01 00:00 UTC),
            expires_at,
            cancelled_at: None,
        }
    }

    #[tokio::test]
    async fn test_expires_only_lapsed() {
        let store = Arc::new(InMemoryBillingStore::new());
        let lapsed = store.insert_user("old@example.com", PlanTier::Pro).await;
        let current = store.insert_user("new@example.com", PlanTier::Pro).await;
        store
            .insert_subscription(subscription(lapsed, datetime!(2025-02-01 00:00 UTC)))
            .await;
        store
            .insert_subscription(subscription(current, datetime!(2025-04-01 00:00 UTC)))
            .await;

        let sweep = SubscriptionExpiry::new(store.clone());
        let summary = sweep.run(datetime!(2025-03-01 00:00 UTC)).await.unwrap();

        assert_eq!(
            summary,
            ExpirySummary {
                found: 1,
                expired: 1,
                failed: 0
            }
        );
        assert_eq!(
            store.get_user(lapsed).await.unwrap().unwrap().plan,
            PlanTier::Free
        );
        assert_eq!(
            store.get_user(current).await.unwrap().unwrap().plan,
            PlanTier::Pro
        );

        // Second run finds nothing
        let again = sweep.run(datetime!(2025-03-01 00:00 UTC)).await.unwrap();
        assert_eq!(again.found, 0);
    }

    #[tokio::test]
    async fn test_expiry_boundary_is_exclusive() {
        let store = Arc::new(InMemoryBillingStore::new());
        let user = store.insert_user("edge@example.com", PlanTier::Pro).await;
        let at = datetime!(2025-03-01 00:00 UTC);
        store.insert_subscription(subscription(user, at)).await;

        let summary = SubscriptionExpiry::new(store).run(at).await.unwrap();
        assert_eq!(summary.found, 0);
    }

    #[tokio::test]
    async fn test_renewal_after_listing_is_not_expired() {
        let store = Arc::new(InMemoryBillingStore::new());
        let user = store.insert_user("renew@example.com", PlanTier::Pro).await;
        let listed = subscription(user, datetime!(2025-03-01 00:00 UTC));
        store.insert_subscription(listed.clone()).await;

        let now = datetime!(2025-03-01 01:00 UTC);
        let due = store.due_for_expiry(now).await.unwrap();
        assert_eq!(due.len(), 1);

        // Renewal payment lands before the sweep reaches the row
        let outcome = PaymentReconciler::new(store.clone())
            .reconcile_at(
                PaymentNotification {
                    provider: PaymentProvider::MercadoPago,
                    external_id: "mp-renewal".to_string(),
                    user_id: user,
                    plan: PlanTier::Pro,
                    billing_cycle: BillingCycle::Monthly,
                    amount_cents: 9700,
                    currency: "BRL".to_string(),
                    status: ProviderStatus::Approved,
                    subscription_ref: None,
                },
                now,
            )
            .await
            .unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Activated { .. }));

        let expired = store.expire_subscription(listed.id, now).await.unwrap();
        assert!(!expired);

        assert_eq!(
            store.get_user(user).await.unwrap().unwrap().plan,
            PlanTier::Pro
        );
        let subs = store.subscriptions_for(user).await;
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].status, SubscriptionStatus::Active);
        assert_eq!(subs[0].expires_at, datetime!(2025-04-01 01:00 UTC));
    }
}
