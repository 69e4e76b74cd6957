//! In-memory billing store (for development without Postgres)
//!
//! All state sits behind one lock, so every write method is atomic the same
//! way a Postgres transaction is.

use std::collections::HashMap;

use async_trait::async_trait;
use innerai_shared::{
    CreditKind, CreditTransaction, Payment, PaymentId, PaymentProvider, PaymentStatus, PlanTier,
    Subscription, SubscriptionId, SubscriptionStatus, UsageRecord, User, UserId,
};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    BillingStore, CompletedPayment, Completion, NewCreditTransaction, PaymentUpdate, UsageTotals,
};
use crate::error::{BillingError, BillingResult};
use crate::reconcile::{plan_activation, Activation};

#[derive(Default)]
struct State {
    users: HashMap<UserId, User>,
    subscriptions: Vec<Subscription>,
    /// (provider, external_id) -> payment
    payments: HashMap<(PaymentProvider, String), Payment>,
    usage: Vec<UsageRecord>,
    credits: Vec<CreditTransaction>,
}

impl State {
    fn active_for(&self, user_id: UserId) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.user_id == user_id && s.status == SubscriptionStatus::Active)
    }

    fn set_plan(&mut self, user_id: UserId, plan: PlanTier, now: OffsetDateTime) {
        if let Some(user) = self.users.get_mut(&user_id) {
            user.plan = plan;
            user.updated_at = now;
        }
    }

    fn push_credit(&mut self, tx: &NewCreditTransaction, now: OffsetDateTime) -> BillingResult<i64> {
        let user = self
            .users
            .get_mut(&tx.user_id)
            .ok_or(BillingError::UserNotFound(tx.user_id))?;

        let balance = user
            .credit_balance
            .checked_add(tx.amount)
            .ok_or_else(|| BillingError::InvalidAmount("credit balance overflow".to_string()))?;
        if balance < 0 {
            return Err(BillingError::InsufficientCredits {
                required: -tx.amount,
                available: user.credit_balance,
            });
        }
        user.credit_balance = balance;
        user.updated_at = now;

        self.credits.push(CreditTransaction {
            id: Uuid::new_v4(),
            user_id: tx.user_id,
            kind: tx.kind,
            amount: tx.amount,
            description: tx.description.clone(),
            reference_id: tx.reference_id.clone(),
            created_at: now,
        });

        Ok(balance)
    }
}

pub struct InMemoryBillingStore {
    state: RwLock<State>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    /// Seed a user; returns its id
    pub async fn insert_user(&self, email: &str, plan: PlanTier) -> UserId {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: UserId::new(),
            email: email.to_string(),
            plan,
            credit_balance: 0,
            created_at: now,
            updated_at: now,
        };
        let id = user.id;
        self.state.write().await.users.insert(id, user);
        id
    }

    /// Seed a subscription directly, bypassing payment reconciliation
    pub async fn insert_subscription(&self, subscription: Subscription) {
        self.state.write().await.subscriptions.push(subscription);
    }

    pub async fn subscriptions_for(&self, user_id: UserId) -> Vec<Subscription> {
        self.state
            .read()
            .await
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn payments_for(&self, user_id: UserId) -> Vec<Payment> {
        self.state
            .read()
            .await
            .payments
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryBillingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn ping(&self) -> BillingResult<()> {
        Ok(())
    }

    async fn get_user(&self, user_id: UserId) -> BillingResult<Option<User>> {
        Ok(self.state.read().await.users.get(&user_id).cloned())
    }

    async fn active_subscription(&self, user_id: UserId) -> BillingResult<Option<Subscription>> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .iter()
            .find(|s| s.user_id == user_id && s.status == SubscriptionStatus::Active)
            .cloned())
    }

    async fn find_payment(
        &self,
        provider: PaymentProvider,
        external_id: &str,
    ) -> BillingResult<Option<Payment>> {
        Ok(self
            .state
            .read()
            .await
            .payments
            .get(&(provider, external_id.to_string()))
            .cloned())
    }

    async fn complete_payment(
        &self,
        payment: &CompletedPayment,
        now: OffsetDateTime,
    ) -> BillingResult<Completion> {
        let mut state = self.state.write().await;

        if !state.users.contains_key(&payment.user_id) {
            return Err(BillingError::UserNotFound(payment.user_id));
        }

        let key = (payment.provider, payment.external_id.clone());
        if let Some(existing) = state.payments.get(&key) {
            if existing.status == PaymentStatus::Completed {
                return Ok(Completion::AlreadyCompleted);
            }
        }

        let existing = state.active_for(payment.user_id).cloned();
        let activation = plan_activation(existing.as_ref(), payment, now);

        match &activation {
            Activation::Extended {
                subscription_id,
                expires_at,
                ..
            } => {
                if let Some(sub) = state
                    .subscriptions
                    .iter_mut()
                    .find(|s| s.id == *subscription_id)
                {
                    sub.expires_at = *expires_at;
                }
            }
            Activation::Created {
                subscription,
                replaced,
            } => {
                if let Some(old_id) = replaced {
                    if let Some(old) = state.subscriptions.iter_mut().find(|s| s.id == *old_id) {
                        old.status = SubscriptionStatus::Cancelled;
                        old.cancelled_at = Some(now);
                    }
                }
                state.subscriptions.push(subscription.clone());
            }
        }

        let created_at = state.payments.get(&key).map(|p| p.created_at).unwrap_or(now);
        let id = state.payments.get(&key).map(|p| p.id).unwrap_or_default();
        state.payments.insert(
            key,
            Payment {
                id,
                user_id: payment.user_id,
                provider: payment.provider,
                external_id: payment.external_id.clone(),
                plan: payment.plan,
                billing_cycle: payment.billing_cycle,
                amount_cents: payment.amount_cents,
                currency: payment.currency.clone(),
                status: PaymentStatus::Completed,
                created_at,
                updated_at: now,
            },
        );
        state.set_plan(payment.user_id, activation.plan(), now);

        Ok(Completion::Applied(activation))
    }

    async fn record_payment_status(&self, update: &PaymentUpdate) -> BillingResult<PaymentStatus> {
        let now = OffsetDateTime::now_utc();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if !state.users.contains_key(&update.user_id) {
            return Err(BillingError::UserNotFound(update.user_id));
        }

        let key = (update.provider, update.external_id.clone());
        match state.payments.get_mut(&key) {
            Some(existing) if existing.status == PaymentStatus::Completed => {
                Ok(PaymentStatus::Completed)
            }
            Some(existing) => {
                existing.status = update.status;
                existing.updated_at = now;
                Ok(update.status)
            }
            None => {
                state.payments.insert(
                    key,
                    Payment {
                        id: PaymentId::new(),
                        user_id: update.user_id,
                        provider: update.provider,
                        external_id: update.external_id.clone(),
                        plan: update.plan,
                        billing_cycle: update.billing_cycle,
                        amount_cents: update.amount_cents,
                        currency: update.currency.clone(),
                        status: update.status,
                        created_at: now,
                        updated_at: now,
                    },
                );
                Ok(update.status)
            }
        }
    }

    async fn cancel_subscription(
        &self,
        provider: PaymentProvider,
        external_id: &str,
        now: OffsetDateTime,
    ) -> BillingResult<Option<Subscription>> {
        let mut state = self.state.write().await;

        let Some(sub) = state.subscriptions.iter_mut().find(|s| {
            s.provider == provider
                && s.status == SubscriptionStatus::Active
                && s.external_id.as_deref() == Some(external_id)
        }) else {
            return Ok(None);
        };

        sub.status = SubscriptionStatus::Cancelled;
        sub.cancelled_at = Some(now);
        let cancelled = sub.clone();
        state.set_plan(cancelled.user_id, PlanTier::Free, now);

        Ok(Some(cancelled))
    }

    async fn due_for_expiry(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>> {
        Ok(self
            .state
            .read()
            .await
            .subscriptions
            .iter()
            .filter(|s| s.status == SubscriptionStatus::Active && s.expires_at < now)
            .cloned()
            .collect())
    }

    async fn expire_subscription(
        &self,
        subscription_id: SubscriptionId,
        now: OffsetDateTime,
    ) -> BillingResult<bool> {
        let mut state = self.state.write().await;

        let Some(sub) = state
            .subscriptions
            .iter_mut()
            .find(|s| {
                s.id == subscription_id
                    && s.status == SubscriptionStatus::Active
                    && s.expires_at < now
            })
        else {
            return Ok(false);
        };

        sub.status = SubscriptionStatus::Expired;
        let user_id = sub.user_id;
        state.set_plan(user_id, PlanTier::Free, now);

        Ok(true)
    }

    async fn usage_totals(
        &self,
        user_id: UserId,
        day_start: OffsetDateTime,
        month_start: OffsetDateTime,
    ) -> BillingResult<UsageTotals> {
        let state = self.state.read().await;
        let mut totals = UsageTotals::default();

        for record in state
            .usage
            .iter()
            .filter(|r| r.user_id == user_id && r.occurred_at >= month_start)
        {
            let tokens = (record.input_tokens.max(0) as u64)
                .saturating_add(record.output_tokens.max(0) as u64);
            let messages = record.messages.max(0) as u64;
            totals.messages_month = totals.messages_month.saturating_add(messages);
            totals.tokens_month = totals.tokens_month.saturating_add(tokens);
            totals.cost_month_micros = totals.cost_month_micros.saturating_add(record.cost_micros);
            if record.occurred_at >= day_start {
                totals.messages_today = totals.messages_today.saturating_add(messages);
                totals.tokens_today = totals.tokens_today.saturating_add(tokens);
            }
        }

        Ok(totals)
    }

    async fn append_usage(&self, record: &UsageRecord) -> BillingResult<()> {
        let mut state = self.state.write().await;
        if !state.users.contains_key(&record.user_id) {
            return Err(BillingError::UserNotFound(record.user_id));
        }
        state.usage.push(record.clone());
        Ok(())
    }

    async fn apply_credit(&self, tx: &NewCreditTransaction) -> BillingResult<i64> {
        self.state
            .write()
            .await
            .push_credit(tx, OffsetDateTime::now_utc())
    }

    async fn grant_credit_once(&self, tx: &NewCreditTransaction) -> BillingResult<Option<i64>> {
        let mut state = self.state.write().await;

        let granted = tx.reference_id.is_some()
            && state.credits.iter().any(|t| {
                t.kind == CreditKind::Purchase && t.reference_id == tx.reference_id
            });
        if granted {
            return Ok(None);
        }

        state.push_credit(tx, OffsetDateTime::now_utc()).map(Some)
    }

    async fn credit_history(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> BillingResult<Vec<CreditTransaction>> {
        let state = self.state.read().await;
        // Newest first; insertion order breaks timestamp ties
        let mut entries: Vec<_> = state
            .credits
            .iter()
            .enumerate()
            .filter(|(_, t)| t.user_id == user_id)
            .collect();
        entries.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));

        Ok(entries
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|(_, t)| t.clone())
            .collect())
    }
}
