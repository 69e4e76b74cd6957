//! Billing persistence
//!
//! The reconciler, usage limiter, credit ledger and expiry sweep talk to
//! storage only through [`BillingStore`]. Postgres backs production; the
//! in-memory store backs local development and tests.

mod memory;
mod postgres;

pub use memory::InMemoryBillingStore;
pub use postgres::PgBillingStore;

use async_trait::async_trait;
use innerai_shared::{
    BillingCycle, CreditKind, CreditTransaction, Payment, PaymentProvider, PaymentStatus,
    PlanTier, Subscription, SubscriptionId, UsageRecord, User, UserId,
};
use serde::Serialize;
use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::reconcile::Activation;

/// An approved payment to be applied atomically
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedPayment {
    pub provider: PaymentProvider,
    pub external_id: String,
    pub user_id: UserId,
    pub plan: PlanTier,
    pub billing_cycle: BillingCycle,
    pub amount_cents: i64,
    pub currency: String,
    pub subscription_ref: Option<String>,
}

/// Result of [`BillingStore::complete_payment`]
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Applied(Activation),
    /// The payment row was already completed; nothing was written
    AlreadyCompleted,
}

/// Non-terminal or failed payment status to record
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentUpdate {
    pub provider: PaymentProvider,
    pub external_id: String,
    pub user_id: UserId,
    pub plan: PlanTier,
    pub billing_cycle: BillingCycle,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
}

/// Aggregated usage for the current day and month windows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageTotals {
    pub messages_today: u64,
    pub tokens_today: u64,
    pub messages_month: u64,
    pub tokens_month: u64,
    pub cost_month_micros: i64,
}

/// Credit ledger entry to append
#[derive(Debug, Clone, PartialEq)]
pub struct NewCreditTransaction {
    pub user_id: UserId,
    pub kind: CreditKind,
    /// Signed delta; negative for consumption
    pub amount: i64,
    pub description: String,
    pub reference_id: Option<String>,
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    /// Connectivity check for readiness
    async fn ping(&self) -> BillingResult<()>;

    async fn get_user(&self, user_id: UserId) -> BillingResult<Option<User>>;

    async fn active_subscription(&self, user_id: UserId) -> BillingResult<Option<Subscription>>;

    async fn find_payment(
        &self,
        provider: PaymentProvider,
        external_id: &str,
    ) -> BillingResult<Option<Payment>>;

    /// Claim the payment by its provider id, activate or extend the
    /// subscription, and set the user's plan, all in one transaction.
    async fn complete_payment(
        &self,
        payment: &CompletedPayment,
        now: OffsetDateTime,
    ) -> BillingResult<Completion>;

    /// Upsert a pending or failed payment. A completed payment is never
    /// overwritten; the returned status is what is stored afterwards.
    async fn record_payment_status(&self, update: &PaymentUpdate) -> BillingResult<PaymentStatus>;

    /// Cancel the active subscription with this provider reference and move
    /// its user back to the free plan. `None` when nothing was active.
    async fn cancel_subscription(
        &self,
        provider: PaymentProvider,
        external_id: &str,
        now: OffsetDateTime,
    ) -> BillingResult<Option<Subscription>>;

    /// Active subscriptions whose validity window ended before `now`
    async fn due_for_expiry(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>>;

    /// Mark one subscription expired and downgrade its user. Returns false
    /// if it was no longer active.
    async fn expire_subscription(
        &self,
        subscription_id: SubscriptionId,
        now: OffsetDateTime,
    ) -> BillingResult<bool>;

    async fn usage_totals(
        &self,
        user_id: UserId,
        day_start: OffsetDateTime,
        month_start: OffsetDateTime,
    ) -> BillingResult<UsageTotals>;

    async fn append_usage(&self, record: &UsageRecord) -> BillingResult<()>;

    /// Apply a signed credit delta and append it to the ledger. Debits that
    /// would take the balance below zero fail with `InsufficientCredits`.
    /// Returns the new balance.
    async fn apply_credit(&self, tx: &NewCreditTransaction) -> BillingResult<i64>;

    /// Credit a purchase unless one with the same `reference_id` is already
    /// in the ledger. `None` when it was, with the balance left untouched.
    async fn grant_credit_once(&self, tx: &NewCreditTransaction) -> BillingResult<Option<i64>>;

    async fn credit_history(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> BillingResult<Vec<CreditTransaction>>;
}
