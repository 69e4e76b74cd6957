//! Postgres billing store

use async_trait::async_trait;
use innerai_shared::{
    BillingCycle, CreditKind, CreditTransaction, Payment, PaymentId, PaymentProvider,
    PaymentStatus, PlanTier, Subscription, SubscriptionId, SubscriptionStatus, UsageRecord, User,
    UserId,
};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    BillingStore, CompletedPayment, Completion, NewCreditTransaction, PaymentUpdate, UsageTotals,
};
use crate::error::{BillingError, BillingResult};
use crate::reconcile::{plan_activation, Activation};

fn parse_column<T>(column: &str, value: &str) -> BillingResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| BillingError::Database(format!("{}: {}", column, e)))
}

/// Foreign key violations on user_id mean the user does not exist
fn user_missing_or(err: sqlx::Error, user_id: UserId) -> BillingError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_foreign_key_violation() {
            return BillingError::UserNotFound(user_id);
        }
    }
    BillingError::from(err)
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    plan: PlanTier,
    credit_balance: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId(row.id),
            email: row.email,
            plan: row.plan,
            credit_balance: row.credit_balance,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    plan: PlanTier,
    status: String,
    provider: String,
    external_id: Option<String>,
    started_at: OffsetDateTime,
    expires_at: OffsetDateTime,
    cancelled_at: Option<OffsetDateTime>,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = BillingError;

    fn try_from(row: SubscriptionRow) -> BillingResult<Self> {
        Ok(Subscription {
            id: SubscriptionId(row.id),
            user_id: UserId(row.user_id),
            plan: row.plan,
            status: parse_column::<SubscriptionStatus>("subscriptions.status", &row.status)?,
            provider: parse_column::<PaymentProvider>("subscriptions.provider", &row.provider)?,
            external_id: row.external_id,
            started_at: row.started_at,
            expires_at: row.expires_at,
            cancelled_at: row.cancelled_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    user_id: Uuid,
    provider: String,
    external_id: String,
    plan: PlanTier,
    billing_cycle: String,
    amount_cents: i64,
    currency: String,
    status: String,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = BillingError;

    fn try_from(row: PaymentRow) -> BillingResult<Self> {
        Ok(Payment {
            id: PaymentId(row.id),
            user_id: UserId(row.user_id),
            provider: parse_column::<PaymentProvider>("payments.provider", &row.provider)?,
            external_id: row.external_id,
            plan: row.plan,
            billing_cycle: parse_column::<BillingCycle>("payments.billing_cycle", &row.billing_cycle)?,
            amount_cents: row.amount_cents,
            currency: row.currency,
            status: parse_column::<PaymentStatus>("payments.status", &row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CreditRow {
    id: Uuid,
    user_id: Uuid,
    kind: String,
    amount: i64,
    description: String,
    reference_id: Option<String>,
    created_at: OffsetDateTime,
}

impl TryFrom<CreditRow> for CreditTransaction {
    type Error = BillingError;

    fn try_from(row: CreditRow) -> BillingResult<Self> {
        Ok(CreditTransaction {
            id: row.id,
            user_id: UserId(row.user_id),
            kind: parse_column::<CreditKind>("credit_transactions.kind", &row.kind)?,
            amount: row.amount,
            description: row.description,
            reference_id: row.reference_id,
            created_at: row.created_at,
        })
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan, status, provider, external_id, \
     started_at, expires_at, cancelled_at";

/// Billing store backed by Postgres
#[derive(Clone)]
pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BillingStore for PgBillingStore {
    async fn ping(&self) -> BillingResult<()> {
        innerai_shared::ping(&self.pool).await?;
        Ok(())
    }

    async fn get_user(&self, user_id: UserId) -> BillingResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, email, plan, credit_balance, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn active_subscription(&self, user_id: UserId) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 AND status = 'active'",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Subscription::try_from).transpose()
    }

    async fn find_payment(
        &self,
        provider: PaymentProvider,
        external_id: &str,
    ) -> BillingResult<Option<Payment>> {
        let row: Option<PaymentRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, provider, external_id, plan, billing_cycle,
                   amount_cents, currency, status, created_at, updated_at
            FROM payments
            WHERE provider = $1 AND external_id = $2
            "#,
        )
        .bind(provider.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Payment::try_from).transpose()
    }

    async fn complete_payment(
        &self,
        payment: &CompletedPayment,
        now: OffsetDateTime,
    ) -> BillingResult<Completion> {
        let mut tx = self.pool.begin().await?;

        // Lock the user so concurrent payments for the same user serialize
        let user: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(payment.user_id.0)
            .fetch_optional(&mut *tx)
            .await?;
        if user.is_none() {
            return Err(BillingError::UserNotFound(payment.user_id));
        }

        // Claim the payment: no row back means another delivery completed it
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO payments (
                id, user_id, provider, external_id, plan, billing_cycle,
                amount_cents, currency, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'completed', $9, $9)
            ON CONFLICT (provider, external_id) DO UPDATE SET
                status = 'completed',
                user_id = EXCLUDED.user_id,
                plan = EXCLUDED.plan,
                billing_cycle = EXCLUDED.billing_cycle,
                amount_cents = EXCLUDED.amount_cents,
                currency = EXCLUDED.currency,
                updated_at = EXCLUDED.updated_at
            WHERE payments.status <> 'completed'
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(payment.user_id.0)
        .bind(payment.provider.as_str())
        .bind(&payment.external_id)
        .bind(payment.plan)
        .bind(payment.billing_cycle.as_str())
        .bind(payment.amount_cents)
        .bind(&payment.currency)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            tx.rollback().await?;
            return Ok(Completion::AlreadyCompleted);
        }

        let existing: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM subscriptions WHERE user_id = $1 AND status = 'active' FOR UPDATE",
            SUBSCRIPTION_COLUMNS
        ))
        .bind(payment.user_id.0)
        .fetch_optional(&mut *tx)
        .await?;
        let existing = existing.map(Subscription::try_from).transpose()?;

        let activation = plan_activation(existing.as_ref(), payment, now);

        match &activation {
            Activation::Extended {
                subscription_id,
                expires_at,
                ..
            } => {
                sqlx::query(
                    "UPDATE subscriptions SET expires_at = $2, updated_at = $3 WHERE id = $1",
                )
                .bind(subscription_id.0)
                .bind(*expires_at)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
            Activation::Created {
                subscription,
                replaced,
            } => {
                if let Some(old_id) = replaced {
                    sqlx::query(
                        r#"
                        UPDATE subscriptions
                        SET status = 'cancelled', cancelled_at = $2, updated_at = $2
                        WHERE id = $1
                        "#,
                    )
                    .bind(old_id.0)
                    .bind(now)
                    .execute(&mut *tx)
                    .await?;
                }

                sqlx::query(
                    r#"
                    INSERT INTO subscriptions (
                        id, user_id, plan, status, provider, external_id,
                        started_at, expires_at, created_at, updated_at
                    ) VALUES ($1, $2, $3, 'active', $4, $5, $6, $7, $8, $8)
                    "#,
                )
                .bind(subscription.id.0)
                .bind(subscription.user_id.0)
                .bind(subscription.plan)
                .bind(subscription.provider.as_str())
                .bind(&subscription.external_id)
                .bind(subscription.started_at)
                .bind(subscription.expires_at)
                .bind(now)
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query("UPDATE users SET plan = $2, updated_at = $3 WHERE id = $1")
            .bind(payment.user_id.0)
            .bind(activation.plan())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Completion::Applied(activation))
    }

    async fn record_payment_status(&self, update: &PaymentUpdate) -> BillingResult<PaymentStatus> {
        let stored: Option<(String,)> = sqlx::query_as(
            r#"
            INSERT INTO payments (
                id, user_id, provider, external_id, plan, billing_cycle,
                amount_cents, currency, status, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
            ON CONFLICT (provider, external_id) DO UPDATE SET
                status = CASE
                    WHEN payments.status = 'completed' THEN payments.status
                    ELSE EXCLUDED.status
                END,
                updated_at = NOW()
            RETURNING status
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(update.user_id.0)
        .bind(update.provider.as_str())
        .bind(&update.external_id)
        .bind(update.plan)
        .bind(update.billing_cycle.as_str())
        .bind(update.amount_cents)
        .bind(&update.currency)
        .bind(update.status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| user_missing_or(e, update.user_id))?;

        match stored {
            Some((status,)) => parse_column("payments.status", &status),
            None => Err(BillingError::Database(
                "payment upsert returned no row".to_string(),
            )),
        }
    }

    async fn cancel_subscription(
        &self,
        provider: PaymentProvider,
        external_id: &str,
        now: OffsetDateTime,
    ) -> BillingResult<Option<Subscription>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled', cancelled_at = $3, updated_at = $3
            WHERE provider = $1 AND external_id = $2 AND status = 'active'
            RETURNING {}
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(provider.as_str())
        .bind(external_id)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };
        let cancelled = Subscription::try_from(row)?;

        sqlx::query("UPDATE users SET plan = 'free', updated_at = $2 WHERE id = $1")
            .bind(cancelled.user_id.0)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(cancelled))
    }

    async fn due_for_expiry(&self, now: OffsetDateTime) -> BillingResult<Vec<Subscription>> {
        let rows: Vec<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM subscriptions
            WHERE status = 'active' AND expires_at < $1
            ORDER BY expires_at
            "#,
            SUBSCRIPTION_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Subscription::try_from).collect()
    }

    async fn expire_subscription(
        &self,
        subscription_id: SubscriptionId,
        now: OffsetDateTime,
    ) -> BillingResult<bool> {
        let mut tx = self.pool.begin().await?;

        let expired: Option<(Uuid,)> = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = 'expired', updated_at = $2
            WHERE id = $1 AND status = 'active' AND expires_at < $2
            RETURNING user_id
            "#,
        )
        .bind(subscription_id.0)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((user_id,)) = expired else {
            tx.rollback().await?;
            return Ok(false);
        };

        sqlx::query("UPDATE users SET plan = 'free', updated_at = $2 WHERE id = $1")
            .bind(user_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(true)
    }

    async fn usage_totals(
        &self,
        user_id: UserId,
        day_start: OffsetDateTime,
        month_start: OffsetDateTime,
    ) -> BillingResult<UsageTotals> {
        let (messages_today, tokens_today, messages_month, tokens_month, cost_month): (
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            r#"
            SELECT
                LEAST(COALESCE(SUM(messages::NUMERIC) FILTER (WHERE occurred_at >= $2), 0), $4)::BIGINT,
                LEAST(COALESCE(SUM(input_tokens::NUMERIC + output_tokens::NUMERIC) FILTER (WHERE occurred_at >= $2), 0), $4)::BIGINT,
                LEAST(COALESCE(SUM(messages::NUMERIC) FILTER (WHERE occurred_at >= $3), 0), $4)::BIGINT,
                LEAST(COALESCE(SUM(input_tokens::NUMERIC + output_tokens::NUMERIC) FILTER (WHERE occurred_at >= $3), 0), $4)::BIGINT,
                LEAST(COALESCE(SUM(cost_micros::NUMERIC) FILTER (WHERE occurred_at >= $3), 0), $4)::BIGINT
            FROM usage_records
            WHERE user_id = $1 AND occurred_at >= LEAST($2, $3)
            "#,
        )
        .bind(user_id.0)
        .bind(day_start)
        .bind(month_start)
        // Sums run in NUMERIC and clamp to BIGINT
        .bind(i64::MAX)
        .fetch_one(&self.pool)
        .await?;

        Ok(UsageTotals {
            messages_today: messages_today.max(0) as u64,
            tokens_today: tokens_today.max(0) as u64,
            messages_month: messages_month.max(0) as u64,
            tokens_month: tokens_month.max(0) as u64,
            cost_month_micros: cost_month,
        })
    }

    async fn append_usage(&self, record: &UsageRecord) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_records (
                id, user_id, model_id, occurred_at, messages,
                input_tokens, output_tokens, cost_micros
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id.0)
        .bind(&record.model_id)
        .bind(record.occurred_at)
        .bind(record.messages)
        .bind(record.input_tokens)
        .bind(record.output_tokens)
        .bind(record.cost_micros)
        .execute(&self.pool)
        .await
        .map_err(|e| user_missing_or(e, record.user_id))?;

        Ok(())
    }

    async fn apply_credit(&self, credit: &NewCreditTransaction) -> BillingResult<i64> {
        let mut tx = self.pool.begin().await?;

        // Conditional update makes check-and-debit a single statement
        let updated: Option<(i64,)> = sqlx::query_as(
            r#"
            UPDATE users
            SET credit_balance = credit_balance + $2, updated_at = NOW()
            WHERE id = $1 AND credit_balance + $2 >= 0
            RETURNING credit_balance
            "#,
        )
        .bind(credit.user_id.0)
        .bind(credit.amount)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((balance,)) = updated else {
            let current: Option<(i64,)> =
                sqlx::query_as("SELECT credit_balance FROM users WHERE id = $1")
                    .bind(credit.user_id.0)
                    .fetch_optional(&mut *tx)
                    .await?;
            tx.rollback().await?;
            return match current {
                Some((available,)) => Err(BillingError::InsufficientCredits {
                    required: -credit.amount,
                    available,
                }),
                None => Err(BillingError::UserNotFound(credit.user_id)),
            };
        };

        sqlx::query(
            r#"
            INSERT INTO credit_transactions (
                id, user_id, kind, amount, description, reference_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(credit.user_id.0)
        .bind(credit.kind.as_str())
        .bind(credit.amount)
        .bind(&credit.description)
        .bind(&credit.reference_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(balance)
    }

    async fn grant_credit_once(&self, credit: &NewCreditTransaction) -> BillingResult<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        // Ledger row first; the purchase reference index rejects a second grant
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO credit_transactions (
                id, user_id, kind, amount, description, reference_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (reference_id) WHERE kind = 'purchase' AND reference_id IS NOT NULL
            DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(credit.user_id.0)
        .bind(credit.kind.as_str())
        .bind(credit.amount)
        .bind(&credit.description)
        .bind(&credit.reference_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| user_missing_or(e, credit.user_id))?;

        if inserted.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let (balance,): (i64,) = sqlx::query_as(
            r#"
            UPDATE users
            SET credit_balance = credit_balance + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING credit_balance
            "#,
        )
        .bind(credit.user_id.0)
        .bind(credit.amount)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(balance))
    }

    async fn credit_history(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> BillingResult<Vec<CreditTransaction>> {
        let rows: Vec<CreditRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, kind, amount, description, reference_id, created_at
            FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id.0)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CreditTransaction::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> PgBillingStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = innerai_shared::create_pool(&url, 5).await.unwrap();
        innerai_shared::run_migrations(&pool).await.unwrap();
        PgBillingStore::new(pool)
    }

    async fn seed_user(store: &PgBillingStore) -> UserId {
        let id = UserId::new();
        sqlx::query("INSERT INTO users (id, email, plan) VALUES ($1, $2, 'free')")
            .bind(id.0)
            .bind(format!("{}@example.com", id))
            .execute(store.pool())
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    #[ignore = "requires a Postgres database (DATABASE_URL)"]
    async fn test_complete_payment_is_idempotent() {
        let store = test_store().await;
        let user_id = seed_user(&store).await;
        let payment = CompletedPayment {
            provider: PaymentProvider::MercadoPago,
            external_id: format!("mp-{}", Uuid::new_v4()),
            user_id,
            plan: PlanTier::Pro,
            billing_cycle: BillingCycle::Monthly,
            amount_cents: 4700,
            currency: "BRL".to_string(),
            subscription_ref: None,
        };
        let now = OffsetDateTime::now_utc();

        let first = store.complete_payment(&payment, now).await.unwrap();
        assert!(matches!(first, Completion::Applied(_)));
        let second = store.complete_payment(&payment, now).await.unwrap();
        assert_eq!(second, Completion::AlreadyCompleted);

        let user = store.get_user(user_id).await.unwrap().unwrap();
        assert_eq!(user.plan, PlanTier::Pro);
        assert!(store.active_subscription(user_id).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore = "requires a Postgres database (DATABASE_URL)"]
    async fn test_completion_moves_pending_payment_to_paying_user() {
        let store = test_store().await;
        let first = seed_user(&store).await;
        let payer = seed_user(&store).await;
        let external_id = format!("mp-{}", Uuid::new_v4());

        store
            .record_payment_status(&PaymentUpdate {
                provider: PaymentProvider::MercadoPago,
                external_id: external_id.clone(),
                user_id: first,
                plan: PlanTier::Lite,
                billing_cycle: BillingCycle::Monthly,
                amount_cents: 2700,
                currency: "BRL".to_string(),
                status: PaymentStatus::Pending,
            })
            .await
            .unwrap();

        let completion = store
            .complete_payment(
                &CompletedPayment {
                    provider: PaymentProvider::MercadoPago,
                    external_id: external_id.clone(),
                    user_id: payer,
                    plan: PlanTier::Lite,
                    billing_cycle: BillingCycle::Monthly,
                    amount_cents: 2700,
                    currency: "BRL".to_string(),
                    subscription_ref: None,
                },
                OffsetDateTime::now_utc(),
            )
            .await
            .unwrap();
        assert!(matches!(completion, Completion::Applied(_)));

        let payment = store
            .find_payment(PaymentProvider::MercadoPago, &external_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payment.user_id, payer);
        assert_eq!(
            store.active_subscription(payer).await.unwrap().unwrap().user_id,
            payer
        );
        assert!(store.active_subscription(first).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires a Postgres database (DATABASE_URL)"]
    async fn test_purchase_grant_applies_once() {
        let store = test_store().await;
        let user_id = seed_user(&store).await;
        let grant = NewCreditTransaction {
            user_id,
            kind: CreditKind::Purchase,
            amount: 5_000,
            description: "Pacote Básico".to_string(),
            reference_id: Some(format!("cs_test_{}", Uuid::new_v4())),
        };

        assert_eq!(store.grant_credit_once(&grant).await.unwrap(), Some(5_000));
        assert_eq!(store.grant_credit_once(&grant).await.unwrap(), None);

        let user = store.get_user(user_id).await.unwrap().unwrap();
        assert_eq!(user.credit_balance, 5_000);
        assert_eq!(store.credit_history(user_id, 10, 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    #[ignore = "requires a Postgres database (DATABASE_URL)"]
    async fn test_credit_debit_is_conditional() {
        let store = test_store().await;
        let user_id = seed_user(&store).await;

        let err = store
            .apply_credit(&NewCreditTransaction {
                user_id,
                kind: CreditKind::Consumption,
                amount: -10,
                description: "chat".to_string(),
                reference_id: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InsufficientCredits { .. }));
        assert!(store.credit_history(user_id, 10, 0).await.unwrap().is_empty());
    }
}
