//! Usage limiting
//!
//! Gates AI calls on the caller's plan: model access first, then the daily
//! message count, then the monthly token count. A user already at a limit is
//! rejected; one below it is let through.
//!
//! The check and the later `record` are not done under a lock, so two
//! concurrent requests at the boundary can both pass.

use std::sync::Arc;

use innerai_shared::{models_for_tier, PlanTier, UsageRecord, UserId};
use serde::Serialize;
use time::{Date, Duration, OffsetDateTime, Time};
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::store::{BillingStore, UsageTotals};

/// Largest token count accepted for either side of a single call
pub const MAX_TOKENS_PER_CALL: i64 = 10_000_000;

/// Largest cost accepted for a single call (10 000 units of currency)
pub const MAX_COST_MICROS_PER_CALL: i64 = 10_000_000_000;

/// Which limit denied a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    Model,
    DailyMessages,
    MonthlyTokens,
}

impl std::fmt::Display for LimitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Model => f.write_str("Model access"),
            Self::DailyMessages => f.write_str("Daily message"),
            Self::MonthlyTokens => f.write_str("Monthly token"),
        }
    }
}

/// UTC windows the limits are counted over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageWindows {
    #[serde(with = "time::serde::rfc3339")]
    pub day_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub month_start: OffsetDateTime,
}

impl UsageWindows {
    pub fn at(now: OffsetDateTime) -> Self {
        let now = now.to_offset(time::UtcOffset::UTC);
        let today = now.date();
        let first = Date::from_calendar_date(today.year(), today.month(), 1).unwrap_or(today);
        Self {
            day_start: today.with_time(Time::MIDNIGHT).assume_utc(),
            month_start: first.with_time(Time::MIDNIGHT).assume_utc(),
        }
    }

    pub fn day_end(&self) -> OffsetDateTime {
        self.day_start + Duration::days(1)
    }
}

/// Outcome of a usage check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum UsageDecision {
    Allowed {
        plan: PlanTier,
        /// `None` when the plan has no daily message limit
        remaining_messages_today: Option<u64>,
        /// `None` when the plan has no monthly token limit
        remaining_tokens_month: Option<u64>,
    },
    Denied {
        plan: PlanTier,
        kind: LimitKind,
        used: u64,
        limit: u64,
        reason: String,
    },
}

impl UsageDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    pub fn plan(&self) -> PlanTier {
        match self {
            Self::Allowed { plan, .. } | Self::Denied { plan, .. } => *plan,
        }
    }
}

/// Usage against one limit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitUsage {
    pub used: u64,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
}

impl LimitUsage {
    fn new(used: u64, limit: Option<u64>) -> Self {
        Self {
            used,
            limit,
            remaining: limit.map(|l| l.saturating_sub(used)),
        }
    }

    /// Percentage of the limit consumed, capped at 100
    pub fn percentage(&self) -> Option<f64> {
        self.limit
            .filter(|l| *l > 0)
            .map(|l| (self.used as f64 * 100.0 / l as f64).min(100.0))
    }
}

/// Usage summary for dashboards
#[derive(Debug, Clone, Serialize)]
pub struct UsageStats {
    pub plan: PlanTier,
    pub windows: UsageWindows,
    pub daily_messages: LimitUsage,
    pub monthly_tokens: LimitUsage,
    pub messages_month: u64,
    pub tokens_today: u64,
    pub cost_month_micros: i64,
    pub models: Vec<&'static str>,
}

/// Plan-based usage limiter
#[derive(Clone)]
pub struct UsageLimiter {
    store: Arc<dyn BillingStore>,
}

impl UsageLimiter {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    async fn plan_and_totals(
        &self,
        user_id: UserId,
        windows: UsageWindows,
    ) -> BillingResult<(PlanTier, UsageTotals)> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or(BillingError::UserNotFound(user_id))?;
        let totals = self
            .store
            .usage_totals(user_id, windows.day_start, windows.month_start)
            .await?;
        Ok((user.plan, totals))
    }

    /// Check whether the user may make one more call, optionally to `model`
    pub async fn check(&self, user_id: UserId, model: Option<&str>) -> BillingResult<UsageDecision> {
        self.check_at(user_id, model, OffsetDateTime::now_utc()).await
    }

    pub async fn check_at(
        &self,
        user_id: UserId,
        model: Option<&str>,
        now: OffsetDateTime,
    ) -> BillingResult<UsageDecision> {
        let (plan, totals) = self.plan_and_totals(user_id, UsageWindows::at(now)).await?;
        let limits = plan.limits();

        if let Some(model) = model {
            if !limits.allows_model(model) {
                return Ok(UsageDecision::Denied {
                    plan,
                    kind: LimitKind::Model,
                    used: 0,
                    limit: 0,
                    reason: format!("Model {} is not available on the {} plan", model, plan),
                });
            }
        }

        if let Some(limit) = limits.daily_messages {
            if totals.messages_today >= limit {
                return Ok(UsageDecision::Denied {
                    plan,
                    kind: LimitKind::DailyMessages,
                    used: totals.messages_today,
                    limit,
                    reason: format!(
                        "Daily message limit reached ({}/{})",
                        totals.messages_today, limit
                    ),
                });
            }
        }

        if let Some(limit) = limits.monthly_tokens {
            if totals.tokens_month >= limit {
                return Ok(UsageDecision::Denied {
                    plan,
                    kind: LimitKind::MonthlyTokens,
                    used: totals.tokens_month,
                    limit,
                    reason: format!(
                        "Monthly token limit reached ({}/{})",
                        totals.tokens_month, limit
                    ),
                });
            }
        }

        Ok(UsageDecision::Allowed {
            plan,
            remaining_messages_today: limits
                .daily_messages
                .map(|l| l.saturating_sub(totals.messages_today)),
            remaining_tokens_month: limits
                .monthly_tokens
                .map(|l| l.saturating_sub(totals.tokens_month)),
        })
    }

    /// Like [`check`](Self::check), but a denial is an error
    pub async fn enforce(&self, user_id: UserId, model: Option<&str>) -> BillingResult<UsageDecision> {
        let decision = self.check(user_id, model).await?;
        match decision {
            UsageDecision::Denied {
                plan,
                kind: LimitKind::Model,
                ..
            } => {
                tracing::info!(user_id = %user_id, model = ?model, plan = %plan, "Model not allowed");
                Err(BillingError::ModelNotAllowed {
                    model: model.unwrap_or_default().to_string(),
                    tier: plan,
                })
            }
            UsageDecision::Denied {
                plan,
                kind,
                used,
                limit,
                ..
            } => {
                tracing::info!(
                    user_id = %user_id,
                    plan = %plan,
                    limit_kind = ?kind,
                    used,
                    limit,
                    "Usage limit reached"
                );
                Err(BillingError::UsageLimitExceeded {
                    kind,
                    used,
                    limit,
                    tier: plan,
                })
            }
            allowed => Ok(allowed),
        }
    }

    /// Record one completed AI call
    pub async fn record(
        &self,
        user_id: UserId,
        model: &str,
        input_tokens: i64,
        output_tokens: i64,
        cost_micros: i64,
    ) -> BillingResult<UsageRecord> {
        if model.trim().is_empty() {
            return Err(BillingError::InvalidAmount("model is required".to_string()));
        }
        if input_tokens < 0 || output_tokens < 0 || cost_micros < 0 {
            return Err(BillingError::InvalidAmount(
                "token counts and cost must not be negative".to_string(),
            ));
        }
        if input_tokens > MAX_TOKENS_PER_CALL || output_tokens > MAX_TOKENS_PER_CALL {
            return Err(BillingError::InvalidAmount(format!(
                "token counts must not exceed {} per call",
                MAX_TOKENS_PER_CALL
            )));
        }
        if cost_micros > MAX_COST_MICROS_PER_CALL {
            return Err(BillingError::InvalidAmount(format!(
                "cost must not exceed {} micros per call",
                MAX_COST_MICROS_PER_CALL
            )));
        }

        let record = UsageRecord {
            id: Uuid::new_v4(),
            user_id,
            model_id: model.trim().to_string(),
            occurred_at: OffsetDateTime::now_utc(),
            messages: 1,
            input_tokens,
            output_tokens,
            cost_micros,
        };
        self.store.append_usage(&record).await?;

        tracing::debug!(
            user_id = %user_id,
            model = %record.model_id,
            input_tokens,
            output_tokens,
            "Usage recorded"
        );

        Ok(record)
    }

    pub async fn stats(&self, user_id: UserId) -> BillingResult<UsageStats> {
        self.stats_at(user_id, OffsetDateTime::now_utc()).await
    }

    pub async fn stats_at(&self, user_id: UserId, now: OffsetDateTime) -> BillingResult<UsageStats> {
        let windows = UsageWindows::at(now);
        let (plan, totals) = self.plan_and_totals(user_id, windows).await?;
        let limits = plan.limits();

        Ok(UsageStats {
            plan,
            windows,
            daily_messages: LimitUsage::new(totals.messages_today, limits.daily_messages),
            monthly_tokens: LimitUsage::new(totals.tokens_month, limits.monthly_tokens),
            messages_month: totals.messages_month,
            tokens_today: totals.tokens_today,
            cost_month_micros: totals.cost_month_micros,
            models: models_for_tier(plan),
        })
    }
}
