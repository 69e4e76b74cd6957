//! Common types used across Inner AI billing

use serde::{Deserialize, Serialize};
use time::{Duration, Month, OffsetDateTime};
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Subscription ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Payment ID wrapper (internal row id, not the provider's id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentId(pub Uuid);

impl PaymentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Plan tier a user is subscribed to.
///
/// Ordered from cheapest to most expensive so model access can be expressed
/// as "minimum tier".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Lite,
    Pro,
    Enterprise,
}

impl Default for PlanTier {
    fn default() -> Self {
        Self::Free
    }
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Lite => "lite",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }

    /// Usage limits for this tier
    /// Free (10/day, 100K tokens) → Lite (100/day, 1M) → Pro (500/day, 5M) → Enterprise (unlimited)
    pub fn limits(&self) -> PlanLimits {
        match self {
            Self::Free => PlanLimits {
                tier: *self,
                daily_messages: Some(10),
                monthly_tokens: Some(100_000),
            },
            Self::Lite => PlanLimits {
                tier: *self,
                daily_messages: Some(100),
                monthly_tokens: Some(1_000_000),
            },
            Self::Pro => PlanLimits {
                tier: *self,
                daily_messages: Some(500),
                monthly_tokens: Some(5_000_000),
            },
            Self::Enterprise => PlanLimits {
                tier: *self,
                daily_messages: None,
                monthly_tokens: None,
            },
        }
    }

    /// Whether this tier is paid (has to be backed by a subscription)
    pub fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlanTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "lite" => Ok(Self::Lite),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(format!("Invalid plan tier: {}", s)),
        }
    }
}

/// Subscription lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            // Stripe spells it with one "l"
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

/// Payment row status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid payment status: {}", s)),
        }
    }
}

/// Payment processor that notified us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentProvider {
    MercadoPago,
    Stripe,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MercadoPago => "mercadopago",
            Self::Stripe => "stripe",
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mercadopago" => Ok(Self::MercadoPago),
            "stripe" => Ok(Self::Stripe),
            _ => Err(format!("Invalid payment provider: {}", s)),
        }
    }
}

/// Billing cycle purchased with a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    #[default]
    Monthly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Parse a billing cycle, falling back to monthly for anything unrecognised
    pub fn parse_or_default(s: Option<&str>) -> Self {
        s.and_then(|v| v.parse().ok()).unwrap_or_default()
    }

    /// End of a validity window starting at `from`.
    ///
    /// Calendar arithmetic: Jan 31 + 1 month is Feb 28/29, Feb 29 + 1 year is Feb 28.
    pub fn advance(&self, from: OffsetDateTime) -> OffsetDateTime {
        match self {
            Self::Monthly => add_months(from, 1).unwrap_or(from + Duration::days(30)),
            Self::Yearly => add_months(from, 12).unwrap_or(from + Duration::days(365)),
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BillingCycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" | "month" => Ok(Self::Monthly),
            "yearly" | "year" | "annual" => Ok(Self::Yearly),
            _ => Err(format!("Invalid billing cycle: {}", s)),
        }
    }
}

fn add_months(from: OffsetDateTime, months: u32) -> Option<OffsetDateTime> {
    let date = from.date();
    let zero_based = date.month() as u32 - 1 + months;
    let year = date.year() + (zero_based / 12) as i32;
    let month = Month::try_from((zero_based % 12 + 1) as u8).ok()?;
    let day = date.day().min(time::util::days_in_year_month(year, month));
    let target = time::Date::from_calendar_date(year, month, day).ok()?;
    Some(from.replace_date(target))
}

// =============================================================================
// Plan limits and model access
// =============================================================================

/// Usage limits attached to a plan tier. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub tier: PlanTier,
    pub daily_messages: Option<u64>,
    pub monthly_tokens: Option<u64>,
}

impl PlanLimits {
    /// Whether the plan may call the given model.
    ///
    /// Enterprise may call anything, including models not in the catalog.
    pub fn allows_model(&self, model: &str) -> bool {
        if self.tier == PlanTier::Enterprise {
            return true;
        }
        match minimum_tier_for_model(model) {
            Some(required) => self.tier >= required,
            None => false,
        }
    }
}

/// Model catalog: (model id, cheapest tier that may call it)
pub const MODEL_CATALOG: &[(&str, PlanTier)] = &[
    // Fast models
    ("llama-4-scout", PlanTier::Free),
    ("deepseek-3.1", PlanTier::Free),
    ("gpt-4o-mini", PlanTier::Free),
    ("claude-3.5-haiku", PlanTier::Free),
    ("gemini-2.5-flash", PlanTier::Free),
    ("google-gaia", PlanTier::Free),
    // Advanced models
    ("gpt-4.1", PlanTier::Lite),
    ("gpt-4o", PlanTier::Lite),
    ("claude-4-sonnet", PlanTier::Lite),
    ("gemini-2.5-pro", PlanTier::Lite),
    ("llama-4-maverick", PlanTier::Lite),
    ("perplexity-sonar", PlanTier::Lite),
    ("sabia-3.1", PlanTier::Lite),
    ("mistral-large-2", PlanTier::Lite),
    ("grok-3", PlanTier::Lite),
    ("amazon-nova-premier", PlanTier::Lite),
    // Reasoning models
    ("grok-4", PlanTier::Pro),
    ("o3", PlanTier::Pro),
    ("o4-mini", PlanTier::Pro),
    ("qwen-qwq", PlanTier::Pro),
    ("claude-4-sonnet-thinking", PlanTier::Pro),
    ("deepseek-r1-small", PlanTier::Pro),
    ("deepseek-r1", PlanTier::Pro),
];

/// Cheapest tier allowed to call `model`, if the model is in the catalog
pub fn minimum_tier_for_model(model: &str) -> Option<PlanTier> {
    MODEL_CATALOG
        .iter()
        .find(|(id, _)| id.eq_ignore_ascii_case(model))
        .map(|(_, tier)| *tier)
}

/// Models a tier may call, in catalog order
pub fn models_for_tier(tier: PlanTier) -> Vec<&'static str> {
    MODEL_CATALOG
        .iter()
        .filter(|(_, required)| tier >= *required)
        .map(|(id, _)| *id)
        .collect()
}

// =============================================================================
// Database Models
// =============================================================================

/// User billing state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub plan: PlanTier,
    pub credit_balance: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Subscription record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub plan: PlanTier,
    pub status: SubscriptionStatus,
    pub provider: PaymentProvider,
    /// Provider-side reference (payment id or provider subscription id)
    pub external_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub cancelled_at: Option<OffsetDateTime>,
}

/// Payment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub user_id: UserId,
    pub provider: PaymentProvider,
    pub external_id: String,
    pub plan: PlanTier,
    pub billing_cycle: BillingCycle,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// One metered AI call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub model_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
    pub messages: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    /// Cost in millionths of a real (BRL)
    pub cost_micros: i64,
}

/// Credit ledger entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CreditKind {
    Purchase,
    Consumption,
    Bonus,
    Refund,
}

impl CreditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Consumption => "consumption",
            Self::Bonus => "bonus",
            Self::Refund => "refund",
        }
    }
}

impl std::str::FromStr for CreditKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "purchase" => Ok(Self::Purchase),
            "consumption" => Ok(Self::Consumption),
            "bonus" => Ok(Self::Bonus),
            "refund" => Ok(Self::Refund),
            _ => Err(format!("Invalid credit kind: {}", s)),
        }
    }
}

/// Append-only credit ledger entry. `amount` is negative for consumption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: UserId,
    pub kind: CreditKind,
    pub amount: i64,
    pub description: String,
    pub reference_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
