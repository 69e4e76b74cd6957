//! Prepaid credit ledger
//!
//! Balance lives on the user row; every change is appended to
//! `credit_transactions` in the same transaction.

use std::sync::Arc;

use innerai_shared::{CreditKind, CreditTransaction, UserId};
use serde::Serialize;

use crate::error::{BillingError, BillingResult};
use crate::store::{BillingStore, NewCreditTransaction};

pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
pub const MAX_HISTORY_LIMIT: i64 = 200;

/// Purchasable credit package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreditPackage {
    pub id: &'static str,
    pub name: &'static str,
    pub credits: i64,
    /// Price in BRL cents
    pub price_cents: i64,
}

pub const CREDIT_PACKAGES: &[CreditPackage] = &[
    CreditPackage {
        id: "basic",
        name: "Pacote Básico",
        credits: 5_000,
        price_cents: 5_900,
    },
    CreditPackage {
        id: "popular",
        name: "Pacote Popular",
        credits: 10_000,
        price_cents: 9_900,
    },
    CreditPackage {
        id: "premium",
        name: "Pacote Premium",
        credits: 20_000,
        price_cents: 15_900,
    },
];

/// Result of funding a balance from a paid checkout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CreditGrant {
    Granted { credits: i64, balance: i64 },
    /// This payment reference already funded the balance
    Duplicate,
}

/// Credit ledger service
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn BillingStore>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn BillingStore>) -> Self {
        Self { store }
    }

    pub fn packages(&self) -> &'static [CreditPackage] {
        CREDIT_PACKAGES
    }

    pub fn package(&self, id: &str) -> Option<&'static CreditPackage> {
        CREDIT_PACKAGES.iter().find(|p| p.id == id)
    }

    pub async fn balance(&self, user_id: UserId) -> BillingResult<i64> {
        self.store
            .get_user(user_id)
            .await?
            .map(|u| u.credit_balance)
            .ok_or(BillingError::UserNotFound(user_id))
    }

    /// Whether the user could spend `needed` credits right now
    pub async fn has_available(&self, user_id: UserId, needed: i64) -> BillingResult<bool> {
        Ok(self.balance(user_id).await? >= needed)
    }

    /// Debit credits; fails without writing anything if the balance is short
    pub async fn consume(
        &self,
        user_id: UserId,
        amount: i64,
        description: &str,
        reference_id: Option<String>,
    ) -> BillingResult<i64> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "credit amount must be positive, got {}",
                amount
            )));
        }

        let balance = self
            .store
            .apply_credit(&NewCreditTransaction {
                user_id,
                kind: CreditKind::Consumption,
                amount: -amount,
                description: description.to_string(),
                reference_id,
            })
            .await?;

        tracing::debug!(user_id = %user_id, amount, balance, "Credits consumed");
        Ok(balance)
    }

    /// Credit the account (purchase, bonus or refund)
    pub async fn add(
        &self,
        user_id: UserId,
        amount: i64,
        kind: CreditKind,
        description: &str,
        reference_id: Option<String>,
    ) -> BillingResult<i64> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "credit amount must be positive, got {}",
                amount
            )));
        }
        if kind == CreditKind::Consumption {
            return Err(BillingError::InvalidAmount(
                "use consume() to debit credits".to_string(),
            ));
        }

        let balance = self
            .store
            .apply_credit(&NewCreditTransaction {
                user_id,
                kind,
                amount,
                description: description.to_string(),
                reference_id,
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            amount,
            kind = kind.as_str(),
            balance,
            "Credits added"
        );
        Ok(balance)
    }

    /// Credit a purchased package; replays of the same payment reference are no-ops
    pub async fn purchase(
        &self,
        user_id: UserId,
        package: &CreditPackage,
        reference_id: &str,
    ) -> BillingResult<CreditGrant> {
        if reference_id.trim().is_empty() {
            return Err(BillingError::InvalidAmount(
                "credit purchase needs a payment reference".to_string(),
            ));
        }

        let granted = self
            .store
            .grant_credit_once(&NewCreditTransaction {
                user_id,
                kind: CreditKind::Purchase,
                amount: package.credits,
                description: package.name.to_string(),
                reference_id: Some(reference_id.to_string()),
            })
            .await?;

        match granted {
            Some(balance) => {
                tracing::info!(
                    user_id = %user_id,
                    package = package.id,
                    credits = package.credits,
                    balance,
                    reference_id,
                    "Credit package purchased"
                );
                Ok(CreditGrant::Granted {
                    credits: package.credits,
                    balance,
                })
            }
            None => {
                tracing::debug!(user_id = %user_id, reference_id, "Credit purchase already applied");
                Ok(CreditGrant::Duplicate)
            }
        }
    }

    /// Newest-first ledger page; `limit` is clamped to `1..=MAX_HISTORY_LIMIT`
    pub async fn history(
        &self,
        user_id: UserId,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> BillingResult<Vec<CreditTransaction>> {
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        self.store.credit_history(user_id, limit, offset).await
    }
}
