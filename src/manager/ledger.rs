//! Credit ledger: tiered daily replenishment, exact-source deduction and
//! refund, lifetime usage statistics.
//!
//! Deductions draw from the daily bucket first and record exactly how much
//! came from each bucket. Refunds reverse a specific receipt, so a failed
//! action can never credit the wrong bucket or grant credits it never took.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::SessionManager;
use crate::config::StoreConfig;
use crate::error::Result;
use crate::session::{ActionKind, DeductReceipt};

/// Tenant classification determining the daily credit allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Standard,
    Vip,
}

impl Tier {
    /// Daily allowance for this tier under `config`.
    pub const fn daily_limit(self, config: &StoreConfig) -> i64 {
        match self {
            Self::Standard => config.daily_limit_standard,
            Self::Vip => config.daily_limit_vip,
        }
    }
}

/// Outcome of [`SessionManager::check_and_charge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// The full amount was drawn; keep the receipt for a possible refund.
    Charged(DeductReceipt),
    /// Balance was short; nothing was drawn.
    InsufficientBalance { balance: i64 },
}

impl ChargeOutcome {
    pub const fn is_charged(&self) -> bool {
        matches!(self, Self::Charged(_))
    }

    /// The receipt, if the charge went through.
    pub fn receipt(&self) -> Option<&DeductReceipt> {
        match self {
            Self::Charged(receipt) => Some(receipt),
            Self::InsufficientBalance { .. } => None,
        }
    }
}

impl SessionManager {
    /// Refresh the tenant's daily allowance if the UTC calendar date has
    /// changed since the last reset. Idempotent within the same day.
    pub async fn check_daily_reset(&self, key: &str, tier: Tier) -> Result<()> {
        let limit = tier.daily_limit(self.config());
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let session = self.session_mut(key, &mut guard).await?;

        if session.apply_daily_reset(limit, Utc::now()) {
            info!(tenant = key, credits = limit, "daily credit reset");
            self.persist(key, &mut guard).await?;
        }
        Ok(())
    }

    /// Spendable balance: daily plus purchased credits.
    pub async fn balance(&self, key: &str) -> Result<i64> {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let session = self.session_mut(key, &mut guard).await?;
        Ok(session.balance())
    }

    /// All-or-nothing deduction, daily bucket first. A failure receipt means
    /// nothing was drawn and nothing was persisted.
    pub async fn deduct_credits(&self, key: &str, amount: i64) -> Result<DeductReceipt> {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let session = self.session_mut(key, &mut guard).await?;

        let receipt = session.deduct(amount);
        if receipt.success {
            self.persist(key, &mut guard).await?;
        }
        Ok(receipt)
    }

    /// Reverse a prior successful charge using its receipt: each bucket gets
    /// back exactly what was drawn from it, and the lifetime counters are
    /// walked back (floored at zero).
    ///
    /// A receipt from a failed charge refunds nothing; issuing one is a
    /// caller error and is logged rather than honored.
    pub async fn refund_credits(
        &self,
        key: &str,
        receipt: DeductReceipt,
        kind: ActionKind,
    ) -> Result<()> {
        if !receipt.success {
            warn!(tenant = key, "ignoring refund for a charge that never succeeded");
            return Ok(());
        }

        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let session = self.session_mut(key, &mut guard).await?;

        session.apply_refund(&receipt, kind);
        info!(
            tenant = key,
            daily = receipt.daily_deducted,
            purchased = receipt.purchased_deducted,
            kind = kind.as_str(),
            "refunded credits"
        );

        self.persist(key, &mut guard).await
    }

    /// Record a successful charge in the lifetime counters. Kept separate
    /// from deduction bookkeeping so stats and balances can be audited
    /// against each other.
    pub async fn record_usage(&self, key: &str, cost: i64, kind: ActionKind) -> Result<()> {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let session = self.session_mut(key, &mut guard).await?;

        session.record_usage(cost, kind);
        self.persist(key, &mut guard).await
    }

    /// Composite entry point for callers: run the daily reset, check the
    /// balance, deduct, and record usage, all under one tenant lock with a
    /// single save. Callers must not drive deduct/record separately.
    pub async fn check_and_charge(
        &self,
        key: &str,
        cost: i64,
        kind: ActionKind,
        tier: Tier,
    ) -> Result<ChargeOutcome> {
        let limit = tier.daily_limit(self.config());
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let session = self.session_mut(key, &mut guard).await?;

        let reset = session.apply_daily_reset(limit, Utc::now());
        if reset {
            info!(tenant = key, credits = limit, "daily credit reset");
        }

        let receipt = session.deduct(cost);
        if !receipt.success {
            let balance = session.balance();
            // The reset alone still needs to land on disk.
            if reset {
                self.persist(key, &mut guard).await?;
            }
            return Ok(ChargeOutcome::InsufficientBalance { balance });
        }

        session.record_usage(cost, kind);
        self.persist(key, &mut guard).await?;
        Ok(ChargeOutcome::Charged(receipt))
    }

    /// Top up the non-resetting purchased bucket. Returns the new purchased
    /// balance. Non-positive amounts are ignored.
    pub async fn add_purchased_credits(&self, key: &str, amount: i64) -> Result<i64> {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;
        let session = self.session_mut(key, &mut guard).await?;

        if amount <= 0 {
            return Ok(session.purchased_credits);
        }

        session.purchased_credits += amount;
        let purchased = session.purchased_credits;
        info!(tenant = key, amount, "purchased credits added");

        self.persist(key, &mut guard).await?;
        Ok(purchased)
    }
}

/// Seconds until the next daily reset boundary (00:00 UTC).
pub fn seconds_until_daily_reset(now: DateTime<Utc>) -> i64 {
    match now
        .date_naive()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        Some(midnight) => (midnight.and_utc() - now).num_seconds(),
        None => 0,
    }
}
