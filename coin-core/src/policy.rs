//! Entitlement Policy
//!
//! Pure decision functions over a snapshot of one user's state: cap
//! resolution, the lazy periodic reset and the administrative adjustments.
//! Nothing here touches storage; the store applies whatever these return
//! inside a single atomic unit.
//!
//! # Reset rules
//!
//! Once a full cycle has elapsed since `last_coin_reset`:
//!
//! | State                          | New balance                       |
//! |--------------------------------|-----------------------------------|
//! | admin role                     | admin grant                       |
//! | active unlimited plan          | balance + allocation (additive)   |
//! | active capped plan             | min(allocation, cap) (replacement)|
//! | no subscription                | min(free grant, cap)              |
//!
//! Within a cycle no grant is issued, but a balance above the current cap is
//! clamped down to it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::catalog::{Plan, PlanCatalog};
use crate::config::LedgerConfig;
use crate::types::{CoinCap, Subscription, UserAccount};

/// How a periodic grant was computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    Admin,
    Additive,
    Replacement,
    Free,
}

/// Result of evaluating the periodic reset
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetOutcome {
    /// A cycle elapsed and a grant was applied
    Granted {
        kind: GrantKind,
        previous: u64,
        coins: u64,
    },
    /// No cycle elapsed; the balance exceeded the cap and was clamped
    Clamped { previous: u64, coins: u64 },
    /// Nothing to do
    Unchanged,
}

impl ResetOutcome {
    /// Whether the account must be persisted
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Entitlement policy: configuration plus the plan catalog
#[derive(Debug, Clone)]
pub struct EntitlementPolicy {
    config: LedgerConfig,
    catalog: Arc<PlanCatalog>,
}

impl EntitlementPolicy {
    pub fn new(config: LedgerConfig, catalog: Arc<PlanCatalog>) -> Self {
        Self { config, catalog }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Length of one cycle
    pub fn cycle(&self) -> Duration {
        Duration::days(i64::from(self.config.cycle_days))
    }

    /// Catalog plan behind an active subscription
    ///
    /// A subscription naming a plan missing from the catalog resolves to
    /// `None` and is treated as no subscription.
    pub fn active_plan(&self, active: Option<&Subscription>) -> Option<&Plan> {
        let sub = active.filter(|s| s.is_active())?;
        let plan = self.catalog.get(&sub.plan_id);
        if plan.is_none() {
            tracing::warn!(
                "Active subscription references unknown plan: user={}, plan={}",
                sub.user_id,
                sub.plan_id
            );
        }
        plan
    }

    /// Resolve the maximum balance a user may hold
    pub fn resolve_cap(&self, account: &UserAccount, active: Option<&Subscription>) -> CoinCap {
        if account.role.is_privileged() {
            return CoinCap::Unbounded;
        }

        match self.active_plan(active) {
            Some(plan) if plan.unlimited_cap => CoinCap::Unbounded,
            Some(plan) => CoinCap::Limited(self.config.caps.tier_cap(plan.tier)),
            None => CoinCap::Limited(self.config.caps.free_cap),
        }
    }

    /// Whether a full cycle has elapsed since the last reset
    pub fn is_reset_due(&self, account: &UserAccount, now: DateTime<Utc>) -> bool {
        account.days_since_reset(now) >= i64::from(self.config.cycle_days)
    }

    /// When the next periodic grant becomes due
    pub fn next_reset_at(&self, account: &UserAccount) -> DateTime<Utc> {
        account.last_coin_reset + self.cycle()
    }

    /// Evaluate the periodic reset against a snapshot
    ///
    /// Returns the account as it must be stored together with what happened.
    /// Pure in its inputs, so calling it twice within a cycle yields the same
    /// balance.
    pub fn apply_reset(
        &self,
        account: &UserAccount,
        active: Option<&Subscription>,
        now: DateTime<Utc>,
    ) -> (UserAccount, ResetOutcome) {
        let cap = self.resolve_cap(account, active);
        let previous = account.coins;
        let mut next = account.clone();

        if self.is_reset_due(account, now) {
            let (kind, grant) = self.cycle_grant(account, active, cap);
            next.coins = cap.clamp(grant);
            next.last_coin_reset = now;
            next.updated_at = now;
            let outcome = ResetOutcome::Granted {
                kind,
                previous,
                coins: next.coins,
            };
            return (next, outcome);
        }

        if cap.is_exceeded_by(previous) {
            next.coins = cap.clamp(previous);
            next.updated_at = now;
            let outcome = ResetOutcome::Clamped {
                previous,
                coins: next.coins,
            };
            return (next, outcome);
        }

        (next, ResetOutcome::Unchanged)
    }

    /// Unclamped balance produced by a cycle grant
    fn cycle_grant(
        &self,
        account: &UserAccount,
        active: Option<&Subscription>,
        cap: CoinCap,
    ) -> (GrantKind, u64) {
        if account.role.is_privileged() {
            return (GrantKind::Admin, self.config.grants.admin_grant);
        }

        match (self.active_plan(active), active) {
            (Some(plan), Some(sub)) if plan.unlimited_cap => (
                GrantKind::Additive,
                account.coins.saturating_add(sub.coin_allocation),
            ),
            (Some(_), Some(sub)) => (GrantKind::Replacement, cap.clamp(sub.coin_allocation)),
            _ => (GrantKind::Free, self.config.grants.free_grant),
        }
    }

    /// Administrative credit: min(current + amount, cap)
    pub fn admin_credit(&self, current: u64, amount: u64, cap: CoinCap) -> u64 {
        cap.clamp(current.saturating_add(amount))
    }

    /// Administrative debit: max(current - amount, 0)
    pub fn admin_debit(&self, current: u64, amount: u64) -> u64 {
        current.saturating_sub(amount)
    }

    /// Administrative set: clamp(amount, 0, cap)
    pub fn admin_set(&self, amount: u64, cap: CoinCap) -> u64 {
        cap.clamp(amount)
    }

    /// Clamp for the batch sweep; `None` when the balance already complies
    pub fn sweep_clamp(&self, account: &UserAccount, active: Option<&Subscription>) -> Option<u64> {
        let cap = self.resolve_cap(account, active);
        cap.is_exceeded_by(account.coins)
            .then(|| cap.clamp(account.coins))
    }
}
