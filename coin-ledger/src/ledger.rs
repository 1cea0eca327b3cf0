//! Coin Ledger
//!
//! Balance-affecting operations over a [`LedgerStore`]. Each operation
//! captures `now` once, then runs a pure decision against the store's
//! snapshot inside a single unit of work.
//!
//! # Operations
//!
//! - Lazy periodic reset on every balance read and debit
//! - User debits with an all-or-nothing balance check
//! - Administrative credit, debit and set
//! - Subscription change and removal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use coin_core::{
    Clock, CoinCap, EntitlementPolicy, LedgerConfig, LedgerError, LedgerResult, PlanCatalog,
    ResetOutcome, Role, Subscription, SystemClock, UserAccount, UserId,
};
use coin_store::{AccountSnapshot, LedgerStore, StoreStats, Transition, WriteSet};

use crate::metrics::LedgerMetrics;

/// Account view returned to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    pub user_id: UserId,
    pub role: Role,
    pub coins: u64,
    pub cap: CoinCap,
    /// Plan of the active subscription, if any
    pub plan_id: Option<String>,
    pub last_coin_reset: DateTime<Utc>,
    /// When the next periodic grant becomes due
    pub next_reset_at: DateTime<Utc>,
}

/// Coin ledger service
pub struct CoinLedger<S: LedgerStore> {
    pub(crate) store: Arc<S>,
    pub(crate) policy: EntitlementPolicy,
    clock: Arc<dyn Clock>,
    pub(crate) metrics: Arc<LedgerMetrics>,
}

impl<S: LedgerStore> CoinLedger<S> {
    /// Create a ledger over a store
    ///
    /// Rejects configurations that fail validation against the catalog.
    pub fn new(store: Arc<S>, config: LedgerConfig, catalog: Arc<PlanCatalog>) -> LedgerResult<Self> {
        config.validate_with_catalog(&catalog)?;

        Ok(Self {
            store,
            policy: EntitlementPolicy::new(config, catalog),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(LedgerMetrics::new()),
        })
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn policy(&self) -> &EntitlementPolicy {
        &self.policy
    }

    pub fn metrics(&self) -> &LedgerMetrics {
        &self.metrics
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) async fn unit<T, F>(&self, user_id: &UserId, decide: F) -> LedgerResult<T>
    where
        T: Send,
        F: Fn(&AccountSnapshot) -> LedgerResult<Transition<T>> + Send + Sync,
    {
        self.store.transact(user_id, decide).await
    }

    fn record_reset(&self, user_id: &UserId, outcome: &ResetOutcome) {
        self.metrics.reset_evaluated(outcome);
        match outcome {
            ResetOutcome::Granted {
                kind,
                previous,
                coins,
            } => {
                tracing::debug!(
                    "Cycle grant applied: user={}, kind={:?}, previous={}, coins={}",
                    user_id,
                    kind,
                    previous,
                    coins
                );
            }
            ResetOutcome::Clamped { previous, coins } => {
                tracing::debug!(
                    "Balance clamped to cap: user={}, previous={}, coins={}",
                    user_id,
                    previous,
                    coins
                );
            }
            ResetOutcome::Unchanged => {}
        }
    }

    // ==================== Reads ====================

    /// Resolve the maximum balance a user may hold
    pub async fn resolve_cap(&self, user_id: &UserId) -> LedgerResult<CoinCap> {
        let snapshot = self.store.snapshot(user_id).await?;
        Ok(self
            .policy
            .resolve_cap(&snapshot.account, snapshot.active.as_ref()))
    }

    /// Apply the periodic reset if due and return the stored record
    pub async fn refresh_account(&self, user_id: &UserId) -> LedgerResult<UserAccount> {
        let now = self.now();
        let policy = &self.policy;

        let (account, outcome) = self
            .unit(user_id, |snap| {
                let (next, outcome) = policy.apply_reset(&snap.account, snap.active.as_ref(), now);
                let writes = if outcome.is_mutation() {
                    WriteSet::account(next.clone())
                } else {
                    WriteSet::none()
                };
                Ok(Transition::new(writes, (next, outcome)))
            })
            .await?;

        self.record_reset(user_id, &outcome);
        Ok(account)
    }

    /// Current balance, after the lazy reset
    pub async fn get_balance(&self, user_id: &UserId) -> LedgerResult<u64> {
        Ok(self.refresh_account(user_id).await?.coins)
    }

    /// Balance, cap, plan and reset schedule in one consistent read
    pub async fn account_summary(&self, user_id: &UserId) -> LedgerResult<AccountSummary> {
        let now = self.now();
        let policy = &self.policy;

        let (summary, outcome) = self
            .unit(user_id, |snap| {
                let active = snap.active.as_ref();
                let (next, outcome) = policy.apply_reset(&snap.account, active, now);
                let summary = AccountSummary {
                    user_id: next.user_id.clone(),
                    role: next.role,
                    coins: next.coins,
                    cap: policy.resolve_cap(&next, active),
                    plan_id: policy.active_plan(active).map(|plan| plan.id.clone()),
                    last_coin_reset: next.last_coin_reset,
                    next_reset_at: policy.next_reset_at(&next),
                };
                let writes = if outcome.is_mutation() {
                    WriteSet::account(next)
                } else {
                    WriteSet::none()
                };
                Ok(Transition::new(writes, (summary, outcome)))
            })
            .await?;

        self.record_reset(user_id, &outcome);
        Ok(summary)
    }

    pub async fn active_subscription(&self, user_id: &UserId) -> LedgerResult<Option<Subscription>> {
        self.ensure_user(user_id).await?;
        Ok(self.store.active_subscription(user_id).await?)
    }

    /// All subscription records of a user, newest first
    pub async fn subscription_history(&self, user_id: &UserId) -> LedgerResult<Vec<Subscription>> {
        self.ensure_user(user_id).await?;
        Ok(self.store.subscription_history(user_id).await?)
    }

    pub async fn store_stats(&self) -> LedgerResult<StoreStats> {
        Ok(self.store.get_stats().await?)
    }

    async fn ensure_user(&self, user_id: &UserId) -> LedgerResult<()> {
        match self.store.get_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(LedgerError::UserNotFound(user_id.clone())),
        }
    }

    // ==================== Debits ====================

    /// Spend coins on a user action
    ///
    /// The reset, the balance check and the write commit together; a declined
    /// debit leaves the store untouched.
    pub async fn debit(&self, user_id: &UserId, amount: u64) -> LedgerResult<UserAccount> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount(
                "debit amount must be positive".to_string(),
            ));
        }

        let now = self.now();
        let policy = &self.policy;

        let result = self
            .unit(user_id, |snap| {
                let (mut next, outcome) =
                    policy.apply_reset(&snap.account, snap.active.as_ref(), now);
                if next.coins < amount {
                    return Err(LedgerError::insufficient(amount, next.coins));
                }
                next.coins -= amount;
                next.updated_at = now;
                Ok(Transition::new(WriteSet::account(next.clone()), (next, outcome)))
            })
            .await;

        match result {
            Ok((account, outcome)) => {
                self.record_reset(user_id, &outcome);
                self.metrics.debit_succeeded(amount);
                tracing::debug!(
                    "Debit applied: user={}, amount={}, balance={}",
                    user_id,
                    amount,
                    account.coins
                );
                Ok(account)
            }
            Err(err) => {
                if err.is_declined() {
                    self.metrics.debit_declined();
                    tracing::debug!("Debit declined: user={}, {}", user_id, err);
                }
                Err(err)
            }
        }
    }

    // ==================== Administrative adjustments ====================

    /// Add coins, clamped to the cap; returns the new balance
    pub async fn admin_credit(&self, user_id: &UserId, amount: u64) -> LedgerResult<u64> {
        let policy = &self.policy;
        self.adjust(user_id, "credit", amount, |current, cap| {
            policy.admin_credit(current, amount, cap)
        })
        .await
    }

    /// Remove coins, flooring at zero; returns the new balance
    pub async fn admin_debit(&self, user_id: &UserId, amount: u64) -> LedgerResult<u64> {
        let policy = &self.policy;
        self.adjust(user_id, "debit", amount, |current, _| {
            policy.admin_debit(current, amount)
        })
        .await
    }

    /// Overwrite the balance, clamped to the cap; returns the new balance
    pub async fn admin_set_balance(&self, user_id: &UserId, amount: u64) -> LedgerResult<u64> {
        let policy = &self.policy;
        self.adjust(user_id, "set", amount, |_, cap| policy.admin_set(amount, cap))
            .await
    }

    async fn adjust<F>(&self, user_id: &UserId, action: &str, amount: u64, op: F) -> LedgerResult<u64>
    where
        F: Fn(u64, CoinCap) -> u64 + Send + Sync,
    {
        let now = self.now();
        let policy = &self.policy;
        let op = &op;

        let (previous, coins) = self
            .unit(user_id, |snap| {
                let cap = policy.resolve_cap(&snap.account, snap.active.as_ref());
                let previous = snap.account.coins;
                let coins = op(previous, cap);
                if coins == previous {
                    return Ok(Transition::read((previous, coins)));
                }

                let mut next = snap.account.clone();
                next.coins = coins;
                next.updated_at = now;
                Ok(Transition::new(WriteSet::account(next), (previous, coins)))
            })
            .await?;

        self.metrics.admin_adjusted();
        tracing::info!(
            "Admin {}: user={}, amount={}, previous={}, balance={}",
            action,
            user_id,
            amount,
            previous,
            coins
        );
        Ok(coins)
    }

    // ==================== Subscriptions ====================

    /// Switch a user to a plan
    ///
    /// Cancels the current subscription, activates the new one and credits
    /// the plan allocation without clamping, all in one unit of work.
    pub async fn change_subscription(&self, user_id: &UserId, plan_id: &str) -> LedgerResult<Subscription> {
        let plan = self
            .policy
            .catalog()
            .get(plan_id)
            .ok_or_else(|| LedgerError::UnknownPlan(plan_id.to_string()))?;

        let now = self.now();
        let subscription =
            Subscription::activate(user_id.clone(), plan, now, self.policy.config().cycle_days);

        let (previous_plan, coins) = self
            .unit(user_id, |snap| {
                let mut writes = WriteSet::none().with_insert(subscription.clone());
                if let Some(active) = &snap.active {
                    writes = writes.with_cancel(active.canceled(now));
                }

                let mut next = snap.account.clone();
                next.coins = next.coins.saturating_add(subscription.coin_allocation);
                next.last_coin_reset = now;
                next.updated_at = now;
                let coins = next.coins;
                writes.account = Some(next);

                let previous_plan = snap.active.as_ref().map(|s| s.plan_id.clone());
                Ok(Transition::new(writes, (previous_plan, coins)))
            })
            .await?;

        self.metrics.subscription_changed();
        tracing::info!(
            "Subscription changed: user={}, from={}, to={}, credited={}, balance={}",
            user_id,
            previous_plan.as_deref().unwrap_or("none"),
            plan_id,
            subscription.coin_allocation,
            coins
        );
        Ok(subscription)
    }

    /// Cancel the active subscription, if any; the balance is untouched
    pub async fn remove_subscription(&self, user_id: &UserId) -> LedgerResult<Option<Subscription>> {
        let now = self.now();

        let canceled = self
            .unit(user_id, |snap| match &snap.active {
                Some(active) => {
                    let canceled = active.canceled(now);
                    Ok(Transition::new(
                        WriteSet::none().with_cancel(canceled.clone()),
                        Some(canceled),
                    ))
                }
                None => Ok(Transition::read(None)),
            })
            .await?;

        if let Some(sub) = &canceled {
            self.metrics.subscription_removed();
            tracing::info!("Subscription removed: user={}, plan={}", user_id, sub.plan_id);
        }
        Ok(canceled)
    }
}
