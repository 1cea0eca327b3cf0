//! Batch cap sweep
//!
//! Clamps every stored balance down to its current cap. Used after catalog
//! or cap changes; the lazy reset already covers individual reads.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use coin_core::{LedgerResult, UserId};
use coin_store::{LedgerStore, Transition, WriteSet};

use crate::ledger::CoinLedger;

/// Sweep result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Users visited
    pub examined: u64,
    /// Users whose balance was lowered
    pub adjusted: u64,
    /// Users whose unit of work failed
    pub failed: u64,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}

impl<S: LedgerStore> CoinLedger<S> {
    /// Clamp all balances to their caps
    ///
    /// Per-user failures are logged and counted; only failing to enumerate
    /// users aborts the sweep.
    pub async fn sweep_caps(&self) -> LedgerResult<SweepReport> {
        let user_ids = self.store.list_user_ids().await?;
        let concurrency = self.policy.config().sweep_concurrency.max(1);

        let results: Vec<(UserId, LedgerResult<bool>)> = stream::iter(user_ids)
            .map(|user_id| async move {
                let result = self.clamp_user(&user_id).await;
                (user_id, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = SweepReport::default();
        for (user_id, result) in results {
            report.examined += 1;
            match result {
                Ok(true) => report.adjusted += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!("Cap sweep failed for user {}: {}", user_id, e);
                }
            }
        }

        self.metrics.sweep_completed(report.adjusted, report.failed);
        tracing::info!(
            "Cap sweep complete: examined={}, adjusted={}, failed={}",
            report.examined,
            report.adjusted,
            report.failed
        );
        Ok(report)
    }

    async fn clamp_user(&self, user_id: &UserId) -> LedgerResult<bool> {
        let now = self.now();
        let policy = &self.policy;

        self.unit(user_id, |snap| {
            match policy.sweep_clamp(&snap.account, snap.active.as_ref()) {
                Some(coins) => {
                    let mut next = snap.account.clone();
                    next.coins = coins;
                    next.updated_at = now;
                    Ok(Transition::new(WriteSet::account(next), true))
                }
                None => Ok(Transition::read(false)),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use coin_core::{CapConfig, LedgerConfig, PlanCatalog, Role, Subscription, UserAccount};
    use coin_store::{AccountSnapshot, MemoryStore, StoreError, StoreResult, StoreStats};
    use std::sync::Arc;

    /// Memory store whose units of work fail for one user
    struct BrokenUserStore {
        inner: MemoryStore,
        broken: UserId,
    }

    #[async_trait]
    impl LedgerStore for BrokenUserStore {
        async fn insert_user(&self, account: &UserAccount) -> StoreResult<()> {
            self.inner.insert_user(account).await
        }

        async fn get_user(&self, user_id: &UserId) -> StoreResult<Option<UserAccount>> {
            self.inner.get_user(user_id).await
        }

        async fn list_user_ids(&self) -> StoreResult<Vec<UserId>> {
            self.inner.list_user_ids().await
        }

        async fn active_subscription(&self, user_id: &UserId) -> StoreResult<Option<Subscription>> {
            self.inner.active_subscription(user_id).await
        }

        async fn subscription_history(&self, user_id: &UserId) -> StoreResult<Vec<Subscription>> {
            self.inner.subscription_history(user_id).await
        }

        async fn snapshot(&self, user_id: &UserId) -> StoreResult<AccountSnapshot> {
            self.inner.snapshot(user_id).await
        }

        async fn transact<T, E, F>(&self, user_id: &UserId, decide: F) -> Result<T, E>
        where
            T: Send,
            E: From<StoreError> + Send,
            F: Fn(&AccountSnapshot) -> Result<Transition<T>, E> + Send + Sync,
        {
            if user_id == &self.broken {
                return Err(E::from(StoreError::Database("disk unavailable".to_string())));
            }
            self.inner.transact(user_id, decide).await
        }

        async fn get_stats(&self) -> StoreResult<StoreStats> {
            self.inner.get_stats().await
        }
    }

    #[tokio::test]
    async fn test_sweep_clamps_over_cap_balances() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for (id, coins, role) in [
            ("a", 10, Role::Freelancer),
            ("b", 90, Role::Client),
            ("c", 5000, Role::Admin),
        ] {
            let account = UserAccount::new(id, role, now).with_coins(coins);
            store.insert_user(&account).await.unwrap();
        }

        let ledger = CoinLedger::new(
            store.clone(),
            LedgerConfig::default(),
            Arc::new(PlanCatalog::default()),
        )
        .unwrap();

        let report = ledger.sweep_caps().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                examined: 3,
                adjusted: 1,
                failed: 0
            }
        );

        let b = store.get_user(&UserId::new("b")).await.unwrap().unwrap();
        assert_eq!(b.coins, 40);

        // second pass finds nothing to do
        assert_eq!(ledger.sweep_caps().await.unwrap().adjusted, 0);
        assert_eq!(ledger.metrics().snapshot().sweeps, 2);
    }

    #[tokio::test]
    async fn test_sweep_after_cap_reduction() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        for i in 0..20 {
            let account = UserAccount::new(format!("user-{i}"), Role::Freelancer, now).with_coins(35);
            store.insert_user(&account).await.unwrap();
        }

        let caps = CapConfig {
            free_cap: 30,
            ..CapConfig::default()
        };
        let mut config = LedgerConfig::default().with_caps(caps);
        config.sweep_concurrency = 3;
        let ledger =
            CoinLedger::new(store.clone(), config, Arc::new(PlanCatalog::default())).unwrap();

        let report = ledger.sweep_caps().await.unwrap();
        assert_eq!(report.examined, 20);
        assert_eq!(report.adjusted, 20);
        assert!(report.is_clean());
        assert_eq!(ledger.store_stats().await.unwrap().total_coins, 20 * 30);
    }

    #[tokio::test]
    async fn test_sweep_counts_failed_user_and_continues() {
        let store = Arc::new(BrokenUserStore {
            inner: MemoryStore::new(),
            broken: UserId::new("b"),
        });
        let now = Utc::now();
        for id in ["a", "b", "c"] {
            let account = UserAccount::new(id, Role::Freelancer, now).with_coins(90);
            store.insert_user(&account).await.unwrap();
        }

        let ledger = CoinLedger::new(
            store.clone(),
            LedgerConfig::default(),
            Arc::new(PlanCatalog::default()),
        )
        .unwrap();

        let report = ledger.sweep_caps().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                examined: 3,
                adjusted: 2,
                failed: 1
            }
        );
        assert!(!report.is_clean());

        for (id, coins) in [("a", 40), ("b", 90), ("c", 40)] {
            let account = store.get_user(&UserId::new(id)).await.unwrap().unwrap();
            assert_eq!(account.coins, coins, "user {id}");
        }
        assert_eq!(ledger.metrics().snapshot().sweep_failures, 1);
    }
}
