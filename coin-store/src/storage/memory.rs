//! In-memory store
//!
//! Thread-safe in-memory implementation, mainly for tests and development.
//! All tables sit behind one mutex so a unit of work is atomic.

use async_trait::async_trait;
use coin_core::{Subscription, UserAccount, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AccountSnapshot, LedgerStore, StoreStats, Transition, WriteSet};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, UserAccount>,
    subscriptions: HashMap<Uuid, Subscription>,
    // user -> active subscription id
    active: HashMap<UserId, Uuid>,
    // user -> subscription ids in insertion order
    history: HashMap<UserId, Vec<Uuid>>,
}

impl Tables {
    fn snapshot(&self, user_id: &UserId) -> StoreResult<AccountSnapshot> {
        let account = self
            .users
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::UserNotFound(user_id.clone()))?;
        let active = self
            .active
            .get(user_id)
            .and_then(|key| self.subscriptions.get(key))
            .cloned();
        Ok(AccountSnapshot { account, active })
    }

    fn apply(&mut self, writes: WriteSet) {
        if let Some(account) = writes.account {
            self.users.insert(account.user_id.clone(), account);
        }

        if let Some(cancel) = writes.cancel {
            self.active.remove(&cancel.user_id);
            self.subscriptions.insert(cancel.subscription_id, cancel);
        }

        if let Some(insert) = writes.insert {
            self.active
                .insert(insert.user_id.clone(), insert.subscription_id);
            self.history
                .entry(insert.user_id.clone())
                .or_default()
                .push(insert.subscription_id);
            self.subscriptions.insert(insert.subscription_id, insert);
        }
    }
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove all data
    pub async fn clear(&self) {
        let mut tables = self.tables.lock().await;
        *tables = Tables::default();
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    // ==================== User records ====================

    async fn insert_user(&self, account: &UserAccount) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.users.contains_key(&account.user_id) {
            return Err(StoreError::duplicate("user", account.user_id.as_str()));
        }
        tables
            .users
            .insert(account.user_id.clone(), account.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> StoreResult<Option<UserAccount>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.get(user_id).cloned())
    }

    async fn list_user_ids(&self) -> StoreResult<Vec<UserId>> {
        let tables = self.tables.lock().await;
        let mut ids: Vec<UserId> = tables.users.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    // ==================== Subscription records ====================

    async fn active_subscription(&self, user_id: &UserId) -> StoreResult<Option<Subscription>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .active
            .get(user_id)
            .and_then(|key| tables.subscriptions.get(key))
            .cloned())
    }

    async fn subscription_history(&self, user_id: &UserId) -> StoreResult<Vec<Subscription>> {
        let tables = self.tables.lock().await;
        let history: Vec<Subscription> = tables
            .history
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| tables.subscriptions.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(history)
    }

    // ==================== Units of work ====================

    async fn snapshot(&self, user_id: &UserId) -> StoreResult<AccountSnapshot> {
        let tables = self.tables.lock().await;
        tables.snapshot(user_id)
    }

    async fn transact<T, E, F>(&self, user_id: &UserId, decide: F) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: Fn(&AccountSnapshot) -> Result<Transition<T>, E> + Send + Sync,
    {
        let mut tables = self.tables.lock().await;
        let snapshot = tables.snapshot(user_id)?;

        let Transition { writes, value } = decide(&snapshot)?;
        writes.validate(&snapshot)?;
        tables.apply(writes);

        Ok(value)
    }

    // ==================== Maintenance ====================

    async fn get_stats(&self) -> StoreResult<StoreStats> {
        let tables = self.tables.lock().await;
        Ok(StoreStats {
            total_users: tables.users.len() as u64,
            total_subscriptions: tables.subscriptions.len() as u64,
            active_subscriptions: tables.active.len() as u64,
            total_coins: tables
                .users
                .values()
                .fold(0u64, |acc, u| acc.saturating_add(u.coins)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use coin_core::{LedgerError, PlanCatalog, Role};

    fn user(id: &str, coins: u64) -> UserAccount {
        UserAccount::new(id, Role::Freelancer, Utc::now()).with_coins(coins)
    }

    #[tokio::test]
    async fn test_memory_user_crud() {
        let store = MemoryStore::new();
        let account = user("u1", 15);

        store.insert_user(&account).await.unwrap();
        assert!(matches!(
            store.insert_user(&account).await,
            Err(StoreError::Duplicate { .. })
        ));

        let loaded = store.get_user(&account.user_id).await.unwrap();
        assert_eq!(loaded, Some(account));
        assert!(store.get_user(&UserId::new("nobody")).await.unwrap().is_none());

        store.insert_user(&user("u0", 0)).await.unwrap();
        let ids = store.list_user_ids().await.unwrap();
        assert_eq!(ids, vec![UserId::new("u0"), UserId::new("u1")]);
    }

    #[tokio::test]
    async fn test_memory_transact_commits_and_aborts() {
        let store = MemoryStore::new();
        let account = user("u1", 10);
        store.insert_user(&account).await.unwrap();

        let balance: Result<u64, LedgerError> = store
            .transact(&account.user_id, |snap| {
                let next = snap.account.clone().with_coins(snap.account.coins + 5);
                Ok(Transition::new(WriteSet::account(next), snap.account.coins + 5))
            })
            .await;
        assert_eq!(balance.unwrap(), 15);

        let aborted: Result<u64, LedgerError> = store
            .transact(&account.user_id, |snap| {
                Err(LedgerError::insufficient(100, snap.account.coins))
            })
            .await;
        assert!(matches!(aborted, Err(LedgerError::InsufficientBalance { .. })));

        let stored = store.get_user(&account.user_id).await.unwrap().unwrap();
        assert_eq!(stored.coins, 15);
    }

    #[tokio::test]
    async fn test_memory_transact_missing_user() {
        let store = MemoryStore::new();
        let result: Result<(), LedgerError> = store
            .transact(&UserId::new("ghost"), |_| Ok(Transition::read(())))
            .await;
        assert_eq!(result, Err(LedgerError::UserNotFound(UserId::new("ghost"))));
    }

    #[tokio::test]
    async fn test_memory_subscription_switch() {
        let store = MemoryStore::new();
        let account = user("u1", 0);
        store.insert_user(&account).await.unwrap();
        let catalog = PlanCatalog::default();
        let start = Utc::now();

        let first = Subscription::activate(account.user_id.clone(), catalog.get("basic").unwrap(), start, 30);
        let inserted: Result<(), LedgerError> = store
            .transact(&account.user_id, |_| {
                Ok(Transition::new(WriteSet::none().with_insert(first.clone()), ()))
            })
            .await;
        inserted.unwrap();

        let later = start + Duration::days(3);
        let second = Subscription::activate(account.user_id.clone(), catalog.get("pro").unwrap(), later, 30);
        let switched: Result<(), LedgerError> = store
            .transact(&account.user_id, |snap| {
                let old = snap.active.as_ref().unwrap().canceled(later);
                Ok(Transition::new(
                    WriteSet::none().with_cancel(old).with_insert(second.clone()),
                    (),
                ))
            })
            .await;
        switched.unwrap();

        let active = store.active_subscription(&account.user_id).await.unwrap().unwrap();
        assert_eq!(active.plan_id, "pro");

        let history = store.subscription_history(&account.user_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].plan_id, "pro");
        assert_eq!(history[1].canceled_at, Some(later));

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_subscriptions, 2);
        assert_eq!(stats.active_subscriptions, 1);
    }

    #[tokio::test]
    async fn test_memory_history_order_with_equal_timestamps() {
        let store = MemoryStore::new();
        let account = user("u1", 0);
        store.insert_user(&account).await.unwrap();
        let catalog = PlanCatalog::default();
        let at = Utc::now();

        for plan_id in ["basic", "pro", "premium", "elite"] {
            let next = Subscription::activate(account.user_id.clone(), catalog.get(plan_id).unwrap(), at, 30);
            let switched: Result<(), LedgerError> = store
                .transact(&account.user_id, |snap| {
                    let mut writes = WriteSet::none().with_insert(next.clone());
                    if let Some(active) = &snap.active {
                        writes = writes.with_cancel(active.canceled(at));
                    }
                    Ok(Transition::new(writes, ()))
                })
                .await;
            switched.unwrap();
        }

        let history = store.subscription_history(&account.user_id).await.unwrap();
        let plans: Vec<&str> = history.iter().map(|s| s.plan_id.as_str()).collect();
        assert_eq!(plans, vec!["elite", "premium", "pro", "basic"]);
        assert!(history[0].is_active());
    }
}
