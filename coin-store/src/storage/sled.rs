//! Sled persistent store
//!
//! Persistent implementation on the sled embedded database. A unit of work is
//! a multi-tree sled transaction over the users, subscriptions and active
//! index trees; sled retries the decision function on conflict.

use async_trait::async_trait;
use coin_core::{Subscription, UserAccount, UserId};
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree,
};
use sled::Transactional;
use std::path::Path;

use super::{AccountSnapshot, LedgerStore, StoreConfig, StoreStats, Transition, WriteSet};
use crate::error::{StoreError, StoreResult};

/// Tree names
const USERS_TREE: &str = "users";
const SUBSCRIPTIONS_TREE: &str = "subscriptions";
const ACTIVE_INDEX_TREE: &str = "active_subscriptions";

/// Sled persistent store
#[derive(Debug, Clone)]
pub struct SledStore {
    db: sled::Db,
    users: sled::Tree,
    // key: user id, 0x00, big-endian insertion sequence
    subscriptions: sled::Tree,
    // user id -> subscriptions key of the active record
    active_index: sled::Tree,
    flush_on_commit: bool,
}

impl SledStore {
    /// Create a store from configuration; an empty data dir opens a temporary database
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let sled_config = sled::Config::new()
            .cache_capacity(config.cache_capacity)
            .flush_every_ms(config.flush_every_ms);
        let sled_config = if config.data_dir.is_empty() {
            sled_config.temporary(true)
        } else {
            sled_config.path(&config.data_dir)
        };
        let db = sled_config
            .open()
            .map_err(|e| StoreError::Database(format!("Failed to open sled db: {}", e)))?;

        Self::from_db(db, config.flush_on_commit)
    }

    /// Open or create a database at `path` with default settings
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::new(&StoreConfig::default().with_data_dir(path))
    }

    fn from_db(db: sled::Db, flush_on_commit: bool) -> StoreResult<Self> {
        let users = db
            .open_tree(USERS_TREE)
            .map_err(|e| StoreError::Database(format!("Failed to open users tree: {}", e)))?;
        let subscriptions = db.open_tree(SUBSCRIPTIONS_TREE).map_err(|e| {
            StoreError::Database(format!("Failed to open subscriptions tree: {}", e))
        })?;
        let active_index = db.open_tree(ACTIVE_INDEX_TREE).map_err(|e| {
            StoreError::Database(format!("Failed to open active index tree: {}", e))
        })?;

        Ok(Self {
            db,
            users,
            subscriptions,
            active_index,
            flush_on_commit,
        })
    }

    /// Flush to disk
    pub async fn flush(&self) -> StoreResult<()> {
        self.db
            .flush_async()
            .await
            .map_err(|e| StoreError::Database(format!("Failed to flush db: {}", e)))?;
        Ok(())
    }

    // ==================== Helpers ====================

    fn serialize<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
        serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn user_key(user_id: &UserId) -> Vec<u8> {
        user_id.as_str().as_bytes().to_vec()
    }

    fn subscription_prefix(user_id: &UserId) -> Vec<u8> {
        let mut key = Self::user_key(user_id);
        key.push(0);
        key
    }

    fn subscription_key(user_id: &UserId, seq: u64) -> Vec<u8> {
        let mut key = Self::subscription_prefix(user_id);
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn load_active(&self, user_id: &UserId) -> StoreResult<Option<Subscription>> {
        let Some(sub_key) = self.active_index.get(Self::user_key(user_id))? else {
            return Ok(None);
        };
        match self.subscriptions.get(sub_key)? {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read the snapshot inside a transaction
    fn tx_snapshot(
        users: &TransactionalTree,
        subscriptions: &TransactionalTree,
        active_index: &TransactionalTree,
        user_id: &UserId,
    ) -> Result<AccountSnapshot, ConflictableTransactionError<StoreError>> {
        let user_key = Self::user_key(user_id);
        let account_bytes = users
            .get(&user_key)?
            .ok_or_else(|| ConflictableTransactionError::Abort(StoreError::UserNotFound(user_id.clone())))?;
        let account = Self::deserialize(&account_bytes).map_err(ConflictableTransactionError::Abort)?;

        let active = match active_index.get(&user_key)? {
            Some(sub_key) => match subscriptions.get(sub_key)? {
                Some(bytes) => Some(
                    Self::deserialize(&bytes).map_err(ConflictableTransactionError::Abort)?,
                ),
                None => None,
            },
            None => None,
        };

        Ok(AccountSnapshot { account, active })
    }

    /// Apply a validated write set inside a transaction
    ///
    /// `seq` keys the inserted subscription, if any.
    fn tx_apply(
        users: &TransactionalTree,
        subscriptions: &TransactionalTree,
        active_index: &TransactionalTree,
        writes: &WriteSet,
        seq: u64,
    ) -> Result<(), ConflictableTransactionError<StoreError>> {
        if let Some(account) = &writes.account {
            users.insert(Self::user_key(&account.user_id), encode(account)?)?;
        }

        if let Some(cancel) = &writes.cancel {
            let user_key = Self::user_key(&cancel.user_id);
            let sub_key = active_index.get(&user_key)?.ok_or_else(|| {
                ConflictableTransactionError::Abort(StoreError::invalid_write_set(format!(
                    "{} has no active subscription to cancel",
                    cancel.user_id
                )))
            })?;
            subscriptions.insert(sub_key, encode(cancel)?)?;
            active_index.remove(user_key)?;
        }

        if let Some(insert) = &writes.insert {
            let sub_key = Self::subscription_key(&insert.user_id, seq);
            subscriptions.insert(sub_key.clone(), encode(insert)?)?;
            active_index.insert(Self::user_key(&insert.user_id), sub_key)?;
        }

        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ConflictableTransactionError<StoreError>> {
    SledStore::serialize(value).map_err(ConflictableTransactionError::Abort)
}

/// Abort reason of a unit of work
enum Aborted<E> {
    Store(StoreError),
    Decision(E),
}

fn lift<E>(err: ConflictableTransactionError<StoreError>) -> ConflictableTransactionError<Aborted<E>> {
    match err {
        ConflictableTransactionError::Abort(e) => ConflictableTransactionError::Abort(Aborted::Store(e)),
        ConflictableTransactionError::Conflict => ConflictableTransactionError::Conflict,
        ConflictableTransactionError::Storage(e) => ConflictableTransactionError::Storage(e),
    }
}

#[async_trait]
impl LedgerStore for SledStore {
    // ==================== User records ====================

    async fn insert_user(&self, account: &UserAccount) -> StoreResult<()> {
        let key = Self::user_key(&account.user_id);
        let value = Self::serialize(account)?;

        let swapped = self
            .users
            .compare_and_swap(&key, None as Option<&[u8]>, Some(value))
            .map_err(|e| StoreError::Database(format!("Failed to insert user: {}", e)))?;
        if swapped.is_err() {
            return Err(StoreError::duplicate("user", account.user_id.as_str()));
        }

        if self.flush_on_commit {
            self.flush().await?;
        }
        Ok(())
    }

    async fn get_user(&self, user_id: &UserId) -> StoreResult<Option<UserAccount>> {
        match self
            .users
            .get(Self::user_key(user_id))
            .map_err(|e| StoreError::Database(format!("Failed to get user: {}", e)))?
        {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_user_ids(&self) -> StoreResult<Vec<UserId>> {
        let mut ids = Vec::new();

        for item in self.users.iter().keys() {
            let key = item.map_err(|e| StoreError::Database(format!("Failed to iterate users: {}", e)))?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Serialization(format!("Invalid user key: {}", e)))?;
            ids.push(UserId(id));
        }

        Ok(ids)
    }

    // ==================== Subscription records ====================

    async fn active_subscription(&self, user_id: &UserId) -> StoreResult<Option<Subscription>> {
        self.load_active(user_id)
    }

    async fn subscription_history(&self, user_id: &UserId) -> StoreResult<Vec<Subscription>> {
        let mut history = Vec::new();

        // keys ascend by insertion sequence
        for item in self.subscriptions.scan_prefix(Self::subscription_prefix(user_id)).rev() {
            let (_, value) = item.map_err(|e| {
                StoreError::Database(format!("Failed to iterate subscriptions: {}", e))
            })?;
            let sub: Subscription = Self::deserialize(&value)?;
            history.push(sub);
        }

        Ok(history)
    }

    // ==================== Units of work ====================

    async fn snapshot(&self, user_id: &UserId) -> StoreResult<AccountSnapshot> {
        let result = (&self.users, &self.subscriptions, &self.active_index).transaction(
            |(users, subscriptions, active_index)| {
                Self::tx_snapshot(users, subscriptions, active_index, user_id)
            },
        );

        result.map_err(|e| match e {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => StoreError::from(err),
        })
    }

    async fn transact<T, E, F>(&self, user_id: &UserId, decide: F) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: Fn(&AccountSnapshot) -> Result<Transition<T>, E> + Send + Sync,
    {
        // reserved up front; unused when the unit inserts no subscription
        let seq = self
            .db
            .generate_id()
            .map_err(|e| E::from(StoreError::from(e)))?;

        let result = (&self.users, &self.subscriptions, &self.active_index).transaction(
            |(users, subscriptions, active_index)| -> Result<(T, bool), ConflictableTransactionError<Aborted<E>>> {
                let snapshot =
                    Self::tx_snapshot(users, subscriptions, active_index, user_id).map_err(lift)?;

                let Transition { writes, value } = decide(&snapshot)
                    .map_err(|e| ConflictableTransactionError::Abort(Aborted::Decision(e)))?;

                writes
                    .validate(&snapshot)
                    .map_err(|e| ConflictableTransactionError::Abort(Aborted::Store(e)))?;

                Self::tx_apply(users, subscriptions, active_index, &writes, seq).map_err(lift)?;

                Ok((value, !writes.is_empty()))
            },
        );

        let (value, wrote) = match result {
            Ok(committed) => committed,
            Err(TransactionError::Abort(Aborted::Decision(e))) => return Err(e),
            Err(TransactionError::Abort(Aborted::Store(e))) => return Err(E::from(e)),
            Err(TransactionError::Storage(e)) => return Err(E::from(StoreError::from(e))),
        };

        if wrote && self.flush_on_commit {
            self.flush().await.map_err(E::from)?;
        }

        Ok(value)
    }

    // ==================== Maintenance ====================

    async fn get_stats(&self) -> StoreResult<StoreStats> {
        let mut stats = StoreStats {
            total_users: self.users.len() as u64,
            total_subscriptions: self.subscriptions.len() as u64,
            active_subscriptions: self.active_index.len() as u64,
            total_coins: 0,
        };

        for item in self.users.iter() {
            let (_, value) = item.map_err(|e| StoreError::Database(format!("Failed to iterate users: {}", e)))?;
            let account: UserAccount = Self::deserialize(&value)?;
            stats.total_coins = stats.total_coins.saturating_add(account.coins);
        }

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use coin_core::{LedgerError, PlanCatalog, Role};
    use tempfile::tempdir;

    fn user(id: &str, coins: u64) -> UserAccount {
        UserAccount::new(id, Role::Client, Utc::now()).with_coins(coins)
    }

    fn store_at(dir: &std::path::Path) -> SledStore {
        SledStore::new(&StoreConfig::test().with_data_dir(dir)).unwrap()
    }

    #[tokio::test]
    async fn test_sled_user_crud() {
        let dir = tempdir().unwrap();
        let store = store_at(dir.path());

        let account = user("u1", 42);
        store.insert_user(&account).await.unwrap();
        assert!(matches!(
            store.insert_user(&account).await,
            Err(StoreError::Duplicate { .. })
        ));

        let loaded = store.get_user(&account.user_id).await.unwrap();
        assert_eq!(loaded, Some(account));

        store.insert_user(&user("u2", 1)).await.unwrap();
        let ids = store.list_user_ids().await.unwrap();
        assert_eq!(ids, vec![UserId::new("u1"), UserId::new("u2")]);
    }

    #[tokio::test]
    async fn test_sled_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let account = user("u1", 7);
        {
            let store = store_at(dir.path());
            store.insert_user(&account).await.unwrap();
            let updated: Result<u64, LedgerError> = store
                .transact(&account.user_id, |snap| {
                    let next = snap.account.clone().with_coins(9);
                    Ok(Transition::new(WriteSet::account(next), 9))
                })
                .await;
            assert_eq!(updated.unwrap(), 9);
            store.flush().await.unwrap();
        }

        let store = store_at(dir.path());
        let loaded = store.get_user(&account.user_id).await.unwrap().unwrap();
        assert_eq!(loaded.coins, 9);
    }

    #[tokio::test]
    async fn test_sled_reopen_repeatedly() {
        let dir = tempdir().unwrap();
        for round in 0..5u64 {
            let store = store_at(dir.path());
            let account = user(&format!("u{round}"), round);
            store.insert_user(&account).await.unwrap();
            store.flush().await.unwrap();
            assert_eq!(store.list_user_ids().await.unwrap().len() as u64, round + 1);
        }
    }

    #[tokio::test]
    async fn test_sled_transact_abort_leaves_no_writes() {
        let store = SledStore::new(&StoreConfig::test()).unwrap();
        let account = user("u1", 10);
        store.insert_user(&account).await.unwrap();

        let aborted: Result<(), LedgerError> = store
            .transact(&account.user_id, |snap| {
                Err(LedgerError::insufficient(15, snap.account.coins))
            })
            .await;
        assert_eq!(aborted, Err(LedgerError::insufficient(15, 10)));

        let missing: Result<(), LedgerError> = store
            .transact(&UserId::new("ghost"), |_| Ok(Transition::read(())))
            .await;
        assert_eq!(missing, Err(LedgerError::UserNotFound(UserId::new("ghost"))));

        let loaded = store.get_user(&account.user_id).await.unwrap().unwrap();
        assert_eq!(loaded.coins, 10);
    }

    #[tokio::test]
    async fn test_sled_subscription_switch_and_history() {
        let store = SledStore::new(&StoreConfig::test()).unwrap();
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

        // a second insert without cancel violates the single-active invariant
        let rejected: Result<(), LedgerError> = store
            .transact(&account.user_id, |_| {
                let dup = Subscription::activate(account.user_id.clone(), catalog.get("pro").unwrap(), start, 30);
                Ok(Transition::new(WriteSet::none().with_insert(dup), ()))
            })
            .await;
        assert!(matches!(rejected, Err(LedgerError::Persistence(_))));

        let later = start + Duration::days(5);
        let second = Subscription::activate(account.user_id.clone(), catalog.get("premium").unwrap(), later, 30);
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
        assert_eq!(active.plan_id, "premium");

        let history = store.subscription_history(&account.user_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].plan_id, "basic");
        assert!(!history[1].is_active());

        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_users, 1);
        assert_eq!(stats.active_subscriptions, 1);
        assert_eq!(stats.total_subscriptions, 2);
    }

    #[tokio::test]
    async fn test_sled_history_order_with_equal_timestamps() {
        let store = SledStore::new(&StoreConfig::test()).unwrap();
        let account = user("u1", 0);
        store.insert_user(&account).await.unwrap();
        let catalog = PlanCatalog::default();
        let at = Utc::now();

        for plan_id in ["premium", "basic", "elite", "pro"] {
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
        assert_eq!(plans, vec!["pro", "elite", "basic", "premium"]);
        assert!(history[0].is_active());
        assert!(history[1..].iter().all(|s| !s.is_active()));
    }
}
