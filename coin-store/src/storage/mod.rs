//! Ledger storage layer
//!
//! Persistence interface for user balance records and subscription records,
//! with an in-memory and a sled-backed implementation.
//!
//! # Unit of work
//!
//! Every balance-affecting operation runs through [`LedgerStore::transact`]:
//! the store loads an [`AccountSnapshot`], hands it to a decision function
//! and commits the returned [`WriteSet`] atomically. The decision function
//! may be evaluated more than once (sled retries on conflict), so it must be
//! a pure function of the snapshot.

pub mod memory;
pub mod sled;

use async_trait::async_trait;
use coin_core::{Subscription, UserAccount, UserId};

use crate::error::{StoreError, StoreResult};

/// One user's ledger state as seen by a unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub account: UserAccount,
    pub active: Option<Subscription>,
}

/// Writes produced by a decision function
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSet {
    /// Updated user record
    pub account: Option<UserAccount>,
    /// Canceled copy of the snapshot's active subscription
    pub cancel: Option<Subscription>,
    /// New active subscription
    pub insert: Option<Subscription>,
}

impl WriteSet {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn account(account: UserAccount) -> Self {
        Self {
            account: Some(account),
            ..Self::default()
        }
    }

    pub fn with_cancel(mut self, sub: Subscription) -> Self {
        self.cancel = Some(sub);
        self
    }

    pub fn with_insert(mut self, sub: Subscription) -> Self {
        self.insert = Some(sub);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.account.is_none() && self.cancel.is_none() && self.insert.is_none()
    }

    /// Check the write set against the snapshot it was derived from
    ///
    /// Enforces that at most one subscription per user is active after commit.
    pub fn validate(&self, snapshot: &AccountSnapshot) -> StoreResult<()> {
        let user_id = &snapshot.account.user_id;

        if let Some(account) = &self.account {
            if &account.user_id != user_id {
                return Err(StoreError::invalid_write_set(format!(
                    "account {} written in unit of work for {}",
                    account.user_id, user_id
                )));
            }
        }

        if let Some(cancel) = &self.cancel {
            let matches_active = snapshot
                .active
                .as_ref()
                .is_some_and(|a| a.subscription_id == cancel.subscription_id);
            if !matches_active || cancel.is_active() {
                return Err(StoreError::invalid_write_set(format!(
                    "cancel of {} does not match the active subscription of {}",
                    cancel.subscription_id, user_id
                )));
            }
        }

        if let Some(insert) = &self.insert {
            if &insert.user_id != user_id || !insert.is_active() {
                return Err(StoreError::invalid_write_set(format!(
                    "inserted subscription {} must be active and owned by {}",
                    insert.subscription_id, user_id
                )));
            }
            if snapshot.active.is_some() && self.cancel.is_none() {
                return Err(StoreError::invalid_write_set(format!(
                    "{} already has an active subscription",
                    user_id
                )));
            }
        }

        Ok(())
    }
}

/// Decision result: writes to commit plus the value returned to the caller
#[derive(Debug, Clone)]
pub struct Transition<T> {
    pub writes: WriteSet,
    pub value: T,
}

impl<T> Transition<T> {
    pub fn new(writes: WriteSet, value: T) -> Self {
        Self { writes, value }
    }

    /// Read-only transition
    pub fn read(value: T) -> Self {
        Self {
            writes: WriteSet::none(),
            value,
        }
    }
}

/// Ledger storage interface
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ==================== User records ====================

    /// Insert a new user record; fails if the id exists
    async fn insert_user(&self, account: &UserAccount) -> StoreResult<()>;

    /// Get a user record
    async fn get_user(&self, user_id: &UserId) -> StoreResult<Option<UserAccount>>;

    /// List all user ids
    async fn list_user_ids(&self) -> StoreResult<Vec<UserId>>;

    // ==================== Subscription records ====================

    /// Get the active subscription of a user
    async fn active_subscription(&self, user_id: &UserId) -> StoreResult<Option<Subscription>>;

    /// All subscription records of a user, newest first
    async fn subscription_history(&self, user_id: &UserId) -> StoreResult<Vec<Subscription>>;

    // ==================== Units of work ====================

    /// Load a consistent snapshot without writing
    async fn snapshot(&self, user_id: &UserId) -> StoreResult<AccountSnapshot>;

    /// Run a decision function against a snapshot and commit its writes atomically
    ///
    /// Errors returned by `decide` abort the unit with no writes applied.
    async fn transact<T, E, F>(&self, user_id: &UserId, decide: F) -> Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: Fn(&AccountSnapshot) -> Result<Transition<T>, E> + Send + Sync;

    // ==================== Maintenance ====================

    /// Get statistics
    async fn get_stats(&self) -> StoreResult<StoreStats>;
}

/// Store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Total user records
    pub total_users: u64,
    /// Total subscription records, any status
    pub total_subscriptions: u64,
    /// Active subscriptions
    pub active_subscriptions: u64,
    /// Sum of all balances
    pub total_coins: u64,
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Data directory; empty means a temporary database
    pub data_dir: String,
    /// Cache size in bytes
    pub cache_capacity: u64,
    /// Flush to disk after every committed unit of work
    pub flush_on_commit: bool,
    /// Background flush interval; `None` disables the flusher thread
    pub flush_every_ms: Option<u64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: "./coin_ledger_data".to_string(),
            cache_capacity: 64 * 1024 * 1024, // 64MB
            flush_on_commit: true,
            flush_every_ms: Some(500),
        }
    }
}

impl StoreConfig {
    /// Development configuration
    pub fn development() -> Self {
        Self {
            data_dir: "./coin_ledger_dev_data".to_string(),
            cache_capacity: 16 * 1024 * 1024, // 16MB
            flush_on_commit: false,
            flush_every_ms: Some(1000),
        }
    }

    /// Test configuration (temporary database, no flusher thread)
    ///
    /// Without the flusher, dropping the store releases the file lock at
    /// once, so the same directory can be reopened immediately.
    pub fn test() -> Self {
        Self {
            data_dir: String::new(),
            cache_capacity: 4 * 1024 * 1024, // 4MB
            flush_on_commit: false,
            flush_every_ms: None,
        }
    }

    /// Use a persistent data directory
    pub fn with_data_dir(mut self, dir: impl AsRef<std::path::Path>) -> Self {
        self.data_dir = dir.as_ref().to_string_lossy().into_owned();
        self
    }
}

pub use self::sled::SledStore;
pub use memory::MemoryStore;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coin_core::{PlanCatalog, Role};

    fn snapshot_with_active() -> AccountSnapshot {
        let now = Utc::now();
        let catalog = PlanCatalog::default();
        let account = UserAccount::new("u1", Role::Freelancer, now);
        let active = Subscription::activate(account.user_id.clone(), catalog.get("basic").unwrap(), now, 30);
        AccountSnapshot {
            account,
            active: Some(active),
        }
    }

    #[test]
    fn test_write_set_rejects_second_active() {
        let snapshot = snapshot_with_active();
        let catalog = PlanCatalog::default();
        let now = Utc::now();
        let new_sub = Subscription::activate(
            snapshot.account.user_id.clone(),
            catalog.get("pro").unwrap(),
            now,
            30,
        );

        let writes = WriteSet::none().with_insert(new_sub.clone());
        assert!(matches!(
            writes.validate(&snapshot),
            Err(StoreError::InvalidWriteSet(_))
        ));

        let old = snapshot.active.clone().unwrap();
        let writes = WriteSet::none()
            .with_cancel(old.canceled(now))
            .with_insert(new_sub);
        assert!(writes.validate(&snapshot).is_ok());
    }

    #[test]
    fn test_write_set_rejects_foreign_records() {
        let snapshot = snapshot_with_active();
        let now = Utc::now();

        let other = UserAccount::new("u2", Role::Client, now);
        assert!(WriteSet::account(other).validate(&snapshot).is_err());

        let still_active = snapshot.active.clone().unwrap();
        assert!(WriteSet::none()
            .with_cancel(still_active)
            .validate(&snapshot)
            .is_err());
    }
}
