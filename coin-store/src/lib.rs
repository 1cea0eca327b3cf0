//! Coin Store - Coin Ledger Storage
//!
//! Persistence for user balance records and subscription records behind the
//! [`LedgerStore`] trait.
//!
//! # Backends
//!
//! - [`MemoryStore`] - single-mutex in-memory tables, for tests and development
//! - [`SledStore`] - sled embedded database; units of work are multi-tree
//!   transactions
//!
//! # Usage Example
//!
//! ```ignore
//! use coin_store::{LedgerStore, SledStore, StoreConfig, Transition, WriteSet};
//!
//! async fn example(user_id: &coin_core::UserId) -> Result<u64, coin_core::LedgerError> {
//!     let store = SledStore::new(&StoreConfig::development())?;
//!     store
//!         .transact(user_id, |snap| {
//!             let next = snap.account.clone().with_coins(snap.account.coins + 1);
//!             Ok(Transition::new(WriteSet::account(next.clone()), next.coins))
//!         })
//!         .await
//! }
//! ```

pub mod error;
pub mod storage;

pub use error::{StoreError, StoreResult};
pub use storage::{
    AccountSnapshot, LedgerStore, MemoryStore, SledStore, StoreConfig, StoreStats, Transition,
    WriteSet,
};
