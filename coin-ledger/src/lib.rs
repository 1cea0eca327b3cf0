//! Coin Ledger
//!
//! Virtual-coin balances with subscription-driven caps and periodic grants.
//!
//! # Modules
//!
//! - `ledger`: balance reads, debits, admin adjustments, subscription changes
//! - `sweep`: batch clamp of all balances to their caps
//! - `metrics`: lock-free operation counters
//! - `telemetry`: tracing subscriber setup
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use coin_ledger::{CoinLedger, LedgerConfig, MemoryStore, PlanCatalog, UserId};
//!
//! let ledger = CoinLedger::new(
//!     Arc::new(MemoryStore::new()),
//!     LedgerConfig::from_env(),
//!     Arc::new(PlanCatalog::default()),
//! )?;
//!
//! let user = UserId::new("user-42");
//! ledger.change_subscription(&user, "pro").await?;
//! let account = ledger.debit(&user, 15).await?;
//! ```

pub mod ledger;
pub mod metrics;
pub mod sweep;
pub mod telemetry;

pub use ledger::{AccountSummary, CoinLedger};
pub use metrics::{LedgerMetrics, MetricsSnapshot};
pub use sweep::SweepReport;
pub use telemetry::{build_subscriber, init_logging, LogConfig, LogFormat, LogLevel};

pub use coin_core::{
    CapConfig, Clock, CoinCap, GrantConfig, LedgerConfig, LedgerError, LedgerResult,
    ManualClock, Plan, PlanCatalog, PlanTier, Role, Subscription, SubscriptionStatus,
    SystemClock, UserAccount, UserId,
};
pub use coin_store::{LedgerStore, MemoryStore, SledStore, StoreConfig, StoreStats};
