//! Coin Core - Coin Ledger Domain Layer
//!
//! Domain types, plan catalog and entitlement policy for the marketplace
//! coin ledger.
//!
//! # Architecture
//!
//! - **Plan Catalog**: immutable plan definitions, injected by reference
//! - **Entitlement Policy**: cap resolution, lazy periodic reset and
//!   administrative adjustments as pure functions of a user snapshot
//! - **Configuration**: cap and grant constants, loadable from `COIN_LEDGER_*`
//! - **Clock**: injectable time source
//!
//! Storage lives in `coin-store`; the service in `coin-ledger`.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod policy;
pub mod types;

pub use catalog::{Plan, PlanCatalog, PlanTier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CapConfig, GrantConfig, LedgerConfig, MAX_CYCLE_DAYS};
pub use error::{LedgerError, LedgerResult};
pub use policy::{EntitlementPolicy, GrantKind, ResetOutcome};
pub use types::{CoinCap, Role, Subscription, SubscriptionStatus, UserAccount, UserId};
