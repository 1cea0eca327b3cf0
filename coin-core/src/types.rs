//! Coin ledger domain types
//!
//! The user balance record, subscription records and the derived coin cap.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::catalog::Plan;

/// User identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Marketplace role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Offers services and applies to jobs
    #[default]
    Freelancer,
    /// Posts jobs and requests services
    Client,
    /// Platform administrator, exempt from caps
    Admin,
}

impl Role {
    /// Whether this role bypasses caps and receives the admin grant
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Freelancer => write!(f, "freelancer"),
            Self::Client => write!(f, "client"),
            Self::Admin => write!(f, "admin"),
        }
    }
}

/// User balance record
///
/// The subset of the marketplace user entity the ledger reads and mutates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub user_id: UserId,
    /// Spendable balance
    pub coins: u64,
    /// Last time a periodic grant was applied
    pub last_coin_reset: DateTime<Utc>,
    pub role: Role,
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    /// Create a new account with an empty balance whose cycle starts at `now`
    pub fn new(user_id: impl Into<UserId>, role: Role, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            coins: 0,
            last_coin_reset: now,
            role,
            updated_at: now,
        }
    }

    /// Set balance
    pub fn with_coins(mut self, coins: u64) -> Self {
        self.coins = coins;
        self
    }

    /// Set last reset timestamp
    pub fn with_last_reset(mut self, at: DateTime<Utc>) -> Self {
        self.last_coin_reset = at;
        self
    }

    /// Whole days elapsed since the last reset; clock skew counts as zero
    pub fn days_since_reset(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_coin_reset).num_days().max(0)
    }
}

/// Subscription status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Subscription record
///
/// Never deleted; only transitions from active to canceled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub user_id: UserId,
    pub plan_id: String,
    pub status: SubscriptionStatus,
    pub monthly_price: Decimal,
    /// Coins granted per cycle
    pub coin_allocation: u64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Activate `plan` for a user, with a period of `cycle_days` starting at `now`
    pub fn activate(user_id: UserId, plan: &Plan, now: DateTime<Utc>, cycle_days: u32) -> Self {
        Self {
            subscription_id: Uuid::new_v4(),
            user_id,
            plan_id: plan.id.clone(),
            status: SubscriptionStatus::Active,
            monthly_price: plan.monthly_price,
            coin_allocation: plan.coin_allocation,
            period_start: now,
            period_end: now + Duration::days(i64::from(cycle_days)),
            canceled_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Return a canceled copy of this record
    pub fn canceled(&self, now: DateTime<Utc>) -> Self {
        let mut sub = self.clone();
        sub.status = SubscriptionStatus::Canceled;
        sub.canceled_at = Some(now);
        sub
    }
}

/// Maximum balance a user may hold
///
/// Derived per call from role and active plan; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum CoinCap {
    Limited(u64),
    Unbounded,
}

impl CoinCap {
    /// Clamp a balance down to the cap
    pub fn clamp(&self, coins: u64) -> u64 {
        match self {
            Self::Limited(cap) => coins.min(*cap),
            Self::Unbounded => coins,
        }
    }

    /// Whether `coins` exceeds the cap
    pub fn is_exceeded_by(&self, coins: u64) -> bool {
        match self {
            Self::Limited(cap) => coins > *cap,
            Self::Unbounded => false,
        }
    }

    pub fn limit(&self) -> Option<u64> {
        match self {
            Self::Limited(cap) => Some(*cap),
            Self::Unbounded => None,
        }
    }
}

impl fmt::Display for CoinCap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(cap) => write!(f, "{}", cap),
            Self::Unbounded => write!(f, "unbounded"),
        }
    }
}
