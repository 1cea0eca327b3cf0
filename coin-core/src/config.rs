//! Coin Ledger Configuration
//!
//! Cap and grant policy constants plus service tuning.
//! Supports loading from environment variables with the COIN_LEDGER_ prefix.

use serde::{Deserialize, Serialize};
use std::env;

use crate::catalog::{PlanCatalog, PlanTier};
use crate::error::{LedgerError, LedgerResult};

/// Cap configuration (coins)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapConfig {
    /// Cap for users without an active subscription
    pub free_cap: u64,
    /// Cap for entry-tier plans
    pub entry_cap: u64,
    /// Cap for mid-tier plans
    pub mid_cap: u64,
    /// Cap for high-tier plans
    pub high_cap: u64,
}

impl Default for CapConfig {
    fn default() -> Self {
        Self {
            free_cap: 40,
            entry_cap: 60,
            mid_cap: 100,
            high_cap: 250,
        }
    }
}

impl CapConfig {
    /// Cap for a capped plan of the given tier
    pub fn tier_cap(&self, tier: PlanTier) -> u64 {
        match tier {
            PlanTier::Entry => self.entry_cap,
            PlanTier::Mid => self.mid_cap,
            PlanTier::High => self.high_cap,
        }
    }
}

/// Grant configuration (coins per cycle)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantConfig {
    /// Grant for users without an active subscription
    pub free_grant: u64,
    /// Grant for administrators, independent of cap
    pub admin_grant: u64,
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            free_grant: 20,
            admin_grant: 1000,
        }
    }
}

/// Ledger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub caps: CapConfig,
    pub grants: GrantConfig,
    /// Length of one entitlement cycle in days
    #[serde(default = "default_cycle_days")]
    pub cycle_days: u32,
    /// Users processed concurrently by the cap sweep
    #[serde(default = "default_sweep_concurrency")]
    pub sweep_concurrency: usize,
}

/// Longest accepted cycle; keeps every cycle date addition in range
pub const MAX_CYCLE_DAYS: u32 = 3650;

fn default_cycle_days() -> u32 {
    30
}

fn default_sweep_concurrency() -> usize {
    8
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            caps: CapConfig::default(),
            grants: GrantConfig::default(),
            cycle_days: default_cycle_days(),
            sweep_concurrency: default_sweep_concurrency(),
        }
    }
}

impl LedgerConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - COIN_LEDGER_FREE_CAP: Cap without subscription
    /// - COIN_LEDGER_ENTRY_CAP / COIN_LEDGER_MID_CAP / COIN_LEDGER_HIGH_CAP: Tier caps
    /// - COIN_LEDGER_FREE_GRANT: Grant without subscription
    /// - COIN_LEDGER_ADMIN_GRANT: Grant for administrators
    /// - COIN_LEDGER_CYCLE_DAYS: Cycle length in days
    /// - COIN_LEDGER_SWEEP_CONCURRENCY: Parallelism of the cap sweep
    ///
    /// Unset or unparsable variables fall back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            caps: CapConfig {
                free_cap: env_or("COIN_LEDGER_FREE_CAP", defaults.caps.free_cap),
                entry_cap: env_or("COIN_LEDGER_ENTRY_CAP", defaults.caps.entry_cap),
                mid_cap: env_or("COIN_LEDGER_MID_CAP", defaults.caps.mid_cap),
                high_cap: env_or("COIN_LEDGER_HIGH_CAP", defaults.caps.high_cap),
            },
            grants: GrantConfig {
                free_grant: env_or("COIN_LEDGER_FREE_GRANT", defaults.grants.free_grant),
                admin_grant: env_or("COIN_LEDGER_ADMIN_GRANT", defaults.grants.admin_grant),
            },
            cycle_days: env_or("COIN_LEDGER_CYCLE_DAYS", defaults.cycle_days),
            sweep_concurrency: env_or("COIN_LEDGER_SWEEP_CONCURRENCY", defaults.sweep_concurrency),
        }
    }

    /// Set cycle length
    pub fn with_cycle_days(mut self, days: u32) -> Self {
        self.cycle_days = days;
        self
    }

    /// Set cap configuration
    pub fn with_caps(mut self, caps: CapConfig) -> Self {
        self.caps = caps;
        self
    }

    /// Check the policy constants for internal consistency
    ///
    /// Tier caps must ascend strictly above the free cap, the free grant must
    /// fit under the free cap, and the cycle and sweep parallelism must be
    /// non-zero.
    pub fn validate(&self) -> LedgerResult<()> {
        let caps = &self.caps;
        if !(caps.free_cap < caps.entry_cap
            && caps.entry_cap < caps.mid_cap
            && caps.mid_cap < caps.high_cap)
        {
            return Err(LedgerError::Configuration(format!(
                "caps must ascend strictly: free={} entry={} mid={} high={}",
                caps.free_cap, caps.entry_cap, caps.mid_cap, caps.high_cap
            )));
        }

        if self.grants.free_grant > caps.free_cap {
            return Err(LedgerError::Configuration(format!(
                "free grant {} exceeds free cap {}",
                self.grants.free_grant, caps.free_cap
            )));
        }

        if self.cycle_days == 0 || self.cycle_days > MAX_CYCLE_DAYS {
            return Err(LedgerError::Configuration(format!(
                "cycle_days must be in 1..={}, got {}",
                MAX_CYCLE_DAYS, self.cycle_days
            )));
        }

        if self.sweep_concurrency == 0 {
            return Err(LedgerError::Configuration(
                "sweep_concurrency must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Validate against a catalog: the free grant must be smaller than any plan allocation
    pub fn validate_with_catalog(&self, catalog: &PlanCatalog) -> LedgerResult<()> {
        self.validate()?;

        if let Some(min) = catalog.min_allocation() {
            if self.grants.free_grant >= min {
                return Err(LedgerError::Configuration(format!(
                    "free grant {} must be smaller than the smallest plan allocation {}",
                    self.grants.free_grant, min
                )));
            }
        }

        Ok(())
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
