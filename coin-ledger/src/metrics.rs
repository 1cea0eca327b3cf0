//! Ledger Metrics
//!
//! Lock-free counters for ledger activity.
//!
//! # Usage
//!
//! ```rust,ignore
//! let metrics = LedgerMetrics::new();
//! metrics.debit_succeeded(15);
//!
//! let snapshot = metrics.snapshot();
//! println!("Coins spent: {}", snapshot.coins_spent);
//! ```

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use coin_core::{GrantKind, ResetOutcome};

/// Ledger metrics collector
#[derive(Debug, Default)]
pub struct LedgerMetrics {
    debits_succeeded: AtomicU64,
    debits_declined: AtomicU64,
    coins_spent: AtomicU64,

    resets_admin: AtomicU64,
    resets_additive: AtomicU64,
    resets_replacement: AtomicU64,
    resets_free: AtomicU64,
    reclamps: AtomicU64,

    admin_adjustments: AtomicU64,
    subscription_changes: AtomicU64,
    subscription_removals: AtomicU64,

    sweeps: AtomicU64,
    sweep_adjusted: AtomicU64,
    sweep_failures: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub debits_succeeded: u64,
    pub debits_declined: u64,
    pub coins_spent: u64,
    pub resets_admin: u64,
    pub resets_additive: u64,
    pub resets_replacement: u64,
    pub resets_free: u64,
    pub reclamps: u64,
    pub admin_adjustments: u64,
    pub subscription_changes: u64,
    pub subscription_removals: u64,
    pub sweeps: u64,
    pub sweep_adjusted: u64,
    pub sweep_failures: u64,
}

impl MetricsSnapshot {
    /// Total periodic grants applied
    pub fn total_resets(&self) -> u64 {
        self.resets_admin + self.resets_additive + self.resets_replacement + self.resets_free
    }

    /// Share of debits declined for insufficient balance
    pub fn decline_rate(&self) -> f64 {
        let total = self.debits_succeeded + self.debits_declined;
        if total == 0 {
            0.0
        } else {
            self.debits_declined as f64 / total as f64
        }
    }
}

impl LedgerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn debit_succeeded(&self, amount: u64) {
        self.debits_succeeded.fetch_add(1, Ordering::Relaxed);
        self.coins_spent.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn debit_declined(&self) {
        self.debits_declined.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a lazy reset
    pub fn reset_evaluated(&self, outcome: &ResetOutcome) {
        match outcome {
            ResetOutcome::Granted { kind, .. } => {
                let counter = match kind {
                    GrantKind::Admin => &self.resets_admin,
                    GrantKind::Additive => &self.resets_additive,
                    GrantKind::Replacement => &self.resets_replacement,
                    GrantKind::Free => &self.resets_free,
                };
                counter.fetch_add(1, Ordering::Relaxed);
            }
            ResetOutcome::Clamped { .. } => {
                self.reclamps.fetch_add(1, Ordering::Relaxed);
            }
            ResetOutcome::Unchanged => {}
        }
    }

    pub fn admin_adjusted(&self) {
        self.admin_adjustments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_changed(&self) {
        self.subscription_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscription_removed(&self) {
        self.subscription_removals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sweep_completed(&self, adjusted: u64, failed: u64) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.sweep_adjusted.fetch_add(adjusted, Ordering::Relaxed);
        self.sweep_failures.fetch_add(failed, Ordering::Relaxed);
    }

    /// Get a snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            debits_succeeded: self.debits_succeeded.load(Ordering::Relaxed),
            debits_declined: self.debits_declined.load(Ordering::Relaxed),
            coins_spent: self.coins_spent.load(Ordering::Relaxed),
            resets_admin: self.resets_admin.load(Ordering::Relaxed),
            resets_additive: self.resets_additive.load(Ordering::Relaxed),
            resets_replacement: self.resets_replacement.load(Ordering::Relaxed),
            resets_free: self.resets_free.load(Ordering::Relaxed),
            reclamps: self.reclamps.load(Ordering::Relaxed),
            admin_adjustments: self.admin_adjustments.load(Ordering::Relaxed),
            subscription_changes: self.subscription_changes.load(Ordering::Relaxed),
            subscription_removals: self.subscription_removals.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            sweep_adjusted: self.sweep_adjusted.load(Ordering::Relaxed),
            sweep_failures: self.sweep_failures.load(Ordering::Relaxed),
        }
    }
}
