//! Plan Catalog
//!
//! Immutable mapping from plan identifier to plan definition. Built once and
//! shared by reference; the ledger takes it as a constructor dependency.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Plan tier, ascending
///
/// Capped plans take their cap from the tier; see [`crate::config::CapConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Entry,
    Mid,
    High,
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => write!(f, "entry"),
            Self::Mid => write!(f, "mid"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Plan definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub display_name: String,
    pub monthly_price: Decimal,
    /// Coins granted per cycle
    pub coin_allocation: u64,
    /// Unlimited plans accumulate grants and have no cap
    pub unlimited_cap: bool,
    pub tier: PlanTier,
}

impl Plan {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        monthly_price: Decimal,
        coin_allocation: u64,
        tier: PlanTier,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            monthly_price,
            coin_allocation,
            unlimited_cap: false,
            tier,
        }
    }

    /// Mark the plan as uncapped
    pub fn unlimited(mut self) -> Self {
        self.unlimited_cap = true;
        self
    }
}

/// Plan catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanCatalog {
    plans: BTreeMap<String, Plan>,
}

impl PlanCatalog {
    /// Build a catalog from plan definitions; later duplicates replace earlier ones
    pub fn new(plans: impl IntoIterator<Item = Plan>) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    /// Catalog with no plans
    pub fn empty() -> Self {
        Self {
            plans: BTreeMap::new(),
        }
    }

    pub fn get(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.get(plan_id)
    }

    pub fn contains(&self, plan_id: &str) -> bool {
        self.plans.contains_key(plan_id)
    }

    pub fn plans(&self) -> impl Iterator<Item = &Plan> {
        self.plans.values()
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Smallest per-cycle allocation among all plans
    pub fn min_allocation(&self) -> Option<u64> {
        self.plans.values().map(|p| p.coin_allocation).min()
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new([
            Plan::new("basic", "Basic", Decimal::new(499, 2), 50, PlanTier::Entry),
            Plan::new("pro", "Pro", Decimal::new(999, 2), 100, PlanTier::Mid),
            Plan::new("premium", "Premium", Decimal::new(1999, 2), 200, PlanTier::High),
            Plan::new("elite", "Elite", Decimal::new(2999, 2), 50, PlanTier::High).unlimited(),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog() {
        let catalog = PlanCatalog::default();
        assert_eq!(catalog.len(), 4);

        let pro = catalog.get("pro").unwrap();
        assert_eq!(pro.coin_allocation, 100);
        assert_eq!(pro.monthly_price.to_string(), "9.99");
        assert!(!pro.unlimited_cap);

        let elite = catalog.get("elite").unwrap();
        assert!(elite.unlimited_cap);
        assert!(catalog.get("gold").is_none());
    }

    #[test]
    fn test_custom_catalog_replaces_duplicates() {
        let catalog = PlanCatalog::new([
            Plan::new("x", "X", Decimal::ONE, 10, PlanTier::Entry),
            Plan::new("x", "X2", Decimal::ONE, 30, PlanTier::Mid),
        ]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("x").unwrap().coin_allocation, 30);
        assert_eq!(catalog.min_allocation(), Some(30));
        assert!(PlanCatalog::empty().min_allocation().is_none());
    }
}
