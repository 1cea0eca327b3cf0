//! Coin Ledger Error Types
//!
//! Error taxonomy shared by the store and the ledger service.

use thiserror::Error;

use crate::types::UserId;

/// Coin ledger error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Operation referenced a user that does not exist
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// Debit requested more coins than the account holds
    #[error("Insufficient balance: requested {requested} coins, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },

    /// Plan identifier is absent from the catalog
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    /// Amount rejected before touching the store
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Configuration rejected by validation
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Store unavailable or transaction aborted
    #[error("Persistence failure: {0}")]
    Persistence(String),
}

/// Coin ledger result type
pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    /// Create an insufficient balance error
    pub fn insufficient(requested: u64, available: u64) -> Self {
        Self::InsufficientBalance {
            requested,
            available,
        }
    }

    /// Create a persistence error
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Whether the caller may retry the whole operation.
    ///
    /// Only store failures qualify. A retried debit re-runs the balance
    /// check, so it cannot double-spend.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }

    /// Whether the error is an expected, user-facing decline rather than a bug
    pub fn is_declined(&self) -> bool {
        matches!(self, Self::InsufficientBalance { .. })
    }
}
