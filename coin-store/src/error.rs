//! Coin Store Error Types

use coin_core::{LedgerError, UserId};
use thiserror::Error;

/// Coin Store Result type
pub type StoreResult<T> = Result<T, StoreError>;

/// Coin Store Error
#[derive(Debug, Error)]
pub enum StoreError {
    /// User record not found
    #[error("User not found: {0}")]
    UserNotFound(UserId),

    /// Duplicate entity
    #[error("Duplicate entity: {entity_type} with id {id}")]
    Duplicate { entity_type: String, id: String },

    /// Write set inconsistent with the snapshot it was derived from
    #[error("Invalid write set: {0}")]
    InvalidWriteSet(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),
}

impl StoreError {
    /// Create a duplicate error
    pub fn duplicate(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Duplicate {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Create an invalid write set error
    pub fn invalid_write_set(message: impl Into<String>) -> Self {
        Self::InvalidWriteSet(message.into())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UserNotFound(user_id) => LedgerError::UserNotFound(user_id),
            other => LedgerError::Persistence(other.to_string()),
        }
    }
}
