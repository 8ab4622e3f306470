//! Block store errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    /// Stored data failed an integrity check. Never retried.
    #[error("Store corrupted: {0}")]
    Corrupted(String),
    #[error("Store unavailable")]
    Unavailable,
}

impl StoreError {
    /// True for transient failures where repeating the operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Database(sled::Error::Io(_)) => true,
            StoreError::Unavailable => true,
            StoreError::Database(_) | StoreError::Serialization(_) | StoreError::Corrupted(_) => false,
        }
    }
}
