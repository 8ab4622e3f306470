//! Chain error taxonomy
//!
//! Every fallible chain operation returns `ChainError`. Store failures are
//! wrapped so callers can tell a transient I/O problem from corruption.

use thiserror::Error;

use crate::consensus::KeyImage;
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum ChainError {
    /// Malformed caller input. Never retried.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("Not found")]
    NotFound,
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Invalid proof of work")]
    InvalidPoW,
    /// Already known. Callers treat this as an idempotent no-op.
    #[error("Duplicate block")]
    DuplicateBlock,
    /// Parent unknown. The block is buffered until its parent arrives.
    #[error("Orphan block")]
    OrphanBlock,
    #[error("Invalid transaction at index {index}: {reason}")]
    InvalidTransaction { index: usize, reason: String },
    #[error("Double spend of key image {key_image} in transaction {tx_index}")]
    DoubleSpend { tx_index: usize, key_image: KeyImage },
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    /// Chain state and store disagree. Fatal.
    #[error("Chain inconsistent: {0}")]
    Inconsistent(String),
}

impl ChainError {
    pub(crate) fn invalid_block(reason: impl Into<String>) -> Self {
        ChainError::InvalidBlock(reason.into())
    }

    /// Copy of a permanent rejection, `None` for every other error
    pub(crate) fn permanent_copy(&self) -> Option<ChainError> {
        let err = match self {
            ChainError::InvalidArgument(reason) => ChainError::InvalidArgument(reason.clone()),
            ChainError::InvalidBlock(reason) => ChainError::InvalidBlock(reason.clone()),
            ChainError::InvalidPoW => ChainError::InvalidPoW,
            ChainError::InvalidTransaction { index, reason } => ChainError::InvalidTransaction {
                index: *index,
                reason: reason.clone(),
            },
            ChainError::DoubleSpend { tx_index, key_image } => ChainError::DoubleSpend {
                tx_index: *tx_index,
                key_image: *key_image,
            },
            _ => return None,
        };
        Some(err)
    }

    /// Rejections that must never be retried with the same bytes
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ChainError::InvalidArgument(_)
                | ChainError::InvalidBlock(_)
                | ChainError::InvalidPoW
                | ChainError::InvalidTransaction { .. }
                | ChainError::DoubleSpend { .. }
        )
    }
}
