//! Chain validation errors

use crate::consensus::accounts::AccountsError;
use crate::crypto::Hash;
use crate::storage::StoreError;
use thiserror::Error;

/// Errors raised while validating or extending a chain
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Invalid proof of work: {hash} does not meet difficulty {difficulty}")]
    InvalidProofOfWork { hash: Hash, difficulty: u32 },
    #[error("Timestamp {timestamp} too far in the future (now: {now})")]
    FromFuture { timestamp: u64, now: u64 },
    #[error("Timestamp {timestamp} precedes parent timestamp {parent}")]
    TimestampBeforeParent { timestamp: u64, parent: u64 },
    #[error("Difficulty mismatch: expected {expected}, got {got}")]
    DifficultyMismatch { expected: u32, got: u32 },
    #[error("Body hash mismatch in block {0}")]
    BodyHashMismatch(Hash),
    #[error("Accounts hash mismatch: header says {expected}, computed {computed}")]
    AccountsHashMismatch { expected: Hash, computed: Hash },
    #[error("Accounts error: {0}")]
    Accounts(#[from] AccountsError),
    #[error("Header {0} does not extend the head")]
    DoesNotChain(Hash),
    #[error("Stale header at height {height} (head at {head})")]
    Stale { height: u32, head: u32 },
    #[error("Header {0} is not on the main path")]
    NotOnMainPath(Hash),
    #[error("Unknown header {0}")]
    UnknownHeader(Hash),
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl ChainError {
    /// Whether the error proves the data itself is invalid, as opposed to
    /// merely not fitting the current chain.
    pub fn is_invalid(&self) -> bool {
        matches!(
            self,
            ChainError::InvalidProofOfWork { .. }
                | ChainError::FromFuture { .. }
                | ChainError::TimestampBeforeParent { .. }
                | ChainError::DifficultyMismatch { .. }
                | ChainError::BodyHashMismatch(_)
                | ChainError::AccountsHashMismatch { .. }
                | ChainError::Accounts(_)
        )
    }
}
