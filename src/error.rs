//! Error types for the branch store.

use crate::types::Timestamp;
use thiserror::Error;

/// Main error type for branch and commit operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),

    #[error("Branch {path} does not exist at timepoint {timepoint:?}")]
    BranchNotFoundAt { path: String, timepoint: Timestamp },

    #[error("Parent branch not found: {0}")]
    ParentNotFound(String),

    #[error("Branch already exists: {0}")]
    BranchExists(String),

    #[error("Branch already locked: {0}")]
    BranchLocked(String),

    #[error("Invalid branch path: {0}")]
    InvalidPath(String),

    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("Commit state error: {0}")]
    CommitState(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },
}

impl StoreError {
    /// True for the errors a caller is expected to retry (the engine never queues).
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::BranchLocked(_))
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
