//! Error types for the storage layer.

use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("record not found")]
    NotFound,

    /// A record with the same unique key already exists.
    #[error("record already exists")]
    AlreadyExists,

    /// The record changed since it was read; re-read and retry.
    #[error("concurrent modification: expected version {expected}, found {found}")]
    Conflict {
        /// The version the writer based its update on.
        expected: u32,
        /// The version currently stored.
        found: u32,
    },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}
