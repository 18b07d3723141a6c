//! Map error types.

use thiserror::Error;

/// Errors returned by a [`VersionedMap`](super::VersionedMap).
#[derive(Debug, Error)]
pub enum MapError {
    /// Key not present.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create-only write found the key already present.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Version mismatch (optimistic concurrency control).
    #[error("version mismatch on '{key}': expected {expected}, got {actual}")]
    VersionMismatch {
        key: String,
        expected: u64,
        actual: u64,
    },

    /// The replicated log could not accept the write (no leader, forward failed).
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

/// Result type for map operations.
pub type Result<T> = std::result::Result<T, MapError>;
