//! Store error types.

use std::time::Duration;

use thiserror::Error;

use crate::map::MapError;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Create-only write found the id already present.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic revision check failed; another writer won.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The map did not answer within the per-call deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The map cannot serve writes right now.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A watcher fell behind the map event stream and was dropped.
    #[error("watch lagged behind by {0} events")]
    Lagged(u64),

    /// Device could not be encoded or decoded.
    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

impl From<MapError> for StoreError {
    fn from(e: MapError) -> Self {
        match e {
            MapError::NotFound(msg) => StoreError::NotFound(msg),
            MapError::AlreadyExists(key) => StoreError::AlreadyExists(key),
            e @ MapError::VersionMismatch { .. } => StoreError::Conflict(e.to_string()),
            MapError::Unavailable(msg) => StoreError::Unavailable(msg),
            MapError::Internal(msg) => StoreError::Internal(msg),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
