use thiserror::Error;

use crate::store::StoreError;

use super::validate::ValidationError;

/// Errors returned to callers of [`DeviceService`](super::DeviceService).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    NotFound(String),

    #[error("device '{0}' already exists")]
    AlreadyExists(String),

    /// Another writer won the revision check; re-read and retry.
    #[error("{0}")]
    Conflict(String),

    /// The store did not answer in time; the operation may be retried.
    #[error("{0}")]
    Timeout(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// The event stream failed for this subscriber only.
    #[error("stream failed: {0}")]
    Stream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(key) => ServiceError::NotFound(key),
            StoreError::AlreadyExists(key) => ServiceError::AlreadyExists(key),
            StoreError::Conflict(msg) => ServiceError::Conflict(msg),
            e @ StoreError::Timeout { .. } => ServiceError::Timeout(e.to_string()),
            StoreError::Unavailable(msg) => ServiceError::Unavailable(msg),
            e @ StoreError::Lagged(_) => ServiceError::Stream(e.to_string()),
            e @ StoreError::Codec(_) => ServiceError::Internal(e.to_string()),
            StoreError::Internal(msg) => ServiceError::Internal(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
