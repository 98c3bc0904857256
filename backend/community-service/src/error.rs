/// Error types for community-service
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("No category or sort condition given")]
    NoCondition,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// `batch` is the zero-based index of the failed sub-query
    #[error("Category query batch {batch} failed ({total} batches): {source}")]
    BatchFailed {
        batch: usize,
        total: usize,
        source: StoreError,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Malformed document {id}: {message}")]
    Decode { id: String, message: String },
}

/// Stable, machine-readable error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NoCondition,
    InvalidInput,
    NotFound,
    PermissionDenied,
    Unavailable,
    Aborted,
    DataLoss,
    Cancelled,
    Internal,
}

impl ServiceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ServiceError::NoCondition => ErrorCode::NoCondition,
            ServiceError::InvalidInput(_) => ErrorCode::InvalidInput,
            ServiceError::NotFound(_) => ErrorCode::NotFound,
            ServiceError::Store(e) | ServiceError::BatchFailed { source: e, .. } => match e {
                StoreError::NotFound(_) => ErrorCode::NotFound,
                StoreError::PermissionDenied(_) => ErrorCode::PermissionDenied,
                StoreError::Unavailable(_) => ErrorCode::Unavailable,
                StoreError::Aborted(_) => ErrorCode::Aborted,
                StoreError::InvalidDocument(_) => ErrorCode::DataLoss,
                StoreError::Backend(_) => ErrorCode::Internal,
            },
            ServiceError::Cancelled => ErrorCode::Cancelled,
            ServiceError::Decode { .. } => ErrorCode::DataLoss,
        }
    }

    /// True when the caller, not the remote store, is at fault
    pub fn is_caller_error(&self) -> bool {
        matches!(self.code(), ErrorCode::NoCondition | ErrorCode::InvalidInput)
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
