//! # Store Errors

use thiserror::Error;

/// Result type for table operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Table and stream errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    /// A conditional write found the item in the wrong state
    #[error("Conditional check failed for {key} in {table}")]
    ConditionalCheckFailed { table: String, key: String },

    /// Item is missing its partition key
    #[error("Item is missing key attribute '{0}'")]
    MissingKey(String),

    /// Partition key is not a non-empty string
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Item or attribute value cannot be represented
    #[error("Invalid item: {0}")]
    InvalidItem(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::ConditionalCheckFailed { .. } => "CONDITIONAL_CHECK_FAILED",
            StoreError::MissingKey(_) => "MISSING_KEY",
            StoreError::InvalidKey(_) => "INVALID_KEY",
            StoreError::InvalidItem(_) => "INVALID_ITEM",
            StoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Caller may retry after re-reading state
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::ConditionalCheckFailed { .. })
    }
}
