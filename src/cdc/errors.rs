//! # Stream Processing Errors

use thiserror::Error;

use super::batch::LeaseId;
use crate::store::{PartitionId, SequenceNumber, StoreError};

/// Result type for stream processing
pub type CdcResult<T> = Result<T, CdcError>;

/// Change stream consumer errors
#[derive(Debug, Clone, Error)]
pub enum CdcError {
    /// A record's image lacks an expected attribute or has the wrong type
    #[error("Malformed record {event_id}: '{attribute}' {reason}")]
    MalformedRecord {
        event_id: String,
        attribute: String,
        reason: String,
    },

    /// A handler side effect failed
    #[error("Handler failed on {event_id}: {message}")]
    Handler { event_id: String, message: String },

    /// Batch did not finish within the processing timeout
    #[error("Batch on {partition} timed out after {after_ms}ms")]
    Timeout { partition: PartitionId, after_ms: u64 },

    /// Records do not form a valid batch
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// Acknowledged position is not one the source handed out
    #[error("Invalid acknowledgement for {partition} at {position}")]
    InvalidAcknowledgement {
        partition: PartitionId,
        position: SequenceNumber,
    },

    /// The lease was reassigned or already ended
    #[error("Lease {lease} on {partition} is no longer held")]
    LeaseLost { partition: PartitionId, lease: LeaseId },

    #[error("Stream source error: {0}")]
    Source(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CdcError {
    pub fn malformed(
        event_id: impl Into<String>,
        attribute: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        CdcError::MalformedRecord {
            event_id: event_id.into(),
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            CdcError::MalformedRecord { .. } => "MALFORMED_RECORD",
            CdcError::Handler { .. } => "HANDLER_FAILED",
            CdcError::Timeout { .. } => "BATCH_TIMEOUT",
            CdcError::InvalidBatch(_) => "INVALID_BATCH",
            CdcError::InvalidAcknowledgement { .. } => "INVALID_ACKNOWLEDGEMENT",
            CdcError::LeaseLost { .. } => "LEASE_LOST",
            CdcError::Source(_) => "SOURCE_ERROR",
            CdcError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Failures that end the current batch but leave the worker running
    pub fn is_batch_failure(&self) -> bool {
        matches!(
            self,
            CdcError::MalformedRecord { .. }
                | CdcError::Handler { .. }
                | CdcError::Timeout { .. }
                | CdcError::LeaseLost { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_message() {
        let err = CdcError::malformed("shard-0001:3", "name", "is missing");
        assert_eq!(err.code(), "MALFORMED_RECORD");
        assert_eq!(err.to_string(), "Malformed record shard-0001:3: 'name' is missing");
        assert!(err.is_batch_failure());
    }

    #[test]
    fn test_source_errors_are_not_batch_failures() {
        let err = CdcError::from(StoreError::Internal("Lock poisoned".into()));
        assert_eq!(err.code(), "SOURCE_ERROR");
        assert!(!err.is_batch_failure());
    }
}
