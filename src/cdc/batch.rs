//! # Batches
//!
//! A batch is a non-empty run of records from one partition in ascending
//! sequence order. It is the unit of acknowledgement. A batch handed out by a
//! source carries the id of the lease it was delivered under; the source only
//! accepts acknowledgement or release for its current lease.

use crate::store::{ChangeRecord, PartitionId, SequenceNumber};

use super::errors::{CdcError, CdcResult};

/// Identifies one delivery of a batch
pub type LeaseId = u64;

/// Records delivered together from one partition
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    partition: PartitionId,
    lease: LeaseId,
    records: Vec<ChangeRecord>,
}

impl Batch {
    pub fn new(records: Vec<ChangeRecord>) -> CdcResult<Self> {
        let first = records
            .first()
            .ok_or_else(|| CdcError::InvalidBatch("batch is empty".into()))?;
        let partition = first.partition;

        for pair in records.windows(2) {
            if pair[1].partition != partition {
                return Err(CdcError::InvalidBatch(format!(
                    "records from {} and {}",
                    partition, pair[1].partition
                )));
            }
            if pair[1].sequence <= pair[0].sequence {
                return Err(CdcError::InvalidBatch(format!(
                    "sequence {} follows {}",
                    pair[1].sequence, pair[0].sequence
                )));
            }
        }

        Ok(Self {
            partition,
            lease: 0,
            records,
        })
    }

    /// Tag the batch with the lease it is delivered under
    pub fn with_lease(mut self, lease: LeaseId) -> Self {
        self.lease = lease;
        self
    }

    pub fn lease(&self) -> LeaseId {
        self.lease
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn first_sequence(&self) -> SequenceNumber {
        self.records.first().map(|r| r.sequence).unwrap_or(0)
    }

    /// Position to acknowledge once every record succeeded
    pub fn last_sequence(&self) -> SequenceNumber {
        self.records.last().map(|r| r.sequence).unwrap_or(0)
    }
}
