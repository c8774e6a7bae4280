//! # Table Change Stream
//!
//! Every committed write appends one change record to the log of the
//! partition its key hashes to. Sequence numbers start at 1 and are strictly
//! increasing within a partition; partitions are independent of each other.
//!
//! The log only stores and serves records. Checkpoints, leases, and
//! redelivery belong to the consumer side (`cdc::StreamPoller`).

use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::errors::{StoreError, StoreResult};
use super::item::Item;

/// Position of a record within its partition
pub type SequenceNumber = u64;

/// A stream partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard-{:04}", self.0)
    }
}

/// Kind of mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Insert,
    Modify,
    Remove,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Insert => write!(f, "INSERT"),
            EventKind::Modify => write!(f, "MODIFY"),
            EventKind::Remove => write!(f, "REMOVE"),
        }
    }
}

/// One table mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// `<partition>:<sequence>`, unique per stream
    pub event_id: String,

    pub kind: EventKind,

    pub table: String,

    pub partition: PartitionId,

    pub sequence: SequenceNumber,

    /// Key attributes of the changed item
    pub keys: Item,

    /// Item after the change (INSERT/MODIFY)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_image: Option<Item>,

    /// Item before the change (MODIFY/REMOVE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_image: Option<Item>,

    pub approximate_creation: DateTime<Utc>,
}

impl ChangeRecord {
    /// String value of a key attribute
    pub fn key_string(&self, attribute: &str) -> Option<&str> {
        self.keys.get(attribute).and_then(|v| v.as_s())
    }
}

/// Where a new consumer starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StartingPosition {
    /// Only records written after the consumer attached
    #[default]
    Latest,
    /// Oldest record still in the log
    TrimHorizon,
}

/// Per-partition append-only change log
#[derive(Debug)]
pub struct TableStream {
    table: String,
    logs: RwLock<Vec<Vec<ChangeRecord>>>,
    appended: watch::Sender<u64>,
}

impl TableStream {
    pub fn new(table: impl Into<String>, partitions: u32) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            table: table.into(),
            logs: RwLock::new(vec![Vec::new(); partitions.max(1) as usize]),
            appended,
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn partition_count(&self) -> u32 {
        self.logs.read().map(|l| l.len() as u32).unwrap_or(1)
    }

    pub fn partitions(&self) -> Vec<PartitionId> {
        (0..self.partition_count()).map(PartitionId).collect()
    }

    /// Partition an item key maps to
    pub fn partition_for(&self, key: &str) -> PartitionId {
        PartitionId(crc32fast::hash(key.as_bytes()) % self.partition_count())
    }

    /// Append a record for a committed write
    pub(crate) fn append(
        &self,
        key: &str,
        kind: EventKind,
        keys: Item,
        new_image: Option<Item>,
        old_image: Option<Item>,
    ) -> StoreResult<ChangeRecord> {
        let partition = self.partition_for(key);

        let record = {
            let mut logs = self
                .logs
                .write()
                .map_err(|_| StoreError::Internal("Lock poisoned".to_string()))?;
            let log = logs
                .get_mut(partition.0 as usize)
                .ok_or_else(|| StoreError::Internal(format!("no log for {}", partition)))?;

            let sequence = log.last().map(|r| r.sequence).unwrap_or(0) + 1;
            let record = ChangeRecord {
                event_id: format!("{}:{}", partition, sequence),
                kind,
                table: self.table.clone(),
                partition,
                sequence,
                keys,
                new_image,
                old_image,
                approximate_creation: Utc::now(),
            };
            log.push(record.clone());
            record
        };

        self.appended.send_modify(|count| *count += 1);
        Ok(record)
    }

    /// Up to `limit` records of `partition` with sequence greater than `after`
    pub fn read(
        &self,
        partition: PartitionId,
        after: SequenceNumber,
        limit: usize,
    ) -> StoreResult<Vec<ChangeRecord>> {
        let logs = self
            .logs
            .read()
            .map_err(|_| StoreError::Internal("Lock poisoned".to_string()))?;
        let log = logs
            .get(partition.0 as usize)
            .ok_or_else(|| StoreError::Internal(format!("no log for {}", partition)))?;

        // Sequences are dense from 1, so `after` is also the index of the next record
        let start = (after as usize).min(log.len());
        Ok(log[start..].iter().take(limit).cloned().collect())
    }

    /// Sequence of the newest record in `partition` (0 when empty)
    pub fn latest_sequence(&self, partition: PartitionId) -> SequenceNumber {
        self.logs
            .read()
            .ok()
            .and_then(|logs| logs.get(partition.0 as usize).and_then(|l| l.last()).map(|r| r.sequence))
            .unwrap_or(0)
    }

    /// Receiver that changes whenever a record is appended
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.appended.subscribe()
    }

    /// Poison the log lock so every later append fails
    #[cfg(test)]
    pub(crate) fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _logs = self.logs.write();
            panic!("log writer crashed");
        }));
    }
}
