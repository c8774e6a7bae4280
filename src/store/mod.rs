//! # Data Store
//!
//! A single keyed table with point reads and writes, conditional writes,
//! and an ordered per-partition change stream.

pub mod errors;
pub mod item;
pub mod stream;
pub mod table;

pub use errors::{StoreError, StoreResult};
pub use item::{item_from_json, item_to_json, AttributeValue, Item};
pub use stream::{ChangeRecord, EventKind, PartitionId, SequenceNumber, StartingPosition, TableStream};
pub use table::{Table, TableConfig, WriteCondition};
