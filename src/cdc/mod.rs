//! # Change Data Capture
//!
//! Consumes the table's change stream with at-least-once delivery:
//!
//! - `StreamPoller` leases batches per partition and redelivers anything not
//!   acknowledged.
//! - `StreamProcessor` runs the per-worker state machine with the
//!   fail-the-whole-batch policy.
//! - `TripProjection` applies idempotent effects into a `ProjectionSink`.

pub mod batch;
pub mod errors;
pub mod handler;
pub mod processor;
pub mod sink;
pub mod source;

pub use batch::{Batch, LeaseId};
pub use errors::{CdcError, CdcResult};
pub use handler::{HandleFuture, RecordHandler, TripProjection};
pub use processor::{BatchOutcome, ProcessorState, StreamProcessor, WorkerPool};
pub use sink::{Applied, ProjectionSink};
pub use source::{BatchFuture, PollerConfig, StreamPoller, StreamSource};
