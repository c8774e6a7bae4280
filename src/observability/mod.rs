//! Observability for the backend
//!
//! - Structured logging (JSON lines)
//! - Operational counters
//!
//! ```ignore
//! use tripstack::observability::{Logger, MetricsRegistry};
//!
//! Logger::info("BATCH_COMMITTED", &[("partition", "0"), ("records", "3")]);
//!
//! let metrics = MetricsRegistry::new();
//! metrics.increment_batches_committed();
//! ```

mod logger;
mod metrics;

pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
