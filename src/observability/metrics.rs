//! Metrics registry
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only on process start

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters shared by the resolver and the stream consumer
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    operations_executed: AtomicU64,
    operations_failed: AtomicU64,
    operations_rejected: AtomicU64,
    stages_executed: AtomicU64,
    data_source_calls: AtomicU64,
    batches_committed: AtomicU64,
    batches_failed: AtomicU64,
    records_processed: AtomicU64,
    records_replayed: AtomicU64,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Resolver metrics

    pub fn increment_operations_executed(&self) {
        self.operations_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_operations_failed(&self) {
        self.operations_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Rejected before the first stage ran (authentication or role)
    pub fn increment_operations_rejected(&self) {
        self.operations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_stages_executed(&self) {
        self.stages_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_data_source_calls(&self) {
        self.data_source_calls.fetch_add(1, Ordering::Relaxed);
    }

    // Stream metrics

    pub fn increment_batches_committed(&self) {
        self.batches_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_batches_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_records_processed(&self, count: u64) {
        self.records_processed.fetch_add(count, Ordering::Relaxed);
    }

    /// A redelivered record whose effect was already applied
    pub fn increment_records_replayed(&self) {
        self.records_replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            operations_executed: self.operations_executed.load(Ordering::Relaxed),
            operations_failed: self.operations_failed.load(Ordering::Relaxed),
            operations_rejected: self.operations_rejected.load(Ordering::Relaxed),
            stages_executed: self.stages_executed.load(Ordering::Relaxed),
            data_source_calls: self.data_source_calls.load(Ordering::Relaxed),
            batches_committed: self.batches_committed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            records_processed: self.records_processed.load(Ordering::Relaxed),
            records_replayed: self.records_replayed.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub operations_executed: u64,
    pub operations_failed: u64,
    pub operations_rejected: u64,
    pub stages_executed: u64,
    pub data_source_calls: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub records_processed: u64,
    pub records_replayed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_is_zeroed() {
        let snapshot = MetricsRegistry::new().snapshot();

        assert_eq!(snapshot.operations_executed, 0);
        assert_eq!(snapshot.batches_committed, 0);
        assert_eq!(snapshot.records_processed, 0);
    }

    #[test]
    fn test_counters_accumulate() {
        let registry = MetricsRegistry::new();

        registry.increment_operations_executed();
        registry.increment_operations_executed();
        registry.increment_batches_failed();
        registry.add_records_processed(3);
        registry.add_records_processed(2);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.operations_executed, 2);
        assert_eq!(snapshot.batches_failed, 1);
        assert_eq!(snapshot.records_processed, 5);
    }

    #[test]
    fn test_snapshot_serializes() {
        let registry = MetricsRegistry::new();
        registry.increment_records_replayed();

        let json = serde_json::to_value(registry.snapshot()).unwrap();
        assert_eq!(json["records_replayed"], 1);
    }
}
