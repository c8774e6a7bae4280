//! # Projection Sink
//!
//! Downstream store for stream side effects. Every write is keyed by the
//! originating item key and the record's sequence position: a write whose
//! sequence is not newer than the last one applied for that key is skipped,
//! so redelivered records are no-ops.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

use super::errors::{CdcError, CdcResult};
use crate::store::SequenceNumber;

/// Result of applying one effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Written,
    Deleted,
    /// Already applied at this or a later sequence
    Skipped,
}

#[derive(Debug, Clone)]
struct Entry {
    sequence: SequenceNumber,
    /// `None` is a tombstone; kept so stale writes cannot resurrect a key
    value: Option<Value>,
}

/// Idempotent keyed projection
#[derive(Debug, Default)]
pub struct ProjectionSink {
    entries: RwLock<HashMap<String, Entry>>,
}

impl ProjectionSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert (`Some`) or delete (`None`) `key` as of `sequence`
    pub fn apply(
        &self,
        key: &str,
        sequence: SequenceNumber,
        value: Option<Value>,
    ) -> CdcResult<Applied> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CdcError::Internal("Lock poisoned".into()))?;

        if let Some(existing) = entries.get(key) {
            if existing.sequence >= sequence {
                return Ok(Applied::Skipped);
            }
        }

        let applied = if value.is_some() {
            Applied::Written
        } else {
            Applied::Deleted
        };
        entries.insert(key.to_string(), Entry { sequence, value });
        Ok(applied)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(key).and_then(|e| e.value.clone()))
    }

    /// Sequence of the last effect applied for `key`
    pub fn applied_sequence(&self, key: &str) -> Option<SequenceNumber> {
        self.entries
            .read()
            .ok()
            .and_then(|entries| entries.get(key).map(|e| e.sequence))
    }

    /// Keys with a live value, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(_, e)| e.value.is_some())
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_replay_is_noop() {
        let sink = ProjectionSink::new();

        assert_eq!(sink.apply("a", 1, Some(json!({"v": 1}))).unwrap(), Applied::Written);
        assert_eq!(sink.apply("a", 1, Some(json!({"v": 1}))).unwrap(), Applied::Skipped);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.get("a"), Some(json!({"v": 1})));
    }

    #[test]
    fn test_stale_write_does_not_overwrite() {
        let sink = ProjectionSink::new();
        sink.apply("a", 2, Some(json!({"v": 2}))).unwrap();

        assert_eq!(sink.apply("a", 1, Some(json!({"v": 1}))).unwrap(), Applied::Skipped);
        assert_eq!(sink.get("a"), Some(json!({"v": 2})));
    }

    #[test]
    fn test_tombstone_blocks_resurrection() {
        let sink = ProjectionSink::new();
        sink.apply("a", 1, Some(json!({"v": 1}))).unwrap();
        assert_eq!(sink.apply("a", 2, None).unwrap(), Applied::Deleted);

        assert_eq!(sink.apply("a", 1, Some(json!({"v": 1}))).unwrap(), Applied::Skipped);
        assert!(sink.get("a").is_none());
        assert!(sink.is_empty());
        assert_eq!(sink.applied_sequence("a"), Some(2));
    }
}
