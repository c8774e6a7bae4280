//! Change Stream Delivery Tests
//!
//! - redelivered records leave downstream state unchanged
//! - records of one partition are applied in sequence order
//! - a failing record fails the whole batch; nothing is acknowledged and the
//!   redelivery contains every record again
//! - LATEST and TRIM_HORIZON starting positions
//! - expired leases are redelivered
//! - a record that always fails backs off instead of spinning the worker

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tripstack::cdc::{
    Batch, BatchOutcome, CdcError, HandleFuture, PollerConfig, ProcessorState, ProjectionSink,
    RecordHandler, StreamPoller, StreamProcessor, StreamSource, TripProjection, WorkerPool,
};
use tripstack::observability::MetricsRegistry;
use tripstack::store::{
    item_from_json, ChangeRecord, EventKind, PartitionId, StartingPosition, Table, TableConfig,
    WriteCondition,
};

// =============================================================================
// Test Utilities
// =============================================================================

fn single_partition_table() -> Table {
    Table::new(TableConfig {
        stream_partitions: 1,
        ..TableConfig::default()
    })
}

fn put_trip(table: &Table, id: &str, name: &str) {
    let item = item_from_json(&json!({"id": id, "name": name})).unwrap();
    table.put_item(item, &WriteCondition::None).unwrap();
}

fn poller(table: &Table, position: StartingPosition) -> Arc<StreamPoller> {
    Arc::new(StreamPoller::new(
        table.stream(),
        PollerConfig {
            starting_position: position,
            ..PollerConfig::default()
        },
    ))
}

fn insert_record(id: &str, sequence: u64) -> ChangeRecord {
    let image = item_from_json(&json!({"id": id, "name": format!("trip {}", id)})).unwrap();
    ChangeRecord {
        event_id: format!("shard-0000:{}", sequence),
        kind: EventKind::Insert,
        table: "Trip".into(),
        partition: PartitionId(0),
        sequence,
        keys: item_from_json(&json!({"id": id})).unwrap(),
        new_image: Some(image),
        old_image: None,
        approximate_creation: Utc::now(),
    }
}

/// Handler that records sequence numbers and fails on selected ids
struct Recorder {
    applied: Mutex<Vec<(String, u64)>>,
    failing: Mutex<Option<String>>,
}

impl Recorder {
    fn new(failing: Option<&str>) -> Self {
        Self {
            applied: Mutex::new(Vec::new()),
            failing: Mutex::new(failing.map(str::to_string)),
        }
    }

    fn heal(&self) {
        *self.failing.lock().unwrap() = None;
    }

    fn applied(&self) -> Vec<(String, u64)> {
        self.applied.lock().unwrap().clone()
    }
}

impl RecordHandler for Recorder {
    fn name(&self) -> &str {
        "Recorder"
    }

    fn handle<'a>(&'a self, record: &'a ChangeRecord) -> HandleFuture<'a> {
        Box::pin(async move {
            let id = record.key_string("id").unwrap_or_default().to_string();
            if self.failing.lock().unwrap().as_deref() == Some(id.as_str()) {
                return Err(CdcError::Handler {
                    event_id: record.event_id.clone(),
                    message: "downstream unavailable".into(),
                });
            }
            self.applied.lock().unwrap().push((id, record.sequence));
            Ok(())
        })
    }
}

// =============================================================================
// Idempotence
// =============================================================================

#[tokio::test]
async fn test_batch_processed_twice_yields_one_record_per_id() {
    let metrics = Arc::new(MetricsRegistry::new());
    let projection = TripProjection::new(Arc::new(ProjectionSink::new()), metrics.clone());
    let batch = Batch::new(vec![insert_record("a", 1), insert_record("b", 2)]).unwrap();

    for _ in 0..2 {
        for record in batch.records() {
            projection.handle(record).await.unwrap();
        }
    }

    assert_eq!(projection.sink().keys(), vec!["a", "b"]);
    assert_eq!(projection.sink().get("a").unwrap()["name"], "trip a");
    assert_eq!(metrics.snapshot().records_replayed, 2);
}

#[tokio::test]
async fn test_redelivery_after_failure_does_not_duplicate() {
    let table = single_partition_table();
    put_trip(&table, "a", "Lisbon");
    put_trip(&table, "b", "Porto");
    // Malformed: no name
    table
        .put_item(item_from_json(&json!({"id": "c"})).unwrap(), &WriteCondition::None)
        .unwrap();

    let poller = poller(&table, StartingPosition::TrimHorizon);
    let metrics = Arc::new(MetricsRegistry::new());
    let sink = Arc::new(ProjectionSink::new());
    let processor = StreamProcessor::new(
        "w-0",
        poller.clone(),
        Arc::new(TripProjection::new(sink.clone(), metrics.clone())),
        metrics.clone(),
    );

    let outcome = processor.poll_once().await.unwrap();
    assert!(matches!(
        outcome,
        BatchOutcome::Failed { error: CdcError::MalformedRecord { .. } }
    ));
    assert_eq!(poller.checkpoint(PartitionId(0)).unwrap(), 0);

    // Fix the item; the correction is a later record in the same partition
    put_trip(&table, "c", "Faro");
    let outcome = processor.poll_once().await.unwrap();

    // The redelivered batch still starts with the malformed record
    assert!(!outcome.is_committed());
    assert_eq!(sink.keys(), vec!["a", "b"]);
    assert_eq!(metrics.snapshot().batches_failed, 2);
    assert!(metrics.snapshot().records_replayed >= 2);
}

// =============================================================================
// Ordering and Batch Atomicity
// =============================================================================

#[tokio::test]
async fn test_records_applied_in_sequence_order() {
    let table = single_partition_table();
    for (i, id) in ["a", "b", "c", "d", "e"].iter().enumerate() {
        put_trip(&table, id, &format!("trip {}", i));
    }

    let recorder = Arc::new(Recorder::new(None));
    let processor = StreamProcessor::new(
        "w-0",
        poller(&table, StartingPosition::TrimHorizon),
        recorder.clone(),
        Arc::new(MetricsRegistry::new()),
    );
    processor.poll_once().await.unwrap();

    let sequences: Vec<u64> = recorder.applied().iter().map(|(_, s)| *s).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_second_record_failure_redelivers_all_three() {
    let table = single_partition_table();
    put_trip(&table, "r1", "one");
    put_trip(&table, "r2", "two");
    put_trip(&table, "r3", "three");

    let poller = poller(&table, StartingPosition::TrimHorizon);
    let recorder = Arc::new(Recorder::new(Some("r2")));
    let processor = StreamProcessor::new(
        "w-0",
        poller.clone(),
        recorder.clone(),
        Arc::new(MetricsRegistry::new()),
    );

    let first = processor.poll_once().await.unwrap();
    assert!(!first.is_committed());
    assert_eq!(processor.state(), ProcessorState::Failed);
    assert_eq!(recorder.applied(), vec![("r1".to_string(), 1)]);
    assert_eq!(poller.checkpoint(PartitionId(0)).unwrap(), 0);
    assert!(!poller.is_leased(PartitionId(0)).unwrap());

    recorder.heal();
    let second = processor.poll_once().await.unwrap();
    assert!(second.is_committed());
    assert_eq!(processor.state(), ProcessorState::Committed);

    let ids: Vec<String> = recorder.applied().into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["r1", "r1", "r2", "r3"]);
    assert_eq!(poller.checkpoint(PartitionId(0)).unwrap(), 3);
}

// =============================================================================
// Starting Position and Leases
// =============================================================================

#[test]
fn test_latest_skips_existing_records() {
    let table = single_partition_table();
    put_trip(&table, "old", "before attach");

    let latest = poller(&table, StartingPosition::Latest);
    let horizon = poller(&table, StartingPosition::TrimHorizon);
    put_trip(&table, "new", "after attach");

    let batch = latest.try_next_batch().unwrap().unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.records()[0].key_string("id"), Some("new"));

    let batch = horizon.try_next_batch().unwrap().unwrap();
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.records()[0].key_string("id"), Some("old"));
}

#[test]
fn test_expired_lease_is_redelivered() {
    let table = single_partition_table();
    put_trip(&table, "a", "Lisbon");

    let poller = StreamPoller::new(
        table.stream(),
        PollerConfig {
            starting_position: StartingPosition::TrimHorizon,
            visibility_timeout: Duration::from_millis(10),
            ..PollerConfig::default()
        },
    );

    let first = poller.try_next_batch().unwrap().unwrap();
    assert!(poller.try_next_batch().unwrap().is_none());

    std::thread::sleep(Duration::from_millis(30));
    let again = poller.try_next_batch().unwrap().unwrap();
    assert_eq!(again.records(), first.records());
    assert_ne!(again.lease(), first.lease());
}

// =============================================================================
// Workers and Shutdown
// =============================================================================

#[tokio::test]
async fn test_worker_pool_drains_partitions_and_stops() {
    let table = Table::new(TableConfig {
        stream_partitions: 4,
        ..TableConfig::default()
    });
    let poller = poller(&table, StartingPosition::Latest);
    let metrics = Arc::new(MetricsRegistry::new());
    let sink = Arc::new(ProjectionSink::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let pool = WorkerPool::spawn(
        "trip-stream",
        3,
        poller.clone(),
        Arc::new(TripProjection::new(sink.clone(), metrics.clone())),
        metrics.clone(),
        Some(Duration::from_secs(5)),
        shutdown_rx,
    );

    let ids: Vec<String> = (0..20).map(|i| format!("trip-{}", i)).collect();
    for id in &ids {
        put_trip(&table, id, "somewhere");
    }

    tokio::time::timeout(Duration::from_secs(10), async {
        while sink.len() < ids.len() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    pool.join().await.unwrap();

    assert_eq!(sink.len(), 20);
    assert_eq!(metrics.snapshot().records_processed, 20);
    for partition in table.stream().partitions() {
        assert_eq!(
            poller.checkpoint(partition).unwrap(),
            table.stream().latest_sequence(partition)
        );
    }
}

#[tokio::test]
async fn test_acknowledge_is_the_only_way_forward() {
    let table = single_partition_table();
    put_trip(&table, "a", "Lisbon");
    let poller = poller(&table, StartingPosition::TrimHorizon);

    let batch = poller.next_batch().await.unwrap();
    poller.release(batch.partition(), batch.lease()).unwrap();
    let again = poller.next_batch().await.unwrap();
    assert_eq!(again.first_sequence(), batch.first_sequence());

    poller
        .acknowledge(again.partition(), again.lease(), again.last_sequence())
        .unwrap();
    assert!(poller.try_next_batch().unwrap().is_none());
}

#[tokio::test]
async fn test_poison_record_backs_off_and_worker_still_stops() {
    let table = single_partition_table();
    // Malformed: no name
    table
        .put_item(item_from_json(&json!({"id": "bad"})).unwrap(), &WriteCondition::None)
        .unwrap();

    let poller = Arc::new(StreamPoller::new(
        table.stream(),
        PollerConfig {
            starting_position: StartingPosition::TrimHorizon,
            poll_interval: Duration::from_millis(20),
            redelivery_backoff: Duration::from_millis(10),
            max_redelivery_backoff: Duration::from_millis(40),
            ..PollerConfig::default()
        },
    ));
    let metrics = Arc::new(MetricsRegistry::new());
    let processor = Arc::new(StreamProcessor::new(
        "w-0",
        poller.clone(),
        Arc::new(TripProjection::new(Arc::new(ProjectionSink::new()), metrics.clone())),
        metrics.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = Arc::clone(&processor);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let failed = metrics.snapshot().batches_failed;
    assert!(failed >= 2, "expected redelivery, got {} failures", failed);
    assert!(failed <= 20, "expected backoff, got {} failures", failed);
    assert_eq!(processor.state(), ProcessorState::Stopped);
    assert_eq!(poller.checkpoint(PartitionId(0)).unwrap(), 0);
}
