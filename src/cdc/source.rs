//! # Stream Source
//!
//! `StreamPoller` hands out batches from a `TableStream` with at-least-once
//! semantics:
//!
//! - each partition has a checkpoint (last acknowledged sequence);
//! - a partition with a batch in flight is leased and not handed out again;
//! - `release` (or lease expiry after the visibility timeout) makes the
//!   same records available again from the unchanged checkpoint;
//! - a released partition backs off before redelivery, doubling the delay
//!   on every consecutive release up to `max_redelivery_backoff`;
//! - `acknowledge` advances the checkpoint and frees the partition.
//!
//! Every lease has its own id. Acknowledge and release only act on the lease
//! currently held, so a worker whose lease expired cannot free or commit a
//! batch that was since handed to another worker.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;

use super::batch::{Batch, LeaseId};
use super::errors::{CdcError, CdcResult};
use crate::observability::Logger;
use crate::store::{PartitionId, SequenceNumber, StartingPosition, TableStream};

pub type BatchFuture<'a> = Pin<Box<dyn Future<Output = CdcResult<Batch>> + Send + 'a>>;

/// Supplies batches to a processor
pub trait StreamSource: Send + Sync {
    /// Wait until a batch is available and lease it
    fn next_batch(&self) -> BatchFuture<'_>;

    /// Commit everything in `partition` up to and including `position`
    fn acknowledge(
        &self,
        partition: PartitionId,
        lease: LeaseId,
        position: SequenceNumber,
    ) -> CdcResult<()>;

    /// Give up the in-flight batch of `partition` so it is redelivered
    fn release(&self, partition: PartitionId, lease: LeaseId) -> CdcResult<()>;
}

/// Poller settings
#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub batch_size: usize,
    pub starting_position: StartingPosition,
    /// Lease duration before an unacknowledged batch is redelivered
    pub visibility_timeout: Duration,
    /// Upper bound on how long a waiting poller sleeps between checks
    pub poll_interval: Duration,
    /// Delay before a released batch is redelivered
    pub redelivery_backoff: Duration,
    pub max_redelivery_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            starting_position: StartingPosition::Latest,
            visibility_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
            redelivery_backoff: Duration::from_millis(250),
            max_redelivery_backoff: Duration::from_secs(30),
        }
    }
}

impl PollerConfig {
    /// Delay after the `releases`-th consecutive release
    pub fn backoff_after(&self, releases: u32) -> Duration {
        let doublings = releases.saturating_sub(1).min(16);
        self.redelivery_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_redelivery_backoff)
            .max(MIN_BACKOFF)
    }
}

const MIN_BACKOFF: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
struct Lease {
    id: LeaseId,
    through: SequenceNumber,
    expires_at: Instant,
}

#[derive(Debug, Clone, Copy)]
struct Cursor {
    checkpoint: SequenceNumber,
    lease: Option<Lease>,
    /// Consecutive releases since the last acknowledgement
    releases: u32,
    not_before: Option<Instant>,
}

impl Cursor {
    fn new(checkpoint: SequenceNumber) -> Self {
        Self {
            checkpoint,
            lease: None,
            releases: 0,
            not_before: None,
        }
    }

    /// End the cursor's lease if `lease` is the one it holds
    fn end_lease(&mut self, partition: PartitionId, lease: LeaseId) -> CdcResult<()> {
        match self.lease {
            Some(held) if held.id == lease => {
                self.lease = None;
                Ok(())
            }
            _ => Err(CdcError::LeaseLost { partition, lease }),
        }
    }
}

/// Leases batches from a table stream
pub struct StreamPoller {
    stream: Arc<TableStream>,
    config: PollerConfig,
    cursors: Mutex<BTreeMap<PartitionId, Cursor>>,
    /// Rotates the partition scanned first so no partition starves
    rotation: AtomicUsize,
    next_lease: AtomicU64,
    freed: watch::Sender<u64>,
}

impl StreamPoller {
    /// Attach to the stream; with `Latest` existing records are skipped
    pub fn new(stream: Arc<TableStream>, config: PollerConfig) -> Self {
        let cursors = stream
            .partitions()
            .into_iter()
            .map(|p| {
                let checkpoint = match config.starting_position {
                    StartingPosition::Latest => stream.latest_sequence(p),
                    StartingPosition::TrimHorizon => 0,
                };
                (p, Cursor::new(checkpoint))
            })
            .collect();
        let (freed, _) = watch::channel(0);

        Self {
            stream,
            config,
            cursors: Mutex::new(cursors),
            rotation: AtomicUsize::new(0),
            next_lease: AtomicU64::new(1),
            freed,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Last acknowledged sequence of a partition
    pub fn checkpoint(&self, partition: PartitionId) -> CdcResult<SequenceNumber> {
        let cursors = self.lock()?;
        cursors
            .get(&partition)
            .map(|c| c.checkpoint)
            .ok_or_else(|| CdcError::Internal(format!("unknown partition {}", partition)))
    }

    /// Whether a partition currently has a batch in flight
    pub fn is_leased(&self, partition: PartitionId) -> CdcResult<bool> {
        let now = Instant::now();
        let cursors = self.lock()?;
        Ok(cursors
            .get(&partition)
            .and_then(|c| c.lease)
            .map_or(false, |lease| lease.expires_at > now))
    }

    /// Whether a released partition is still waiting out its backoff
    pub fn is_backing_off(&self, partition: PartitionId) -> CdcResult<bool> {
        let now = Instant::now();
        let cursors = self.lock()?;
        Ok(cursors
            .get(&partition)
            .and_then(|c| c.not_before)
            .map_or(false, |at| at > now))
    }

    /// How long a waiting poller may sleep before something can change
    fn idle_wait(&self) -> CdcResult<Duration> {
        let now = Instant::now();
        let cursors = self.lock()?;
        let wait = cursors
            .values()
            .filter_map(|c| c.not_before)
            .filter(|at| *at > now)
            .map(|at| at - now)
            .min()
            .map_or(self.config.poll_interval, |d| d.min(self.config.poll_interval));
        Ok(wait.max(MIN_BACKOFF))
    }

    /// Lease the next available batch without waiting
    pub fn try_next_batch(&self) -> CdcResult<Option<Batch>> {
        let now = Instant::now();
        let mut cursors = self.lock()?;
        let partitions: Vec<PartitionId> = cursors.keys().copied().collect();
        if partitions.is_empty() {
            return Ok(None);
        }

        let offset = self.rotation.fetch_add(1, Ordering::Relaxed) % partitions.len();
        for partition in partitions.iter().cycle().skip(offset).take(partitions.len()) {
            let cursor = match cursors.get_mut(partition) {
                Some(cursor) => cursor,
                None => continue,
            };

            if let Some(lease) = cursor.lease {
                if lease.expires_at > now {
                    continue;
                }
                let through = lease.through.to_string();
                let partition_name = partition.to_string();
                Logger::warn(
                    "LEASE_EXPIRED",
                    &[("partition", &partition_name), ("through", &through)],
                );
                cursor.lease = None;
            }

            if cursor.not_before.map_or(false, |at| at > now) {
                continue;
            }

            let records = self
                .stream
                .read(*partition, cursor.checkpoint, self.config.batch_size)?;
            if records.is_empty() {
                continue;
            }

            let id = self.next_lease.fetch_add(1, Ordering::Relaxed);
            let batch = Batch::new(records)?.with_lease(id);
            cursor.not_before = None;
            cursor.lease = Some(Lease {
                id,
                through: batch.last_sequence(),
                expires_at: now + self.config.visibility_timeout,
            });
            return Ok(Some(batch));
        }

        Ok(None)
    }

    fn lock(&self) -> CdcResult<std::sync::MutexGuard<'_, BTreeMap<PartitionId, Cursor>>> {
        self.cursors
            .lock()
            .map_err(|_| CdcError::Internal("Lock poisoned".into()))
    }
}

impl StreamSource for StreamPoller {
    fn next_batch(&self) -> BatchFuture<'_> {
        Box::pin(async move {
            let mut appended = self.stream.subscribe();
            let mut freed = self.freed.subscribe();
            loop {
                appended.borrow_and_update();
                freed.borrow_and_update();

                if let Some(batch) = self.try_next_batch()? {
                    return Ok(batch);
                }

                // Expired leases and ended backoffs are only noticed by polling
                let wait = self.idle_wait()?;
                tokio::select! {
                    _ = appended.changed() => {}
                    _ = freed.changed() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        })
    }

    fn acknowledge(
        &self,
        partition: PartitionId,
        lease: LeaseId,
        position: SequenceNumber,
    ) -> CdcResult<()> {
        {
            let mut cursors = self.lock()?;
            let cursor = cursors
                .get_mut(&partition)
                .ok_or(CdcError::LeaseLost { partition, lease })?;

            match cursor.lease {
                Some(held) if held.id == lease => {
                    if position > held.through {
                        return Err(CdcError::InvalidAcknowledgement { partition, position });
                    }
                }
                _ => return Err(CdcError::LeaseLost { partition, lease }),
            }
            cursor.lease = None;
            cursor.checkpoint = cursor.checkpoint.max(position);
            cursor.releases = 0;
            cursor.not_before = None;
        }
        self.freed.send_modify(|n| *n += 1);
        Ok(())
    }

    fn release(&self, partition: PartitionId, lease: LeaseId) -> CdcResult<()> {
        let mut cursors = self.lock()?;
        let cursor = cursors
            .get_mut(&partition)
            .ok_or(CdcError::LeaseLost { partition, lease })?;
        cursor.end_lease(partition, lease)?;

        cursor.releases = cursor.releases.saturating_add(1);
        let delay = self.config.backoff_after(cursor.releases);
        cursor.not_before = Some(Instant::now() + delay);

        let (partition_name, releases) = (partition.to_string(), cursor.releases.to_string());
        let delay_ms = delay.as_millis().to_string();
        Logger::trace(
            "REDELIVERY_SCHEDULED",
            &[
                ("partition", &partition_name),
                ("releases", &releases),
                ("delay_ms", &delay_ms),
            ],
        );
        Ok(())
    }
}
