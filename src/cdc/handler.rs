//! # Record Handlers

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use super::errors::{CdcError, CdcResult};
use super::sink::{Applied, ProjectionSink};
use crate::observability::{Logger, MetricsRegistry};
use crate::store::{item_to_json, ChangeRecord, EventKind, Item};

pub type HandleFuture<'a> = Pin<Box<dyn Future<Output = CdcResult<()>> + Send + 'a>>;

/// Side effect applied to each change record.
///
/// Records may be delivered more than once; implementations must be
/// idempotent with respect to (item key, sequence).
pub trait RecordHandler: Send + Sync {
    fn name(&self) -> &str;

    fn handle<'a>(&'a self, record: &'a ChangeRecord) -> HandleFuture<'a>;
}

/// Projects trip records into a `ProjectionSink`
pub struct TripProjection {
    sink: Arc<ProjectionSink>,
    metrics: Arc<MetricsRegistry>,
}

impl TripProjection {
    pub fn new(sink: Arc<ProjectionSink>, metrics: Arc<MetricsRegistry>) -> Self {
        Self { sink, metrics }
    }

    pub fn sink(&self) -> &ProjectionSink {
        &self.sink
    }

    fn apply(&self, record: &ChangeRecord) -> CdcResult<()> {
        let (id, value) = match record.kind {
            EventKind::Insert | EventKind::Modify => {
                let image = record
                    .new_image
                    .as_ref()
                    .ok_or_else(|| CdcError::malformed(&record.event_id, "NewImage", "is missing"))?;
                let id = required_string(record, image, "id")?;
                let name = required_string(record, image, "name")?;

                let kind = record.kind.to_string();
                Logger::info(
                    "RECORD_PROCESSED",
                    &[
                        ("event_id", &record.event_id),
                        ("kind", &kind),
                        ("id", id),
                        ("name", name),
                    ],
                );

                let value = item_to_json(image).map_err(|e| {
                    CdcError::malformed(&record.event_id, "NewImage", e.to_string())
                })?;
                (id.to_string(), Some(value))
            }
            EventKind::Remove => {
                let id = record
                    .key_string("id")
                    .ok_or_else(|| CdcError::malformed(&record.event_id, "Keys.id", "is missing"))?;
                Logger::info(
                    "RECORD_PROCESSED",
                    &[("event_id", &record.event_id), ("kind", "REMOVE"), ("id", id)],
                );
                (id.to_string(), None)
            }
        };

        if self.sink.apply(&id, record.sequence, value)? == Applied::Skipped {
            self.metrics.increment_records_replayed();
            Logger::trace(
                "RECORD_REPLAY_SKIPPED",
                &[("event_id", &record.event_id), ("id", &id)],
            );
        }
        Ok(())
    }
}

fn required_string<'a>(record: &ChangeRecord, image: &'a Item, attribute: &str) -> CdcResult<&'a str> {
    match image.get(attribute) {
        Some(value) => value.as_s().ok_or_else(|| {
            CdcError::malformed(
                &record.event_id,
                attribute,
                format!("must be S, got {}", value.type_tag()),
            )
        }),
        None => Err(CdcError::malformed(&record.event_id, attribute, "is missing")),
    }
}

impl RecordHandler for TripProjection {
    fn name(&self) -> &str {
        "TripProjection"
    }

    fn handle<'a>(&'a self, record: &'a ChangeRecord) -> HandleFuture<'a> {
        Box::pin(async move { self.apply(record) })
    }
}
