//! # Stream Processor
//!
//! One worker's state machine:
//!
//! ```text
//! IDLE -> POLLING -> PROCESSING -> COMMITTED -> POLLING
//!                              \-> FAILED    -> POLLING
//! POLLING -> STOPPED (shutdown)
//! ```
//!
//! Records of a batch are handled in sequence order. The first failure aborts
//! the rest of the batch, which is released unacknowledged and redelivered
//! after the source's backoff. A batch whose acknowledgement is rejected
//! counts as failed too. Shutdown is observed only while polling, never
//! mid-batch.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::batch::Batch;
use super::errors::{CdcError, CdcResult};
use super::handler::RecordHandler;
use super::source::StreamSource;
use crate::observability::{Logger, MetricsRegistry};

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Idle,
    Polling,
    Processing,
    Committed,
    Failed,
    Stopped,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessorState::Idle => "IDLE",
            ProcessorState::Polling => "POLLING",
            ProcessorState::Processing => "PROCESSING",
            ProcessorState::Committed => "COMMITTED",
            ProcessorState::Failed => "FAILED",
            ProcessorState::Stopped => "STOPPED",
        };
        write!(f, "{}", s)
    }
}

/// How a batch ended
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Committed { records: usize },
    Failed { error: CdcError },
}

impl BatchOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, BatchOutcome::Committed { .. })
    }
}

/// A single consumer worker
pub struct StreamProcessor {
    worker: String,
    source: Arc<dyn StreamSource>,
    handler: Arc<dyn RecordHandler>,
    metrics: Arc<MetricsRegistry>,
    batch_timeout: Option<Duration>,
    state: watch::Sender<ProcessorState>,
}

impl StreamProcessor {
    pub fn new(
        worker: impl Into<String>,
        source: Arc<dyn StreamSource>,
        handler: Arc<dyn RecordHandler>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let (state, _) = watch::channel(ProcessorState::Idle);
        Self {
            worker: worker.into(),
            source,
            handler,
            metrics,
            batch_timeout: None,
            state,
        }
    }

    /// Fail any batch that runs longer than `timeout`
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = Some(timeout);
        self
    }

    pub fn worker(&self) -> &str {
        &self.worker
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ProcessorState> {
        self.state.subscribe()
    }

    fn transition(&self, next: ProcessorState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            let (from, to) = (prev.to_string(), next.to_string());
            Logger::trace(
                "PROCESSOR_STATE",
                &[("worker", &self.worker), ("from", &from), ("to", &to)],
            );
        }
    }

    /// Poll until shutdown is signalled (or its sender is dropped)
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> CdcResult<()> {
        Logger::info(
            "PROCESSOR_STARTED",
            &[("worker", &self.worker), ("handler", self.handler.name())],
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }
            self.transition(ProcessorState::Polling);

            let batch = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                batch = self.source.next_batch() => batch,
            };

            match batch {
                Ok(batch) => {
                    self.process(batch).await;
                }
                Err(e) => {
                    Logger::error(
                        "SOURCE_FAILED",
                        &[("worker", &self.worker), ("code", e.code()), ("error", &e.to_string())],
                    );
                    self.transition(ProcessorState::Stopped);
                    return Err(e);
                }
            }
        }

        self.transition(ProcessorState::Stopped);
        Logger::info("PROCESSOR_STOPPED", &[("worker", &self.worker)]);
        Ok(())
    }

    /// Wait for one batch and process it
    pub async fn poll_once(&self) -> CdcResult<BatchOutcome> {
        self.transition(ProcessorState::Polling);
        let batch = self.source.next_batch().await?;
        Ok(self.process(batch).await)
    }

    /// Handle every record, then acknowledge or release the batch
    pub async fn process(&self, batch: Batch) -> BatchOutcome {
        self.transition(ProcessorState::Processing);
        let partition = batch.partition();
        let partition_name = partition.to_string();

        let result = match self.batch_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.apply(&batch)).await {
                Ok(result) => result,
                Err(_) => Err(CdcError::Timeout {
                    partition,
                    after_ms: limit.as_millis() as u64,
                }),
            },
            None => self.apply(&batch).await,
        };

        if let Err(error) = result {
            return self.fail(&batch, error);
        }

        match self
            .source
            .acknowledge(partition, batch.lease(), batch.last_sequence())
        {
            Ok(()) => {
                self.metrics.increment_batches_committed();
                self.metrics.add_records_processed(batch.len() as u64);
                self.transition(ProcessorState::Committed);

                let (records, through) = (batch.len().to_string(), batch.last_sequence().to_string());
                Logger::info(
                    "BATCH_COMMITTED",
                    &[
                        ("worker", &self.worker),
                        ("partition", &partition_name),
                        ("records", &records),
                        ("through", &through),
                    ],
                );
                BatchOutcome::Committed {
                    records: batch.len(),
                }
            }
            Err(error) => {
                let message = error.to_string();
                Logger::warn(
                    "ACKNOWLEDGE_REJECTED",
                    &[
                        ("worker", &self.worker),
                        ("partition", &partition_name),
                        ("code", error.code()),
                        ("error", &message),
                    ],
                );
                self.fail(&batch, error)
            }
        }
    }

    /// Release the batch for redelivery and record the failure
    fn fail(&self, batch: &Batch, error: CdcError) -> BatchOutcome {
        let partition_name = batch.partition().to_string();

        if let Err(e) = self.source.release(batch.partition(), batch.lease()) {
            let message = e.to_string();
            Logger::warn(
                "RELEASE_REJECTED",
                &[
                    ("worker", &self.worker),
                    ("partition", &partition_name),
                    ("code", e.code()),
                    ("error", &message),
                ],
            );
        }
        self.metrics.increment_batches_failed();
        self.transition(ProcessorState::Failed);

        let (first, message) = (batch.first_sequence().to_string(), error.to_string());
        Logger::error(
            "BATCH_FAILED",
            &[
                ("worker", &self.worker),
                ("partition", &partition_name),
                ("from", &first),
                ("code", error.code()),
                ("error", &message),
            ],
        );
        BatchOutcome::Failed { error }
    }

    async fn apply(&self, batch: &Batch) -> CdcResult<()> {
        for record in batch.records() {
            self.handler.handle(record).await?;
        }
        Ok(())
    }
}

/// A set of workers sharing one source and handler
pub struct WorkerPool {
    processors: Vec<Arc<StreamProcessor>>,
    handles: Vec<JoinHandle<CdcResult<()>>>,
}

impl WorkerPool {
    /// Spawn `count` workers on the current runtime
    pub fn spawn(
        name: &str,
        count: usize,
        source: Arc<dyn StreamSource>,
        handler: Arc<dyn RecordHandler>,
        metrics: Arc<MetricsRegistry>,
        batch_timeout: Option<Duration>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let mut processors = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);

        for i in 0..count.max(1) {
            let mut processor = StreamProcessor::new(
                format!("{}-{}", name, i),
                Arc::clone(&source),
                Arc::clone(&handler),
                Arc::clone(&metrics),
            );
            if let Some(timeout) = batch_timeout {
                processor = processor.with_batch_timeout(timeout);
            }
            let processor = Arc::new(processor);

            let worker = Arc::clone(&processor);
            let rx = shutdown.clone();
            handles.push(tokio::spawn(async move { worker.run(rx).await }));
            processors.push(processor);
        }

        Self { processors, handles }
    }

    pub fn processors(&self) -> &[Arc<StreamProcessor>] {
        &self.processors
    }

    /// Wait for every worker to stop; returns the first worker error
    pub async fn join(self) -> CdcResult<()> {
        let mut first_error = None;
        for handle in self.handles {
            let result = handle
                .await
                .map_err(|e| CdcError::Internal(format!("worker panicked: {}", e)))
                .and_then(|r| r);
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
