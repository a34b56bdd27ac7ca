//! The store writer: drains the event channel into the lineage store.
//!
//! Each batch is written record by record. Successful writes are
//! acknowledged, failed ones are negatively acknowledged so that the channel
//! redelivers only those events (partial batch failure). A redelivered event
//! writes the same record again, which the store treats as a no-op.

use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use crate::cancellation::ShutdownToken;
use crate::channel::{Delivery, DurableChannel, Redelivery, RedeliveryBackoff};
use crate::config::StoreConfig;
use crate::core::LineageEvent;
use crate::events::{event_types, EventSink, NoOpEventSink};
use crate::observability::writer_span;
use crate::store::{LineageStore, WriteOutcome};

/// Summary of one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Deliveries in the batch.
    pub received: usize,
    /// Records inserted or replaced.
    pub written: usize,
    /// Records that were already stored with equal content.
    pub unchanged: usize,
    /// Writes that failed and were handed back for redelivery.
    pub failed: usize,
    /// Failed writes that used up their attempts.
    pub dead_lettered: usize,
    /// Acknowledgements refused because the delivery had gone stale.
    pub stale: usize,
}

impl BatchReport {
    /// Returns true if every delivery was stored.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.stale == 0
    }
}

/// Consumes lineage events and persists them as records.
pub struct StoreWriter {
    channel: Arc<DurableChannel<LineageEvent>>,
    store: Arc<dyn LineageStore>,
    record_ttl_seconds: u64,
    backoff: RedeliveryBackoff,
    events: Arc<dyn EventSink>,
    invocations: AtomicU64,
}

impl std::fmt::Debug for StoreWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreWriter")
            .field("channel", &self.channel.name())
            .field("record_ttl_seconds", &self.record_ttl_seconds)
            .field("invocations", &self.invocations())
            .finish_non_exhaustive()
    }
}

impl StoreWriter {
    /// Creates a writer using the store settings in `config`.
    #[must_use]
    pub fn new(
        channel: Arc<DurableChannel<LineageEvent>>,
        store: Arc<dyn LineageStore>,
        config: &StoreConfig,
    ) -> Self {
        Self {
            channel,
            store,
            record_ttl_seconds: config.record_ttl_seconds,
            backoff: config.redelivery.clone(),
            events: Arc::new(NoOpEventSink),
            invocations: AtomicU64::new(0),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Number of non-empty batches processed so far.
    #[must_use]
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Receives one batch and processes it.
    ///
    /// Returns `None` if the batch window elapsed without any event.
    pub async fn run_once(&self) -> Option<BatchReport> {
        let batch = self.channel.receive_batch().await;
        if batch.is_empty() {
            return None;
        }
        Some(self.process_batch(batch).await)
    }

    /// Runs until `shutdown` is triggered. A batch in progress is finished.
    pub async fn run(&self, shutdown: ShutdownToken) {
        info!(channel = %self.channel.name(), "Store writer started");
        while !shutdown.is_shutdown() {
            tokio::select! {
                () = shutdown.cancelled() => break,
                batch = self.channel.next_batch() => {
                    self.process_batch(batch).await;
                }
            }
        }
        info!(
            channel = %self.channel.name(),
            invocations = self.invocations(),
            "Store writer stopped"
        );
    }

    /// Writes a batch of deliveries and settles each with the channel.
    pub async fn process_batch(&self, deliveries: Vec<Delivery<LineageEvent>>) -> BatchReport {
        let mut report = BatchReport {
            received: deliveries.len(),
            ..BatchReport::default()
        };
        if deliveries.is_empty() {
            return report;
        }
        self.invocations.fetch_add(1, Ordering::SeqCst);

        let span = writer_span(self.channel.name(), deliveries.len());
        let writes = deliveries.iter().map(|delivery| {
            let record = delivery.body.to_record(self.record_ttl_seconds);
            self.store.put(record)
        });
        let results = join_all(writes).instrument(span).await;

        for (delivery, result) in deliveries.iter().zip(results) {
            let event = &delivery.body;
            match result {
                Ok(outcome) => {
                    if outcome == WriteOutcome::Unchanged {
                        report.unchanged += 1;
                    } else {
                        report.written += 1;
                    }
                    if let Err(err) = self.channel.ack(&delivery.receipt) {
                        warn!(
                            node_id = %event.node_id,
                            error = %err,
                            "Could not acknowledge stored event"
                        );
                        report.stale += 1;
                        continue;
                    }
                    debug!(
                        root_id = %event.root_id,
                        node_id = %event.node_id,
                        outcome = ?outcome,
                        "Stored lineage record"
                    );
                    self.events.try_emit(
                        event_types::RECORD_WRITTEN,
                        Some(json!({
                            "root_id": event.root_id,
                            "node_id": event.node_id,
                            "outcome": format!("{outcome:?}").to_lowercase(),
                            "receive_count": delivery.receive_count,
                        })),
                    );
                }
                Err(err) => {
                    report.failed += 1;
                    let delay = self.backoff.delay_for(delivery.receive_count);
                    warn!(
                        root_id = %event.root_id,
                        node_id = %event.node_id,
                        receive_count = delivery.receive_count,
                        error = %err,
                        "Failed to store lineage record"
                    );
                    self.events.try_emit(
                        event_types::RECORD_WRITE_FAILED,
                        Some(json!({
                            "root_id": event.root_id,
                            "node_id": event.node_id,
                            "receive_count": delivery.receive_count,
                            "error": err.to_string(),
                        })),
                    );
                    match self.channel.nack(&delivery.receipt, delay, err.to_string()) {
                        Ok(Redelivery::DeadLettered) => report.dead_lettered += 1,
                        Ok(Redelivery::Scheduled(_)) => {}
                        Err(err) => {
                            warn!(node_id = %event.node_id, error = %err, "Could not return event");
                            report.stale += 1;
                        }
                    }
                }
            }
        }

        debug!(
            channel = %self.channel.name(),
            received = report.received,
            written = report.written,
            unchanged = report.unchanged,
            failed = report.failed,
            "Processed batch"
        );
        report
    }
}
