//! The assembled pipeline and its background workers.

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::builder::LineagePipelineBuilder;
use crate::archive::ArchiveStore;
use crate::cancellation::ShutdownToken;
use crate::channel::DurableChannel;
use crate::config::PipelineConfig;
use crate::core::{LineageEvent, RetraceRequest};
use crate::errors::{ConfigError, LineageError, PublishError, StoreError, TraversalError};
use crate::events::{event_types, EventSink};
use crate::ingress::{BatchRejected, IngressEndpoint};
use crate::retrace::{RetraceOutcome, TraceReconstructor};
use crate::store::LineageStore;
use crate::utils::is_valid_identifier;
use crate::writer::{BatchReport, StoreWriter};

/// What a [`LineagePipeline::drain`] call processed.
#[derive(Debug, Clone, Default)]
pub struct DrainReport {
    /// One report per writer batch, in order.
    pub writer_batches: Vec<BatchReport>,
    /// One outcome per handled retrace delivery, in order.
    pub retraces: Vec<RetraceOutcome>,
}

/// A wired lineage pipeline.
///
/// Producers call [`ingest`](Self::ingest); retraces are triggered with
/// [`request_retrace`](Self::request_retrace). Background workers are
/// started with [`start`](Self::start) and stopped with
/// [`shutdown`](Self::shutdown).
pub struct LineagePipeline {
    config: PipelineConfig,
    event_channel: Arc<DurableChannel<LineageEvent>>,
    retrace_channel: Arc<DurableChannel<RetraceRequest>>,
    store: Arc<dyn LineageStore>,
    archive: Arc<dyn ArchiveStore>,
    ingress: IngressEndpoint,
    writer: Arc<StoreWriter>,
    reconstructor: Arc<TraceReconstructor>,
    events: Arc<dyn EventSink>,
    shutdown: ShutdownToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for LineagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineagePipeline")
            .field("event_channel", &self.event_channel.name())
            .field("retrace_channel", &self.retrace_channel.name())
            .field("workers", &self.workers.lock().len())
            .field("shutdown", &self.shutdown.is_shutdown())
            .finish_non_exhaustive()
    }
}

impl LineagePipeline {
    /// Starts a builder.
    #[must_use]
    pub fn builder(config: PipelineConfig) -> LineagePipelineBuilder {
        LineagePipelineBuilder::new(config)
    }

    /// Builds a pipeline with default components.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        Self::builder(config).build()
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn from_parts(
        config: PipelineConfig,
        event_channel: Arc<DurableChannel<LineageEvent>>,
        retrace_channel: Arc<DurableChannel<RetraceRequest>>,
        store: Arc<dyn LineageStore>,
        archive: Arc<dyn ArchiveStore>,
        ingress: IngressEndpoint,
        writer: Arc<StoreWriter>,
        reconstructor: Arc<TraceReconstructor>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            config,
            event_channel,
            retrace_channel,
            store,
            archive,
            ingress,
            writer,
            reconstructor,
            events,
            shutdown: ShutdownToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// The configuration the pipeline was built from.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The channel between ingress and store writer.
    #[must_use]
    pub fn event_channel(&self) -> &Arc<DurableChannel<LineageEvent>> {
        &self.event_channel
    }

    /// The channel carrying retrace requests.
    #[must_use]
    pub fn retrace_channel(&self) -> &Arc<DurableChannel<RetraceRequest>> {
        &self.retrace_channel
    }

    /// The lineage store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LineageStore> {
        &self.store
    }

    /// The archive.
    #[must_use]
    pub fn archive(&self) -> &Arc<dyn ArchiveStore> {
        &self.archive
    }

    /// The ingress endpoint.
    #[must_use]
    pub fn ingress(&self) -> &IngressEndpoint {
        &self.ingress
    }

    /// The store writer.
    #[must_use]
    pub fn writer(&self) -> &Arc<StoreWriter> {
        &self.writer
    }

    /// The trace reconstructor.
    #[must_use]
    pub fn reconstructor(&self) -> &Arc<TraceReconstructor> {
        &self.reconstructor
    }

    /// Accepts one producer fact.
    pub fn ingest(&self, fact: Value) -> Result<LineageEvent, PublishError> {
        self.ingress.ingest(fact)
    }

    /// Accepts producer facts in order, stopping at the first failure.
    pub fn ingest_batch<I>(&self, facts: I) -> Result<Vec<LineageEvent>, BatchRejected>
    where
        I: IntoIterator<Item = Value>,
    {
        self.ingress.ingest_batch(facts)
    }

    /// Asks for the tree `root_id` to be reconstructed and archived.
    pub fn request_retrace(&self, root_id: &str) -> Result<RetraceRequest, PublishError> {
        self.submit_retrace(RetraceRequest::new(root_id))
    }

    /// Publishes a prepared retrace request.
    pub fn submit_retrace(&self, request: RetraceRequest) -> Result<RetraceRequest, PublishError> {
        if !is_valid_identifier(&request.root_id) {
            return Err(PublishError::invalid_fact(format!(
                "root_id '{}' is not a valid identifier",
                request.root_id
            )));
        }
        let message_id = self.retrace_channel.publish(request.clone())?;
        debug!(
            request_id = %request.request_id,
            root_id = %request.root_id,
            message_id = %message_id,
            "Retrace requested"
        );
        Ok(request)
    }

    /// Requests a retrace of every tree that holds `node_id`.
    pub async fn request_retrace_for_node(
        &self,
        node_id: &str,
    ) -> Result<Vec<RetraceRequest>, LineageError> {
        let roots: BTreeSet<String> = self
            .store
            .find_by_node(node_id)
            .await?
            .into_iter()
            .map(|record| record.root_id)
            .collect();
        if roots.is_empty() {
            return Err(TraversalError::incomplete(node_id, "no live record for node").into());
        }

        let mut requests = Vec::with_capacity(roots.len());
        for root_id in roots {
            requests.push(self.request_retrace(&root_id)?);
        }
        Ok(requests)
    }

    /// Removes expired records once.
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        purge_once(self.store.as_ref(), self.events.as_ref()).await
    }

    /// Processes everything that is visible on both channels right now,
    /// without waiting for batch windows.
    ///
    /// Events are written before retraces are handled. Messages scheduled
    /// for later redelivery are left in place.
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        loop {
            let batch = self
                .event_channel
                .try_receive(self.config.event_channel.batch_size);
            if batch.is_empty() {
                break;
            }
            report.writer_batches.push(self.writer.process_batch(batch).await);
        }
        loop {
            let batch = self
                .retrace_channel
                .try_receive(self.config.retrace_channel.batch_size);
            if batch.is_empty() {
                break;
            }
            let outcomes = join_all(batch.into_iter().map(|d| self.reconstructor.handle(d))).await;
            report.retraces.extend(outcomes);
        }
        report
    }

    /// Spawns the store writer, the trace reconstructor and the purge loop.
    ///
    /// Calling it again while workers run does nothing.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() || self.shutdown.is_shutdown() {
            return;
        }

        let writer = self.writer.clone();
        let shutdown = self.shutdown.clone();
        workers.push(tokio::spawn(async move { writer.run(shutdown).await }));

        let reconstructor = self.reconstructor.clone();
        let shutdown = self.shutdown.clone();
        workers.push(tokio::spawn(async move { reconstructor.run(shutdown).await }));

        let store = self.store.clone();
        let events = self.events.clone();
        let interval = self.config.store.purge_interval();
        let shutdown = self.shutdown.clone();
        workers.push(tokio::spawn(async move {
            purge_loop(store, events, interval, shutdown).await;
        }));

        info!(workers = workers.len(), "Lineage pipeline started");
    }

    /// Stops the workers and waits for them to finish their current batch.
    ///
    /// The ingress stops accepting facts; buffered messages stay in their
    /// channels.
    pub async fn shutdown(&self) {
        self.shutdown.shutdown("pipeline shutdown");
        self.event_channel.close();
        self.retrace_channel.close();

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for result in join_all(handles).await {
            if let Err(err) = result {
                warn!(error = %err, "Worker ended abnormally");
            }
        }
        info!(
            pending_events = self.event_channel.len(),
            pending_retraces = self.retrace_channel.len(),
            "Lineage pipeline stopped"
        );
    }
}

async fn purge_once(store: &dyn LineageStore, events: &dyn EventSink) -> Result<usize, StoreError> {
    let removed = store.purge_expired().await?;
    if removed > 0 {
        info!(removed, "Purged expired lineage records");
        events.try_emit(event_types::RECORDS_PURGED, Some(json!({ "removed": removed })));
    }
    Ok(removed)
}

async fn purge_loop(
    store: Arc<dyn LineageStore>,
    events: Arc<dyn EventSink>,
    interval: Duration,
    shutdown: ShutdownToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = purge_once(store.as_ref(), events.as_ref()).await {
                    warn!(error = %err, "Purge failed");
                }
            }
        }
    }
}
