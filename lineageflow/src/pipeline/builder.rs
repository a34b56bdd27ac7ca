//! Builder wiring a lineage pipeline from configuration.

use std::sync::Arc;
use tracing::info;

use super::runtime::LineagePipeline;
use crate::archive::{ArchiveStore, FsArchive, InMemoryArchive};
use crate::channel::DurableChannel;
use crate::config::PipelineConfig;
use crate::errors::ConfigError;
use crate::events::{EventSink, LoggingEventSink};
use crate::ingress::IngressEndpoint;
use crate::retrace::{TraceReconstructor, TraversalPolicy};
use crate::store::{InMemoryLineageStore, LineageStore};
use crate::writer::StoreWriter;

/// Builder for [`LineagePipeline`].
///
/// Components not supplied explicitly are created from the configuration:
/// an in-memory store, and a filesystem archive if `archive.directory` is
/// set, otherwise an in-memory one. Lifecycle events go to a
/// [`LoggingEventSink`] unless another sink is supplied.
pub struct LineagePipelineBuilder {
    config: PipelineConfig,
    store: Option<Arc<dyn LineageStore>>,
    archive: Option<Arc<dyn ArchiveStore>>,
    events: Arc<dyn EventSink>,
    policy: Option<TraversalPolicy>,
}

impl std::fmt::Debug for LineagePipelineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineagePipelineBuilder")
            .field("config", &self.config)
            .field("custom_store", &self.store.is_some())
            .field("custom_archive", &self.archive.is_some())
            .finish_non_exhaustive()
    }
}

impl LineagePipelineBuilder {
    /// Starts a builder from `config`.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            store: None,
            archive: None,
            events: Arc::new(LoggingEventSink::debug()),
            policy: None,
        }
    }

    /// Uses `store` instead of an in-memory store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn LineageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Uses `archive` instead of the configured one.
    #[must_use]
    pub fn with_archive(mut self, archive: Arc<dyn ArchiveStore>) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Sends lifecycle events of every component to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Overrides the traversal policy derived from configuration.
    #[must_use]
    pub fn with_policy(mut self, policy: TraversalPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Validates the configuration and wires the pipeline.
    pub fn build(self) -> Result<LineagePipeline, ConfigError> {
        self.config.validate()?;
        let config = self.config;
        let events = self.events;

        let event_channel = Arc::new(
            DurableChannel::new(config.event_channel.clone()).with_event_sink(events.clone()),
        );
        let retrace_channel = Arc::new(
            DurableChannel::new(config.retrace_channel.clone()).with_event_sink(events.clone()),
        );

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryLineageStore::new()));
        let archive: Arc<dyn ArchiveStore> = match (self.archive, &config.archive.directory) {
            (Some(archive), _) => archive,
            (None, Some(directory)) => Arc::new(FsArchive::new(directory.clone())),
            (None, None) => Arc::new(InMemoryArchive::new()),
        };

        let ingress = IngressEndpoint::new(event_channel.clone()).with_event_sink(events.clone());
        let writer = StoreWriter::new(event_channel.clone(), store.clone(), &config.store)
            .with_event_sink(events.clone());
        let mut reconstructor = TraceReconstructor::new(
            retrace_channel.clone(),
            store.clone(),
            archive.clone(),
            &config.retrace,
        )
        .with_event_sink(events.clone());
        if let Some(policy) = self.policy {
            reconstructor = reconstructor.with_policy(policy);
        }

        info!(
            event_channel = %config.event_channel.name,
            retrace_channel = %config.retrace_channel.name,
            policy = ?reconstructor.policy(),
            "Lineage pipeline assembled"
        );

        Ok(LineagePipeline::from_parts(
            config,
            event_channel,
            retrace_channel,
            store,
            archive,
            ingress,
            Arc::new(writer),
            Arc::new(reconstructor),
            events,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.event_channel = ChannelConfig::default().with_batch_size(0);

        let err = LineagePipelineBuilder::new(config).build().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_build_with_defaults() {
        let pipeline = LineagePipelineBuilder::new(PipelineConfig::default())
            .with_policy(TraversalPolicy::lineage_forming())
            .build()
            .unwrap();
        assert_eq!(pipeline.event_channel().name(), "lineage-events");
        assert_eq!(pipeline.retrace_channel().name(), "lineage-retrace");
        assert_eq!(pipeline.reconstructor().policy(), &TraversalPolicy::lineage_forming());
    }
}
