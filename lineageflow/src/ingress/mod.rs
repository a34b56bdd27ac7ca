//! The ingress endpoint: turns raw producer facts into lineage events.
//!
//! A fact is a JSON object. The endpoint extracts the lineage fields,
//! assigns a node id when the producer did not send one, and publishes the
//! resulting [`LineageEvent`] to the event channel. Each publish is a single
//! attempt; retrying is up to the caller.

mod fact;

pub use fact::parse_fact;

use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::channel::DurableChannel;
use crate::core::LineageEvent;
use crate::errors::PublishError;
use crate::events::{event_types, EventSink, NoOpEventSink};

/// A batch publish stopped at its first failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Batch stopped after {accepted} accepted facts: {error}")]
pub struct BatchRejected {
    /// Facts published before the failure.
    pub accepted: usize,
    /// The failure.
    #[source]
    pub error: PublishError,
}

/// Accepts facts from producers and publishes them as lineage events.
#[derive(Clone)]
pub struct IngressEndpoint {
    channel: Arc<DurableChannel<LineageEvent>>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for IngressEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngressEndpoint")
            .field("channel", &self.channel.name())
            .finish_non_exhaustive()
    }
}

impl IngressEndpoint {
    /// Creates an endpoint publishing to `channel`.
    #[must_use]
    pub fn new(channel: Arc<DurableChannel<LineageEvent>>) -> Self {
        Self {
            channel,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Validates one fact and publishes it.
    ///
    /// Returns the published event, including any assigned `node_id`.
    pub fn ingest(&self, fact: Value) -> Result<LineageEvent, PublishError> {
        let event = match parse_fact(fact) {
            Ok(event) => event,
            Err(err) => {
                self.rejected(&err);
                return Err(err);
            }
        };
        self.publish(event)
    }

    /// Publishes an already-built event.
    pub fn publish(&self, event: LineageEvent) -> Result<LineageEvent, PublishError> {
        match self.channel.publish(event.clone()) {
            Ok(message_id) => {
                debug!(
                    root_id = %event.root_id,
                    node_id = %event.node_id,
                    message_id = %message_id,
                    "Published lineage event"
                );
                self.events.try_emit(
                    event_types::INGRESS_PUBLISHED,
                    Some(json!({
                        "event_id": event.event_id,
                        "root_id": event.root_id,
                        "node_id": event.node_id,
                        "action_taken": event.action_taken,
                    })),
                );
                Ok(event)
            }
            Err(err) => {
                self.rejected(&err);
                Err(err)
            }
        }
    }

    /// Publishes facts in order, stopping at the first failure.
    pub fn ingest_batch<I>(&self, facts: I) -> Result<Vec<LineageEvent>, BatchRejected>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut published = Vec::new();
        for fact in facts {
            match self.ingest(fact) {
                Ok(event) => published.push(event),
                Err(error) => {
                    return Err(BatchRejected {
                        accepted: published.len(),
                        error,
                    })
                }
            }
        }
        Ok(published)
    }

    fn rejected(&self, err: &PublishError) {
        warn!(channel = %self.channel.name(), error = %err, "Rejected lineage fact");
        self.events.try_emit(
            event_types::INGRESS_REJECTED,
            Some(json!({
                "channel": self.channel.name(),
                "error": err.to_string(),
                "transient": err.is_transient(),
            })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;
    use crate::events::CollectingEventSink;
    use pretty_assertions::assert_eq;

    fn endpoint(capacity: usize) -> (IngressEndpoint, Arc<DurableChannel<LineageEvent>>) {
        let channel = Arc::new(DurableChannel::new(
            ChannelConfig::new("events").with_capacity(capacity),
        ));
        (IngressEndpoint::new(channel.clone()), channel)
    }

    #[test]
    fn test_ingest_publishes_event() {
        let (ingress, channel) = endpoint(10);
        let event = ingress
            .ingest(json!({"node_id": "A", "action_taken": "created", "size": 3}))
            .unwrap();

        assert_eq!(event.root_id, "A");
        assert_eq!(event.payload, json!({"size": 3}));
        assert_eq!(channel.len(), 1);
        assert_eq!(channel.try_receive(1)[0].body, event);
    }

    #[test]
    fn test_over_capacity() {
        let (ingress, _channel) = endpoint(1);
        ingress.ingest(json!({"action": "created"})).unwrap();

        let err = ingress.ingest(json!({"action": "created"})).unwrap_err();
        assert!(matches!(err, PublishError::OverCapacity { capacity: 1, .. }));
    }

    #[test]
    fn test_closed_channel_is_unreachable() {
        let (ingress, channel) = endpoint(10);
        channel.close();

        let err = ingress.ingest(json!({"action": "created"})).unwrap_err();
        assert!(matches!(err, PublishError::Unreachable { .. }));
    }

    #[test]
    fn test_batch_stops_at_first_error() {
        let (ingress, channel) = endpoint(10);
        let err = ingress
            .ingest_batch(vec![
                json!({"node_id": "A", "action": "created"}),
                json!({"node_id": "B", "parent_id": "A"}),
                json!({"node_id": "C", "action": "created"}),
            ])
            .unwrap_err();

        assert_eq!(err.accepted, 1);
        assert!(matches!(err.error, PublishError::InvalidFact { .. }));
        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn test_events_emitted() {
        let (ingress, _channel) = endpoint(10);
        let sink = Arc::new(CollectingEventSink::new());
        let ingress = ingress.with_event_sink(sink.clone());

        ingress.ingest(json!({"action": "created"})).unwrap();
        let _ = ingress.ingest(json!({"root_id": "R"}));

        assert_eq!(sink.events_of_type("ingress.published").len(), 1);
        assert_eq!(sink.events_of_type("ingress.rejected").len(), 1);
    }
}
