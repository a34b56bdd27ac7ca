//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn, Level};

use super::event_types;
use crate::utils::{now_utc, Timestamp};

/// Receives lifecycle events from pipeline components.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "retrace.archived")
    /// * `data` - Optional event data
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Emits an event from synchronous code.
    ///
    /// Never fails; a sink that cannot deliver drops the event.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Returns true for events that report lost or parked work.
fn is_failure(event_type: &str) -> bool {
    matches!(
        event_type,
        event_types::INGRESS_REJECTED
            | event_types::RECORD_WRITE_FAILED
            | event_types::DEAD_LETTERED
            | event_types::RETRACE_DEAD_LETTERED
    )
}

/// A sink that writes events to the tracing subscriber.
///
/// Failure events are always logged at WARN; everything else at the
/// configured level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging routine events at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a sink logging routine events at DEBUG.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&Value>) {
        let root_id = data
            .and_then(|d| d.get("root_id"))
            .and_then(Value::as_str)
            .unwrap_or("-");
        if is_failure(event_type) {
            warn!(event_type = %event_type, root_id = %root_id, event_data = ?data, "Lineage event");
        } else if self.level == Level::DEBUG {
            debug!(event_type = %event_type, root_id = %root_id, event_data = ?data, "Lineage event");
        } else {
            info!(event_type = %event_type, root_id = %root_id, event_data = ?data, "Lineage event");
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// An event captured by [`CollectingEventSink`].
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedEvent {
    /// The event type.
    pub event_type: String,
    /// The event payload.
    pub data: Option<Value>,
    /// When the sink received it.
    pub received_at: Timestamp,
}

/// A sink that keeps every event in memory, for tests and inspection.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<CollectedEvent>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<CollectedEvent> {
        self.events.read().clone()
    }

    /// Number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Forgets all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<CollectedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type.starts_with(type_prefix))
            .cloned()
            .collect()
    }

    /// Returns the payloads of events concerning one tree.
    #[must_use]
    pub fn events_for_root(&self, root_id: &str) -> Vec<CollectedEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| {
                e.data
                    .as_ref()
                    .and_then(|d| d.get("root_id"))
                    .and_then(Value::as_str)
                    == Some(root_id)
            })
            .cloned()
            .collect()
    }

    fn push(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push(CollectedEvent {
            event_type: event_type.to_string(),
            data,
            received_at: now_utc(),
        });
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.push(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.push(event_type, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpEventSink;
        sink.emit(event_types::INGRESS_PUBLISHED, None).await;
        sink.try_emit(event_types::INGRESS_PUBLISHED, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn test_logging_sink() {
        let sink = LoggingEventSink::debug();
        sink.emit(event_types::RETRACE_ARCHIVED, Some(json!({"root_id": "R"}))).await;
        sink.try_emit(event_types::DEAD_LETTERED, None);
        assert!(is_failure(event_types::RETRACE_DEAD_LETTERED));
        assert!(!is_failure(event_types::RECORD_WRITTEN));
    }

    #[tokio::test]
    async fn test_collecting_sink_filters() {
        let sink = CollectingEventSink::new();
        sink.emit(event_types::RECORD_WRITTEN, Some(json!({"root_id": "R"}))).await;
        sink.emit(event_types::RECORDS_PURGED, None).await;
        sink.try_emit(event_types::RETRACE_ARCHIVED, Some(json!({"root_id": "S"})));

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_of_type("store.").len(), 2);
        assert_eq!(sink.events()[2].event_type, "retrace.archived");
        assert_eq!(sink.events_for_root("S").len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }
}
