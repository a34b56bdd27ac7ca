//! Lifecycle event hooks for observability.
//!
//! Components report what they did to an [`EventSink`]. Sinks must never
//! fail the operation that emits to them.

mod sink;

pub use sink::{CollectedEvent, CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the pipeline.
pub mod event_types {
    /// A fact was accepted by the ingress and published.
    pub const INGRESS_PUBLISHED: &str = "ingress.published";
    /// A fact was rejected by the ingress.
    pub const INGRESS_REJECTED: &str = "ingress.rejected";
    /// The store writer persisted a record.
    pub const RECORD_WRITTEN: &str = "store.record_written";
    /// The store writer failed to persist a record.
    pub const RECORD_WRITE_FAILED: &str = "store.record_write_failed";
    /// Expired records were purged from the store.
    pub const RECORDS_PURGED: &str = "store.records_purged";
    /// A message was moved to a dead-letter channel.
    pub const DEAD_LETTERED: &str = "channel.dead_lettered";
    /// A retrace request changed state.
    pub const RETRACE_STATE_CHANGED: &str = "retrace.state_changed";
    /// A lineage tree was archived.
    pub const RETRACE_ARCHIVED: &str = "retrace.archived";
    /// A retrace request exhausted its attempts.
    pub const RETRACE_DEAD_LETTERED: &str = "retrace.dead_lettered";
}
