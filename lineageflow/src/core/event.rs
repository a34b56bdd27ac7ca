//! Channel payloads: lineage events and retrace requests.

use serde::{Deserialize, Serialize};

use super::{ActionTaken, LineageRecord};
use crate::utils::{generate_event_id, now_utc, ttl_expiry_from, Timestamp};

/// A lineage fact on its way from the ingress to the store writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageEvent {
    /// Identifier of this envelope.
    pub event_id: String,
    /// Tree the fact belongs to.
    pub root_id: String,
    /// Node the fact describes.
    pub node_id: String,
    /// Predecessor node, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Transformation classification.
    pub action_taken: ActionTaken,
    /// Remaining producer fields.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// When the ingress accepted the fact.
    pub published_at: Timestamp,
}

impl LineageEvent {
    /// Creates a new event with a fresh event id.
    #[must_use]
    pub fn new(
        root_id: impl Into<String>,
        node_id: impl Into<String>,
        action_taken: impl Into<ActionTaken>,
    ) -> Self {
        Self {
            event_id: generate_event_id(),
            root_id: root_id.into(),
            node_id: node_id.into(),
            parent_id: None,
            action_taken: action_taken.into(),
            payload: serde_json::Value::Null,
            published_at: now_utc(),
        }
    }

    /// Sets the parent node.
    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Builds the record the store writer persists for this event.
    ///
    /// The expiry is measured from the publish time so that redeliveries of
    /// the same event produce identical records.
    #[must_use]
    pub fn to_record(&self, ttl_seconds: u64) -> LineageRecord {
        LineageRecord {
            root_id: self.root_id.clone(),
            node_id: self.node_id.clone(),
            parent_id: self.parent_id.clone(),
            action_taken: self.action_taken.clone(),
            payload: self.payload.clone(),
            recorded_at: self.published_at,
            ttl_expiry: ttl_expiry_from(self.published_at, ttl_seconds),
        }
    }
}

/// Asks the reconstructor to rebuild and archive one tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetraceRequest {
    /// Identifier of this request.
    pub request_id: String,
    /// The tree to rebuild.
    pub root_id: String,
    /// Minimum number of nodes the trigger expects; fewer means the store
    /// has not caught up yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_nodes: Option<usize>,
    /// When the request was made.
    pub requested_at: Timestamp,
}

impl RetraceRequest {
    /// Creates a request for `root_id`.
    #[must_use]
    pub fn new(root_id: impl Into<String>) -> Self {
        Self {
            request_id: generate_event_id(),
            root_id: root_id.into(),
            expected_nodes: None,
            requested_at: now_utc(),
        }
    }

    /// Sets the minimum expected node count.
    #[must_use]
    pub fn with_expected_nodes(mut self, count: usize) -> Self {
        self.expected_nodes = Some(count);
        self
    }
}
