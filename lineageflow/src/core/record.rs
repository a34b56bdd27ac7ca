//! The persisted lineage record.

use serde::{Deserialize, Serialize};

use super::ActionTaken;
use crate::utils::{now_utc, Timestamp};

/// One node of a lineage tree as held by the lineage store.
///
/// Records are keyed by `(root_id, node_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRecord {
    /// Identifier of the tree this node belongs to.
    pub root_id: String,
    /// Identifier of this node.
    pub node_id: String,
    /// The predecessor node, `None` for a top-level node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// What transformation produced this node.
    pub action_taken: ActionTaken,
    /// Producer-supplied fact content.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// When the fact entered the pipeline.
    pub recorded_at: Timestamp,
    /// After this instant the record is treated as absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_expiry: Option<Timestamp>,
}

impl LineageRecord {
    /// Creates a record with an empty payload and no expiry.
    #[must_use]
    pub fn new(
        root_id: impl Into<String>,
        node_id: impl Into<String>,
        action_taken: impl Into<ActionTaken>,
    ) -> Self {
        Self {
            root_id: root_id.into(),
            node_id: node_id.into(),
            parent_id: None,
            action_taken: action_taken.into(),
            payload: serde_json::Value::Null,
            recorded_at: now_utc(),
            ttl_expiry: None,
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

    /// Sets the recording time.
    #[must_use]
    pub fn with_recorded_at(mut self, at: Timestamp) -> Self {
        self.recorded_at = at;
        self
    }

    /// Sets the expiry.
    #[must_use]
    pub fn with_ttl_expiry(mut self, expiry: Timestamp) -> Self {
        self.ttl_expiry = Some(expiry);
        self
    }

    /// Returns true if this node has no parent.
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Returns true if the record has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.ttl_expiry.is_some_and(|expiry| now >= expiry)
    }

    /// Returns the composite key.
    #[must_use]
    pub fn key(&self) -> (String, String) {
        (self.root_id.clone(), self.node_id.clone())
    }
}
