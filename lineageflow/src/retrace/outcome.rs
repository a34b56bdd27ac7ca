//! The result of handling one retrace delivery.

use serde::Serialize;

use crate::core::RetraceState;

/// What happened to one delivery of a retrace request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetraceOutcome {
    /// The request that was handled.
    pub request_id: String,
    /// The tree the request asked for.
    pub root_id: String,
    /// Delivery attempt, starting at 1.
    pub attempt: u32,
    /// States passed through during this attempt, in order.
    pub transitions: Vec<RetraceState>,
    /// Nodes in the archived tree, if archived.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_count: Option<usize>,
    /// Why the attempt failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RetraceOutcome {
    pub(crate) fn new(request_id: &str, root_id: &str, attempt: u32, entry: RetraceState) -> Self {
        Self {
            request_id: request_id.to_string(),
            root_id: root_id.to_string(),
            attempt,
            transitions: vec![entry],
            node_count: None,
            error: None,
        }
    }

    /// The state the attempt ended in.
    #[must_use]
    pub fn final_state(&self) -> RetraceState {
        self.transitions.last().copied().unwrap_or_default()
    }

    /// Returns true if the tree was archived.
    #[must_use]
    pub fn is_archived(&self) -> bool {
        self.final_state() == RetraceState::Archived
    }

    /// Returns true if the request was parked in the dead-letter channel.
    #[must_use]
    pub fn is_dead_lettered(&self) -> bool {
        self.final_state() == RetraceState::DeadLettered
    }
}
