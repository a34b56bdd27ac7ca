//! Per-request retrace state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of one retrace request.
///
/// ```text
/// Received -> Traversing -> Archived
///                        -> Retrying -> Traversing
///                        -> DeadLettered
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetraceState {
    /// The request was delivered for the first time.
    #[default]
    Received,
    /// The store is being walked.
    Traversing,
    /// The attempt failed and the request awaits redelivery.
    Retrying,
    /// The tree was written to the archive.
    Archived,
    /// The attempt budget is spent; the request is parked.
    DeadLettered,
}

impl RetraceState {
    /// Returns true for states with no outgoing transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Archived | Self::DeadLettered)
    }

    /// Returns true if moving from `self` to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received | Self::Retrying, Self::Traversing)
                | (
                    Self::Traversing,
                    Self::Archived | Self::Retrying | Self::DeadLettered
                )
        )
    }
}

impl fmt::Display for RetraceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::Traversing => write!(f, "traversing"),
            Self::Retrying => write!(f, "retrying"),
            Self::Archived => write!(f, "archived"),
            Self::DeadLettered => write!(f, "dead_lettered"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use RetraceState::*;

        assert!(Received.can_transition_to(Traversing));
        assert!(Traversing.can_transition_to(Archived));
        assert!(Traversing.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Traversing));
        assert!(Traversing.can_transition_to(DeadLettered));

        assert!(!Received.can_transition_to(Archived));
        assert!(!Retrying.can_transition_to(Archived));
        assert!(!Archived.can_transition_to(Traversing));
        assert!(!DeadLettered.can_transition_to(Traversing));
    }

    #[test]
    fn test_terminal_states() {
        assert!(RetraceState::Archived.is_terminal());
        assert!(RetraceState::DeadLettered.is_terminal());
        assert!(!RetraceState::Retrying.is_terminal());
        assert_eq!(RetraceState::default(), RetraceState::Received);
    }

    #[test]
    fn test_display_matches_serde() {
        let json = serde_json::to_string(&RetraceState::DeadLettered).unwrap();
        assert_eq!(json, format!("\"{}\"", RetraceState::DeadLettered));
    }
}
