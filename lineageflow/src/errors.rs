//! Error types for the lineage pipeline.
//!
//! Every failure the pipeline can surface falls into one of a small number
//! of families. Transient failures are never retried in place: they are
//! reported to the channel, which redelivers the message until its attempt
//! budget is spent and then parks it in the dead-letter channel.

use std::collections::HashMap;
use thiserror::Error;

/// The main error type for lineage operations.
#[derive(Debug, Error)]
pub enum LineageError {
    /// A fact could not be handed off to a channel.
    #[error("{0}")]
    Publish(#[from] PublishError),

    /// The lineage store failed a read or write.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// A reconstruction could not produce a consistent tree.
    #[error("{0}")]
    Traversal(#[from] TraversalError),

    /// A channel operation was rejected.
    #[error("{0}")]
    Channel(#[from] ChannelError),

    /// Writing to the archive failed.
    #[error("{0}")]
    Archive(#[from] ArchiveError),

    /// The configuration is invalid or unreadable.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl LineageError {
    /// Returns true if a redelivery of the same message may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Publish(err) => err.is_transient(),
            Self::Store(_) | Self::Traversal(_) => true,
            Self::Archive(err) => matches!(err, ArchiveError::Io { .. }),
            Self::Channel(_) | Self::Config(_) | Self::Serialization(_) => false,
        }
    }

    /// Short machine-readable name of the error family.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Publish(_) => "PublishError",
            Self::Store(_) => "TransientStoreError",
            Self::Traversal(TraversalError::Incomplete { .. }) => "TraversalIncomplete",
            Self::Traversal(TraversalError::Timeout { .. }) => "TraversalTimeout",
            Self::Channel(_) => "ChannelError",
            Self::Archive(_) => "ArchiveError",
            Self::Config(_) => "ConfigError",
            Self::Serialization(_) => "SerializationError",
        }
    }

    /// Converts to a dictionary representation for structured logs and
    /// dead-letter reasons.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("transient".to_string(), serde_json::json!(self.is_transient()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        map
    }
}

impl From<serde_json::Error> for LineageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors raised when handing a message to a channel.
///
/// A single publish attempt is at-most-once: nothing is retried on the
/// caller's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    /// The channel already holds as many messages as it may buffer.
    #[error("Channel '{channel}' is over capacity ({capacity} messages)")]
    OverCapacity {
        /// The channel name.
        channel: String,
        /// The configured capacity.
        capacity: usize,
    },

    /// The channel was closed and accepts no more messages.
    #[error("Channel '{channel}' is unreachable")]
    Unreachable {
        /// The channel name.
        channel: String,
    },

    /// The inbound fact cannot be turned into a lineage event.
    #[error("Invalid lineage fact: {reason}")]
    InvalidFact {
        /// Why the fact was rejected.
        reason: String,
    },
}

impl PublishError {
    /// Creates an over-capacity error.
    #[must_use]
    pub fn over_capacity(channel: impl Into<String>, capacity: usize) -> Self {
        Self::OverCapacity {
            channel: channel.into(),
            capacity,
        }
    }

    /// Creates an unreachable error.
    #[must_use]
    pub fn unreachable(channel: impl Into<String>) -> Self {
        Self::Unreachable {
            channel: channel.into(),
        }
    }

    /// Creates an invalid fact error.
    #[must_use]
    pub fn invalid_fact(reason: impl Into<String>) -> Self {
        Self::InvalidFact {
            reason: reason.into(),
        }
    }

    /// Returns true if the caller may retry the same publish later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidFact { .. })
    }
}

/// A read or write against the lineage store failed.
///
/// Never surfaced to producers; the channel redelivers the message instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Transient store error during {operation}: {reason}")]
pub struct StoreError {
    /// The store operation that failed.
    pub operation: String,
    /// The underlying reason.
    pub reason: String,
}

impl StoreError {
    /// Creates a new transient store error.
    #[must_use]
    pub fn transient(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// A reconstruction attempt could not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraversalError {
    /// An expected part of the tree is not (yet) visible in the store.
    #[error("Traversal incomplete for tree '{root_id}': {reason}")]
    Incomplete {
        /// The tree being reconstructed.
        root_id: String,
        /// What was missing.
        reason: String,
    },

    /// The attempt exceeded its processing timeout.
    #[error("Traversal of tree '{root_id}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The tree being reconstructed.
        root_id: String,
        /// The timeout that was exceeded.
        timeout_ms: u64,
    },
}

impl TraversalError {
    /// Creates an incomplete traversal error.
    #[must_use]
    pub fn incomplete(root_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Incomplete {
            root_id: root_id.into(),
            reason: reason.into(),
        }
    }
}

/// Errors related to acknowledging channel deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The receipt belongs to an earlier delivery of the message.
    #[error("Stale receipt '{receipt}': message was redelivered")]
    StaleReceipt {
        /// The rejected receipt handle.
        receipt: String,
    },

    /// The message is no longer held by the channel.
    #[error("Unknown message: {message_id}")]
    UnknownMessage {
        /// The message id.
        message_id: String,
    },
}

/// Errors raised by archive backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArchiveError {
    /// The backing storage could not be written or read.
    #[error("Archive I/O error for '{key}': {reason}")]
    Io {
        /// The archive key.
        key: String,
        /// The underlying reason.
        reason: String,
    },

    /// The tree could not be serialized.
    #[error("Archive serialization error for '{key}': {reason}")]
    Serialization {
        /// The archive key.
        key: String,
        /// The underlying reason.
        reason: String,
    },
}

/// Errors raised while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A value is out of range or inconsistent.
    #[error("Invalid configuration for '{field}': {reason}")]
    Invalid {
        /// The offending field.
        field: String,
        /// Why it is invalid.
        reason: String,
    },

    /// The configuration source could not be read or parsed.
    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl ConfigError {
    /// Creates an invalid field error.
    #[must_use]
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = LineageError> = std::result::Result<T, E>;
