//! Delivered messages and their receipts.

use std::fmt;
use std::time::Duration;

use crate::utils::Timestamp;

/// Proof of one particular delivery of a message.
///
/// Every delivery of a message gets a new token, so a consumer whose
/// visibility window expired cannot acknowledge a newer delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle {
    pub(crate) message_id: String,
    pub(crate) token: u64,
}

impl ReceiptHandle {
    /// The message this receipt refers to.
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.message_id, self.token)
    }
}

/// A message handed to a consumer.
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    /// Stable identifier of the message across deliveries.
    pub message_id: String,
    /// The message body.
    pub body: T,
    /// Receipt needed to acknowledge this delivery.
    pub receipt: ReceiptHandle,
    /// How many times the message has been delivered, this one included.
    pub receive_count: u32,
    /// When the message was first published.
    pub published_at: Timestamp,
}

impl<T> Delivery<T> {
    /// Returns true if this is a redelivery.
    #[must_use]
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

/// What happened to a negatively acknowledged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redelivery {
    /// The message becomes visible again after the delay.
    Scheduled(Duration),
    /// The attempt budget was spent; the message is in the dead-letter channel.
    DeadLettered,
}
