//! Dead-letter channel holding messages that exhausted their attempts.

use parking_lot::Mutex;
use serde::Serialize;

use crate::utils::Timestamp;

/// A parked message awaiting operator attention.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter<T> {
    /// The original message id.
    pub message_id: String,
    /// The original body.
    pub body: T,
    /// How many times the message had been delivered.
    pub receive_count: u32,
    /// Why the message was parked.
    pub reason: String,
    /// When the message was first published.
    pub published_at: Timestamp,
    /// When the message was parked.
    pub dead_lettered_at: Timestamp,
}

/// Side channel for messages that exceeded their delivery budget.
///
/// Nothing is discarded here; entries stay until drained.
#[derive(Debug)]
pub struct DeadLetterChannel<T> {
    name: String,
    entries: Mutex<Vec<DeadLetter<T>>>,
}

impl<T: Clone> DeadLetterChannel<T> {
    /// Creates an empty dead-letter channel.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// The channel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn push(&self, entry: DeadLetter<T>) {
        self.entries.lock().push(entry);
    }

    /// Returns a copy of all parked entries.
    #[must_use]
    pub fn entries(&self) -> Vec<DeadLetter<T>> {
        self.entries.lock().clone()
    }

    /// Removes and returns all parked entries.
    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        std::mem::take(&mut *self.entries.lock())
    }

    /// Number of parked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is parked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now_utc;

    fn letter(id: &str) -> DeadLetter<String> {
        DeadLetter {
            message_id: id.to_string(),
            body: format!("body-{id}"),
            receive_count: 3,
            reason: "max receive count reached".to_string(),
            published_at: now_utc(),
            dead_lettered_at: now_utc(),
        }
    }

    #[test]
    fn test_push_and_drain() {
        let dlq = DeadLetterChannel::new("events-dlq");
        assert!(dlq.is_empty());

        dlq.push(letter("a"));
        dlq.push(letter("b"));
        assert_eq!(dlq.len(), 2);
        assert_eq!(dlq.entries()[1].body, "body-b");

        let drained = dlq.drain();
        assert_eq!(drained.len(), 2);
        assert!(dlq.is_empty());
        assert_eq!(dlq.name(), "events-dlq");
    }
}
