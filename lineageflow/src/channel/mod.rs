//! Durable in-process channels with at-least-once delivery.
//!
//! A [`DurableChannel`] hands out batches of messages. A delivered message
//! stays in the channel, hidden for a visibility window, until it is
//! acknowledged. If the window runs out first the message is delivered
//! again, possibly to another consumer. Once a message has been delivered
//! `max_receive_count` times it is moved to the channel's
//! [`DeadLetterChannel`] instead of being delivered again.
//!
//! Messages carry no ordering guarantee and may be delivered more than once;
//! consumers must be idempotent.

mod backoff;
mod dead_letter;
mod delivery;
mod durable;

pub use backoff::{BackoffStrategy, JitterStrategy, RedeliveryBackoff};
pub use dead_letter::{DeadLetter, DeadLetterChannel};
pub use delivery::{Delivery, ReceiptHandle, Redelivery};
pub use durable::DurableChannel;
