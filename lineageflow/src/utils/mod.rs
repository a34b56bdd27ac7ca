//! Utility functions for identifier generation, timestamps and clocks.

mod clock;
mod ids;
pub mod timestamps;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{generate_event_id, generate_node_id, is_valid_identifier};
pub use timestamps::{iso_timestamp, now_utc, ttl_expiry_from, Timestamp};
