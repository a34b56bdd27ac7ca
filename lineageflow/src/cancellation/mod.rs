//! Cooperative shutdown for background workers.

mod token;

pub use token::ShutdownToken;
