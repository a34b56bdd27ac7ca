//! Identifier generation and validation.

use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

/// Generates a new node identifier (UUID v4).
#[must_use]
pub fn generate_node_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates a new event or request identifier (UUID v7, time-ordered).
#[must_use]
pub fn generate_event_id() -> String {
    Uuid::now_v7().to_string()
}

fn identifier_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-Za-z0-9._:\-]{1,128}$").ok())
        .as_ref()
}

/// Returns true if `id` is usable as a root or node identifier.
///
/// Identifiers are 1 to 128 characters of ASCII letters, digits, `.`, `_`,
/// `:` or `-`.
#[must_use]
pub fn is_valid_identifier(id: &str) -> bool {
    identifier_pattern().is_some_and(|pattern| pattern.is_match(id))
}
