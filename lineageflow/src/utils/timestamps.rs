//! Timestamp helpers.

use chrono::{DateTime, Duration, Utc};

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC time as an ISO 8601 formatted string.
///
/// # Examples
///
/// ```
/// use lineageflow::utils::iso_timestamp;
///
/// let ts = iso_timestamp();
/// assert!(ts.contains('T'));
/// ```
#[must_use]
pub fn iso_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Computes a record expiry `ttl_seconds` after `from`.
///
/// Returns `None` for a zero TTL, which means the record never expires.
#[must_use]
pub fn ttl_expiry_from(from: Timestamp, ttl_seconds: u64) -> Option<Timestamp> {
    if ttl_seconds == 0 {
        return None;
    }
    let secs = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
    Duration::try_seconds(secs).and_then(|d| from.checked_add_signed(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ttl_expiry_from() {
        let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let expiry = ttl_expiry_from(from, 3600).unwrap();
        assert_eq!(expiry, Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        assert!(ttl_expiry_from(now_utc(), 0).is_none());
    }

    #[test]
    fn test_huge_ttl_does_not_panic() {
        assert!(ttl_expiry_from(now_utc(), u64::MAX).is_none());
    }
}
