//! Time and timestamp helpers.

use chrono::{DateTime, Utc};

/// UTC timestamp used for `timestamp`, `last_changed`, trigger instants, etc.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Milliseconds since the Unix epoch, the unit used on the wire.
#[must_use]
pub fn to_millis(ts: Timestamp) -> i64 {
    ts.timestamp_millis()
}

/// Inverse of [`to_millis`]. Returns `None` when out of chrono's range.
#[must_use]
pub fn from_millis(ms: i64) -> Option<Timestamp> {
    DateTime::from_timestamp_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_return_current_utc_time() {
        let before = Utc::now();
        let ts = now();
        let after = Utc::now();
        assert!(ts >= before);
        assert!(ts <= after);
    }

    #[test]
    fn should_convert_millis_both_ways() {
        let ts = from_millis(1_700_000_000_123).unwrap();
        assert_eq!(to_millis(ts), 1_700_000_000_123);
    }
}
