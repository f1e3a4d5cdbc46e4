//! Conversions between stored column values and record types.

use chrono::{DateTime, TimeDelta, Utc};
use sightline_core::JsonMap;

use crate::errors::StoreError;

/// Timestamp as REAL unix seconds with microsecond precision.
#[allow(clippy::cast_precision_loss)]
pub fn to_epoch(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

/// Epoch seconds `days` before `now`, or `None` when out of range.
pub fn days_before(now: DateTime<Utc>, days: i64) -> Option<f64> {
    TimeDelta::try_days(days).and_then(|d| now.checked_sub_signed(d)).map(to_epoch)
}

/// Parse REAL unix seconds back into a timestamp.
#[allow(clippy::cast_possible_truncation)]
pub fn from_epoch(
    secs: f64,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    if !secs.is_finite() {
        return Err(StoreError::CorruptRow { table, column, detail: format!("not a timestamp: {secs}") });
    }
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64).ok_or_else(|| {
        StoreError::CorruptRow { table, column, detail: format!("timestamp out of range: {secs}") }
    })
}

/// Parse a JSON object column.
pub fn parse_json_map(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<JsonMap, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid JSON object: {e}"),
    })
}

/// Parse a string into an enum, returning `CorruptRow` on failure.
pub fn parse_enum<T: std::str::FromStr>(
    raw: &str,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("unknown variant: {raw}"),
    })
}

/// Convert a stored non-negative integer.
pub fn to_u64(raw: i64, table: &'static str, column: &'static str) -> Result<u64, StoreError> {
    u64::try_from(raw).map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("negative count: {raw}"),
    })
}

/// A `LIMIT`/`OFFSET` bound; `usize` values past `i64::MAX` clamp.
pub fn page_bound(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Escape LIKE special characters for safe pattern matching.
pub fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use sightline_core::Severity;

    #[test]
    fn escape_like_special_chars() {
        assert_eq!(escape_like("hello"), "hello");
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("foo_bar"), "foo\\_bar");
        assert_eq!(escape_like("back\\slash"), "back\\\\slash");
    }

    #[test]
    fn epoch_round_trip_keeps_microseconds() {
        let ts = DateTime::from_timestamp_micros(1_760_000_000_123_456).unwrap();
        let back = from_epoch(to_epoch(ts), "traces", "start_time").unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn days_before_handles_extremes() {
        let now = Utc::now();
        assert!(days_before(now, 7).unwrap() < to_epoch(now));
        assert!(days_before(now, i64::MAX).is_none());
    }

    #[test]
    fn epoch_rejects_nan() {
        let err = from_epoch(f64::NAN, "events", "timestamp").unwrap_err();
        assert_matches!(err, StoreError::CorruptRow { table: "events", column: "timestamp", .. });
    }

    #[test]
    fn parse_enum_failure_names_column() {
        let result: Result<Severity, _> = parse_enum("loud", "events", "severity");
        assert_matches!(result, Err(StoreError::CorruptRow { column: "severity", .. }));
        let ok: Severity = parse_enum("warning", "events", "severity").unwrap();
        assert_eq!(ok, Severity::Warning);
    }

    #[test]
    fn parse_json_map_rejects_arrays() {
        assert!(parse_json_map("[1,2]", "events", "payload").is_err());
        let map = parse_json_map(r#"{"k":"v"}"#, "events", "payload").unwrap();
        assert_eq!(map["k"], "v");
    }

    #[test]
    fn negative_counts_are_corrupt() {
        assert_eq!(to_u64(3, "traces", "event_count").unwrap(), 3);
        assert!(to_u64(-1, "traces", "event_count").is_err());
    }
}
