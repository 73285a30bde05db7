//! Capture-timestamp normalization.
//!
//! Rows arrive with `dt` as ISO-8601 text or as an epoch number. Everything
//! is normalized to microseconds since the Unix epoch so it can be compared
//! and indexed as an integer. Values that cannot be parsed normalize to
//! `None`, which orders as the oldest possible instant.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y:%m:%d %H:%M:%S",
];

/// Convert epoch seconds (possibly fractional) to epoch microseconds.
pub fn seconds_to_micros(secs: f64) -> Option<i64> {
    if !secs.is_finite() {
        return None;
    }
    let micros = (secs * 1_000_000.0).round();
    if micros < i64::MIN as f64 || micros > i64::MAX as f64 {
        return None;
    }
    Some(micros as i64)
}

/// Normalize a textual `dt` value to epoch microseconds.
///
/// Accepts RFC 3339 (including a trailing `Z`), naive ISO-8601 date-times
/// and dates (interpreted as UTC), EXIF-style `YYYY:MM:DD HH:MM:SS`, and
/// numeric strings holding epoch seconds.
pub fn normalize_timestamp(value: &str) -> Option<i64> {
    let text = value.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(secs) = text.parse::<f64>() {
        return seconds_to_micros(secs);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.timestamp_micros());
    }

    for format in NAIVE_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed.and_utc().timestamp_micros());
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc().timestamp_micros())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc3339_with_zulu() {
        assert_eq!(
            normalize_timestamp("2023-01-01T00:00:00Z"),
            Some(1_672_531_200_000_000)
        );
    }

    #[test]
    fn test_naive_is_utc() {
        assert_eq!(
            normalize_timestamp("2023-01-01T00:00:00"),
            normalize_timestamp("2023-01-01T00:00:00+00:00")
        );
        assert_eq!(
            normalize_timestamp("2023-01-01"),
            normalize_timestamp("2023-01-01 00:00:00")
        );
    }

    #[test]
    fn test_offset_is_applied() {
        let utc = normalize_timestamp("2023-06-01T12:00:00Z").unwrap();
        let plus_two = normalize_timestamp("2023-06-01T14:00:00+02:00").unwrap();
        assert_eq!(utc, plus_two);
    }

    #[test]
    fn test_numeric_strings_are_epoch_seconds() {
        assert_eq!(normalize_timestamp("3"), Some(3_000_000));
        assert_eq!(normalize_timestamp(" 1.5 "), Some(1_500_000));
    }

    #[test]
    fn test_garbage_is_none() {
        assert_eq!(normalize_timestamp(""), None);
        assert_eq!(normalize_timestamp("   "), None);
        assert_eq!(normalize_timestamp("yesterday"), None);
        assert_eq!(seconds_to_micros(f64::NAN), None);
        assert_eq!(seconds_to_micros(f64::INFINITY), None);
    }
}
