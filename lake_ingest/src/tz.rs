//! Timestamp parsing and formatting helpers.
//!
//! What this module provides:
//! - [`utc_from_micros`]: Interpret a UTC-microsecond event timestamp as a `DateTime<Utc>`,
//!   returning `None` outside chrono's representable range.
//! - [`parse_ts_to_utc`]: Parse RFC-3339 timestamps with an explicit offset and convert to UTC.
//! - [`to_rfc3339_millis`] / [`now_rfc3339`]: The text format used for every timestamp column
//!   in the manifest database.
//! - [`format_date`] / [`parse_date`]: `YYYY-MM-DD` text used for trading dates, both in the
//!   database and in partition paths.
//!
//! All database writes are RFC-3339 UTC strings; exchange-local time only appears when a
//! trading date is derived (see [`crate::trading_date`]).

use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};

/// Date format used for trading dates everywhere on disk.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// UTC microseconds since the Unix epoch -> `DateTime<Utc>`.
pub fn utc_from_micros(ts_us: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_micros(ts_us)
}

/// RFC-3339 with offset -> UTC.
///
/// Example:
/// - "2024-03-10T09:30:00-05:00" -> "2024-03-10T14:30:00Z"
pub fn parse_ts_to_utc(s: &str) -> anyhow::Result<DateTime<Utc>> {
    let dt = DateTime::parse_from_rfc3339(s).with_context(|| format!("bad rfc3339: {s}"))?;
    Ok(dt.with_timezone(&Utc))
}

/// Format a UTC datetime as an RFC-3339 string with millisecond precision.
pub fn to_rfc3339_millis(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Current wall-clock time in the manifest's text format.
pub fn now_rfc3339() -> String {
    to_rfc3339_millis(Utc::now())
}

/// `2024-01-15`
pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

/// Inverse of [`format_date`].
pub fn parse_date(s: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT).with_context(|| format!("bad date: {s}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_rfc3339_offset_to_utc() {
        let got = parse_ts_to_utc("2024-03-10T09:30:00-05:00").expect("parse");
        let want = Utc.with_ymd_and_hms(2024, 3, 10, 14, 30, 0).unwrap();
        assert_eq!(got, want);
    }

    #[test]
    fn micros_round_trip_through_rfc3339() {
        let ts_us = 1_705_300_200_123_000; // 2024-01-15T06:30:00.123Z
        let dt = utc_from_micros(ts_us).unwrap();
        assert_eq!(to_rfc3339_millis(dt), "2024-01-15T06:30:00.123Z");
        assert_eq!(dt.timestamp_micros(), ts_us);
    }

    #[test]
    fn micros_outside_chrono_range_is_none() {
        assert!(utc_from_micros(i64::MAX).is_none());
    }

    #[test]
    fn dates_use_iso_format() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        assert_eq!(format_date(d), "2024-02-29");
        assert_eq!(parse_date("2024-02-29").unwrap(), d);
        assert!(parse_date("29/02/2024").is_err());
    }
}
