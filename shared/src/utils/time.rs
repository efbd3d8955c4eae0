//! Time-related utilities

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};

/// Current UTC time truncated to whole seconds, the precision of stored
/// creation times
pub fn now_seconds() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Truncate a timestamp to whole seconds
pub fn truncate_to_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    t.trunc_subsecs(0)
}

/// Nanoseconds since the Unix epoch, clamped at zero for pre-epoch times
pub fn unix_nanos(t: &DateTime<Utc>) -> u64 {
    t.timestamp_nanos_opt()
        .map(|n| u64::try_from(n).unwrap_or(0))
        .unwrap_or(0)
}

/// Inverse of [`unix_nanos`]
pub fn from_unix_nanos(nanos: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(i64::try_from(nanos).unwrap_or(i64::MAX))
}

/// Parse a timestamp given on the command line or in a request.
///
/// Accepts RFC 3339 (`2024-05-01T12:00:00Z`), a naive `YYYY-MM-DDTHH:MM:SS`
/// taken as UTC, or integer Unix seconds.
pub fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&t));
    }
    let secs: i64 = s
        .parse()
        .with_context(|| format!("invalid time {:?}", s))?;
    DateTime::from_timestamp(secs, 0).with_context(|| format!("time {} out of range", secs))
}
