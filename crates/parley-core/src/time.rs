//! Timestamp helpers.
//!
//! Every stored timestamp is RFC 3339 UTC with millisecond precision and a
//! `Z` suffix, so lexical order equals chronological order in `SQLite`.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Format a timestamp the way it is stored.
pub fn format(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in storage format.
pub fn now() -> String {
    format(Utc::now())
}

/// `now + ms` in storage format.
pub fn after_ms(from: DateTime<Utc>, ms: u64) -> String {
    let ms = i64::try_from(ms).unwrap_or(i64::MAX);
    format(from + Duration::milliseconds(ms))
}

/// Parse a stored timestamp. Returns `None` for anything malformed.
pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Milliseconds elapsed between `then` and `now`, clamped at zero.
pub fn elapsed_ms(then: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((now - then).num_milliseconds()).unwrap_or(0)
}
