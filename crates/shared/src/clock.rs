//! Epoch-millisecond clock helpers.
//!
//! Reports, schedules and telemetry records all carry timestamps as
//! milliseconds since the Unix epoch.

use chrono::{DateTime, TimeZone, Utc};

/// Milliseconds in one day.
pub const DAY_MILLIS: i64 = 86_400_000;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Converts epoch milliseconds into a UTC instant.
///
/// Returns `None` for values outside chrono's representable range.
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}

/// Milliseconds from `now` until `target`, clamped at zero.
pub fn millis_until(target: i64, now: i64) -> u64 {
    target.saturating_sub(now).max(0) as u64
}
