//! Report period variants and next-fire arithmetic.
//!
//! A period decides when a report fires and how far back its export looks.
//! All calendar arithmetic happens in the report's own timezone.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use shared::clock::{from_millis, DAY_MILLIS};
use thiserror::Error;

use super::pin::GraphGranularity;

/// Whether a recurring period is bounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportDurationType {
    #[default]
    Infinite,
    Custom,
}

/// Anchor day for monthly reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayOfMonth {
    #[default]
    First,
    Last,
}

impl DayOfMonth {
    fn label(&self) -> &'static str {
        match self {
            DayOfMonth::First => "First",
            DayOfMonth::Last => "Last",
        }
    }
}

/// Reasons a period cannot be scheduled.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReportPeriodError {
    #[error("End date {end} is before start date {start}")]
    InvalidRange { start: i64, end: i64 },

    #[error("Next run at {next} is past the report end date {end}")]
    Exhausted { next: i64, end: i64 },

    #[error("Timestamp {0} cannot be represented")]
    InvalidTimestamp(i64),
}

/// When a report fires. Serialized as the `reportType` of a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportPeriod {
    /// Manual trigger only, exporting the last `range_millis` of data.
    #[serde(rename_all = "camelCase")]
    OneTime { range_millis: i64 },

    /// Every day at the time-of-day of `at_time`.
    #[serde(rename_all = "camelCase")]
    Daily {
        at_time: i64,
        #[serde(default)]
        duration_type: ReportDurationType,
        #[serde(default)]
        start_ts: i64,
        #[serde(default)]
        end_ts: i64,
    },

    /// Once a month on the first or last day, at the time-of-day of `at_time`.
    #[serde(rename_all = "camelCase")]
    Monthly {
        at_time: i64,
        #[serde(default)]
        duration_type: ReportDurationType,
        #[serde(default)]
        start_ts: i64,
        #[serde(default)]
        end_ts: i64,
        #[serde(default)]
        day_of_month: DayOfMonth,
    },
}

impl ReportPeriod {
    /// Human-readable period label.
    pub fn label(&self) -> &'static str {
        match self {
            ReportPeriod::OneTime { .. } => "One time",
            ReportPeriod::Daily { .. } => "Daily",
            ReportPeriod::Monthly { .. } => "Monthly",
        }
    }

    pub fn is_recurring(&self) -> bool {
        !matches!(self, ReportPeriod::OneTime { .. })
    }

    /// How far back an export of this period reaches.
    pub fn look_back_millis(&self) -> i64 {
        match self {
            ReportPeriod::OneTime { range_millis } => *range_millis,
            ReportPeriod::Daily { .. } | ReportPeriod::Monthly { .. } => DAY_MILLIS,
        }
    }

    /// Number of samples to request from storage for one export.
    pub fn fetch_count(&self, granularity: GraphGranularity) -> usize {
        (self.look_back_millis() / granularity.millis()).max(1) as usize
    }

    /// True only for bounded periods whose end has passed.
    pub fn is_expired(&self, now: i64) -> bool {
        match self {
            ReportPeriod::OneTime { .. } => false,
            ReportPeriod::Daily {
                duration_type,
                end_ts,
                ..
            }
            | ReportPeriod::Monthly {
                duration_type,
                end_ts,
                ..
            } => *duration_type == ReportDurationType::Custom && now > *end_ts,
        }
    }

    /// Computes the next fire instant at or after `now`.
    ///
    /// Returns `Ok(None)` for one-time reports, which only run on manual
    /// trigger. An error means the report must not be accepted or scheduled.
    pub fn next_fire(&self, now: i64, tz: Tz) -> Result<Option<i64>, ReportPeriodError> {
        match self {
            ReportPeriod::OneTime { .. } => Ok(None),
            ReportPeriod::Daily {
                at_time,
                duration_type,
                start_ts,
                end_ts,
            } => {
                check_range(*start_ts, *end_ts)?;
                let base = base_instant(*duration_type, *start_ts, now);
                let time = time_of_day(*at_time, tz)?;
                let base_date = local_date(base, tz)?;

                let mut candidate = at_local(tz, base_date, time, base)?;
                if candidate < base {
                    let tomorrow = base_date
                        .succ_opt()
                        .ok_or(ReportPeriodError::InvalidTimestamp(base))?;
                    candidate = at_local(tz, tomorrow, time, base)?;
                }
                check_end(*duration_type, candidate, *end_ts).map(Some)
            }
            ReportPeriod::Monthly {
                at_time,
                duration_type,
                start_ts,
                end_ts,
                day_of_month,
            } => {
                check_range(*start_ts, *end_ts)?;
                let base = base_instant(*duration_type, *start_ts, now);
                let time = time_of_day(*at_time, tz)?;
                let base_date = local_date(base, tz)?;

                let anchor = anchored_day(base_date.year(), base_date.month(), *day_of_month)
                    .ok_or(ReportPeriodError::InvalidTimestamp(base))?;
                let mut candidate = at_local(tz, anchor, time, base)?;
                if candidate < base {
                    let (year, month) = next_month(base_date.year(), base_date.month());
                    let anchor = anchored_day(year, month, *day_of_month)
                        .ok_or(ReportPeriodError::InvalidTimestamp(base))?;
                    candidate = at_local(tz, anchor, time, base)?;
                }
                check_end(*duration_type, candidate, *end_ts).map(Some)
            }
        }
    }

    /// Period description used in the notification body.
    pub fn describe(&self, tz: Tz) -> String {
        match self {
            ReportPeriod::OneTime { .. } => "One time".to_string(),
            ReportPeriod::Daily {
                at_time,
                duration_type,
                start_ts,
                end_ts,
            } => {
                let mut out = format!("Daily, at {}", format_time_of_day(*at_time, tz));
                push_custom_bounds(&mut out, *duration_type, *start_ts, *end_ts, tz);
                out
            }
            ReportPeriod::Monthly {
                at_time,
                duration_type,
                start_ts,
                end_ts,
                day_of_month,
            } => {
                let mut out = format!(
                    "Monthly, at {}<br>Day of month: {}",
                    format_time_of_day(*at_time, tz),
                    day_of_month.label()
                );
                push_custom_bounds(&mut out, *duration_type, *start_ts, *end_ts, tz);
                out
            }
        }
    }
}

fn check_range(start: i64, end: i64) -> Result<(), ReportPeriodError> {
    if end < start {
        return Err(ReportPeriodError::InvalidRange { start, end });
    }
    Ok(())
}

fn check_end(
    duration_type: ReportDurationType,
    candidate: i64,
    end: i64,
) -> Result<i64, ReportPeriodError> {
    if duration_type == ReportDurationType::Custom && candidate > end {
        return Err(ReportPeriodError::Exhausted {
            next: candidate,
            end,
        });
    }
    Ok(candidate)
}

fn base_instant(duration_type: ReportDurationType, start: i64, now: i64) -> i64 {
    match duration_type {
        ReportDurationType::Infinite => now,
        ReportDurationType::Custom => now.max(start),
    }
}

fn to_zoned(millis: i64, tz: Tz) -> Result<DateTime<Tz>, ReportPeriodError> {
    from_millis(millis)
        .map(|dt| dt.with_timezone(&tz))
        .ok_or(ReportPeriodError::InvalidTimestamp(millis))
}

fn time_of_day(at_time: i64, tz: Tz) -> Result<NaiveTime, ReportPeriodError> {
    Ok(to_zoned(at_time, tz)?.time())
}

fn local_date(millis: i64, tz: Tz) -> Result<NaiveDate, ReportPeriodError> {
    Ok(to_zoned(millis, tz)?.date_naive())
}

fn at_local(
    tz: Tz,
    date: NaiveDate,
    time: NaiveTime,
    context: i64,
) -> Result<i64, ReportPeriodError> {
    resolve_local(tz, date.and_time(time))
        .map(|dt| dt.timestamp_millis())
        .ok_or(ReportPeriodError::InvalidTimestamp(context))
}

/// Maps a wall-clock time to an instant. DST gaps shift forward one hour,
/// ambiguous times take the earlier instant.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest(),
    }
}

fn anchored_day(year: i32, month: u32, day_of_month: DayOfMonth) -> Option<NaiveDate> {
    match day_of_month {
        DayOfMonth::First => NaiveDate::from_ymd_opt(year, month, 1),
        DayOfMonth::Last => {
            let (next_year, next) = next_month(year, month);
            NaiveDate::from_ymd_opt(next_year, next, 1)?.pred_opt()
        }
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn format_time_of_day(at_time: i64, tz: Tz) -> String {
    time_of_day(at_time, tz)
        .unwrap_or_default()
        .format("%H:%M")
        .to_string()
}

fn push_custom_bounds(
    out: &mut String,
    duration_type: ReportDurationType,
    start: i64,
    end: i64,
    tz: Tz,
) {
    if duration_type != ReportDurationType::Custom {
        return;
    }
    if let (Ok(start), Ok(end)) = (local_date(start, tz), local_date(end, tz)) {
        out.push_str(&format!("<br>Start: {}<br>End: {}", start, end));
    }
}
