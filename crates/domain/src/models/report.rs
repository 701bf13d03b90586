//! Report domain model.

use std::fmt;
use std::sync::Arc;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use shared::clock::from_millis;
use tokio::sync::RwLock;
use validator::Validate;

use super::pin::GraphGranularity;
use super::report_period::ReportPeriod;
use super::report_source::ReportSource;

/// A report shared between the scheduler, the generation pipeline and readers.
pub type SharedReport = Arc<RwLock<Report>>;

/// Identifies a platform user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserKey {
    pub email: String,
    pub app_name: String,
}

impl UserKey {
    pub fn new(email: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            app_name: app_name.into(),
        }
    }

    /// Prefix used for the user's storage directory and archive names.
    pub fn file_prefix(&self) -> String {
        format!("{}_{}", self.email, self.app_name)
    }
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.email, self.app_name)
    }
}

/// Identifies one scheduled report slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportTaskKey {
    pub user: UserKey,
    pub dashboard_id: i32,
    pub report_id: i32,
}

impl ReportTaskKey {
    pub fn new(user: UserKey, dashboard_id: i32, report_id: i32) -> Self {
        Self {
            user,
            dashboard_id,
            report_id,
        }
    }
}

impl fmt::Display for ReportTaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user, self.dashboard_id, self.report_id)
    }
}

/// Outcome of the last report run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportResult {
    Ok,
    NoData,
    Error,
    Expired,
}

impl ReportResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportResult::Ok => "ok",
            ReportResult::NoData => "no_data",
            ReportResult::Error => "error",
            ReportResult::Expired => "expired",
        }
    }
}

/// Requested archive layout. Every mode is currently produced as one CSV
/// per device and pin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportOutput {
    MergedCsv,
    ExcelTabPerDevice,
    CsvFilePerDevice,
    #[default]
    CsvFilePerDevicePerPin,
}

/// How timestamps are rendered in exported CSV lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimestampFormat {
    Ts,
    IsoSimple,
    IsoUs,
    IsoEu,
}

impl TimestampFormat {
    fn pattern(&self) -> Option<&'static str> {
        match self {
            TimestampFormat::Ts => None,
            TimestampFormat::IsoSimple => Some("%Y-%m-%dT%H:%M:%S"),
            TimestampFormat::IsoUs => Some("%m/%d/%Y %I:%M:%S %p"),
            TimestampFormat::IsoEu => Some("%d/%m/%Y %H:%M:%S"),
        }
    }

    /// Formats an epoch-millis timestamp in `tz`. `None` renders raw millis.
    pub fn format_ts(format: Option<TimestampFormat>, ts: i64, tz: Tz) -> String {
        let pattern = format.as_ref().and_then(TimestampFormat::pattern);
        match (pattern, from_millis(ts)) {
            (Some(pattern), Some(dt)) => dt.with_timezone(&tz).format(pattern).to_string(),
            _ => ts.to_string(),
        }
    }
}

fn default_tz() -> Tz {
    Tz::UTC
}

/// A recurring or one-time telemetry export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: i32,

    #[validate(custom(function = "shared::validation::validate_report_name"))]
    pub name: String,

    #[serde(default)]
    pub report_sources: Vec<ReportSource>,

    pub report_type: ReportPeriod,

    #[validate(custom(function = "shared::validation::validate_recipients"))]
    pub recipients: String,

    #[serde(default)]
    pub granularity_type: GraphGranularity,

    #[serde(default)]
    pub is_active: bool,

    #[serde(default)]
    pub report_output: ReportOutput,

    #[serde(default)]
    pub format: Option<TimestampFormat>,

    #[serde(default = "default_tz")]
    pub tz_name: Tz,

    #[serde(default)]
    pub next_report_at: i64,

    #[serde(default)]
    pub last_report_at: i64,

    #[serde(default)]
    pub last_run_result: Option<ReportResult>,
}

impl Report {
    pub fn is_recurring(&self) -> bool {
        self.report_type.is_recurring()
    }

    /// Sources that name at least one device and one stream.
    pub fn valid_sources(&self) -> impl Iterator<Item = &ReportSource> {
        self.report_sources.iter().filter(|s| s.is_valid())
    }

    pub fn email_subject(&self) -> String {
        format!(
            "Your {} {} is ready",
            self.report_type.label().to_lowercase(),
            self.name
        )
    }

    /// Report-specific part of the notification body.
    pub fn dynamic_section(&self) -> String {
        format!(
            "Report name: {}<br>Period: {}",
            self.name,
            self.report_type.describe(self.tz_name)
        )
    }

    /// Clears run state carried in from a client payload.
    pub fn reset_run_state(&mut self) {
        self.next_report_at = 0;
        self.last_report_at = 0;
        self.last_run_result = None;
    }

    pub fn into_shared(self) -> SharedReport {
        Arc::new(RwLock::new(self))
    }
}
