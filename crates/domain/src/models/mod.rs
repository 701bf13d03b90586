//! Domain models for the report engine.

pub mod pin;
pub mod report;
pub mod report_period;
pub mod report_source;

pub use pin::{GraphGranularity, PinType};
pub use report::{
    Report, ReportOutput, ReportResult, ReportTaskKey, SharedReport, TimestampFormat, UserKey,
};
pub use report_period::{DayOfMonth, ReportDurationType, ReportPeriod, ReportPeriodError};
pub use report_source::{ReportDataStream, ReportSource};
