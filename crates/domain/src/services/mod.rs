//! Domain services for the report engine.
//!
//! Services describe the collaborators the engine talks to.

pub mod notification;

pub use notification::{MockReportMailer, NotificationResult, ReportMailer, SentReportEmail};
