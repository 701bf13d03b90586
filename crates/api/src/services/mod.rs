//! Report generation pipeline, CRUD service and external integrations.

pub mod email;
pub mod report_generation;
pub mod report_store;
pub mod reporting;

pub use email::{EmailError, EmailMessage, EmailService};
pub use report_generation::{ReportGenerationError, ReportGenerationService};
pub use report_store::ReportStore;
pub use reporting::{ReportingError, ReportingService};
