//! Report scheduling engine, background job scheduler and job implementations.

mod report_cleanup;
mod report_scheduler;
mod scheduler;

pub use report_cleanup::ReportCleanupJob;
pub use report_scheduler::{ReportScheduler, ScheduleError, SchedulerStats};
pub use scheduler::{Job, JobFrequency, JobScheduler};
