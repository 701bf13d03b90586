//! Report archive cleanup background job.

use tracing::info;

use crate::services::ReportGenerationService;

use super::scheduler::{Job, JobFrequency};

/// Background job to remove report archives past their retention period.
pub struct ReportCleanupJob {
    generator: ReportGenerationService,
    retention_days: u32,
}

impl ReportCleanupJob {
    /// Create a new report cleanup job.
    ///
    /// # Arguments
    /// * `generator` - Service owning the reports directory
    /// * `retention_days` - Archives older than this are deleted
    pub fn new(generator: ReportGenerationService, retention_days: u32) -> Self {
        Self {
            generator,
            retention_days,
        }
    }

    /// Runs one cleanup pass and returns the number of archives removed.
    pub async fn run_once(&self) -> Result<u32, String> {
        let generator = self.generator.clone();
        let retention_days = self.retention_days;

        tokio::task::spawn_blocking(move || generator.cleanup_expired_archives(retention_days))
            .await
            .map_err(|e| format!("Cleanup worker failed: {}", e))?
            .map_err(|e| format!("Failed to cleanup expired reports: {}", e))
    }
}

#[async_trait::async_trait]
impl Job for ReportCleanupJob {
    fn name(&self) -> &'static str {
        "report_cleanup"
    }

    fn frequency(&self) -> JobFrequency {
        // Run daily to clean up expired archives
        JobFrequency::Daily
    }

    async fn execute(&self) -> Result<(), String> {
        let deleted = self.run_once().await?;

        if deleted > 0 {
            info!(
                deleted = deleted,
                retention_days = self.retention_days,
                "Cleaned up expired report archives"
            );
        }

        Ok(())
    }
}
