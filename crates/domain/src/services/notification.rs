//! Report notification contract.
//!
//! The generation pipeline hands finished archives to a [`ReportMailer`];
//! the transport behind it lives outside the domain.

use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Result of a notification send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationResult {
    /// Notification was sent to every recipient.
    Sent,
    /// Notification was skipped (e.g., mail disabled).
    Skipped,
    /// Notification sending failed.
    Failed(String),
}

impl NotificationResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, NotificationResult::Failed(_))
    }
}

/// Delivers the "report is ready" email.
#[async_trait::async_trait]
pub trait ReportMailer: Send + Sync {
    /// Sends a download link to a comma-separated recipient list.
    async fn send_report_email(
        &self,
        recipients: &str,
        subject: &str,
        download_url: &str,
        dynamic_section: &str,
    ) -> NotificationResult;
}

/// One email captured by [`MockReportMailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReportEmail {
    pub recipients: String,
    pub subject: String,
    pub download_url: String,
    pub dynamic_section: String,
}

/// Recording mailer for development and testing.
///
/// Logs notifications and keeps them in memory instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct MockReportMailer {
    sent: Arc<Mutex<Vec<SentReportEmail>>>,
    simulate_failure: bool,
    delay: Option<Duration>,
}

impl MockReportMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock mailer that fails every send.
    pub fn failing() -> Self {
        Self {
            simulate_failure: true,
            ..Self::default()
        }
    }

    /// Create a mock mailer whose sends take `delay` to complete.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Emails recorded so far, oldest first.
    pub fn sent(&self) -> Vec<SentReportEmail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ReportMailer for MockReportMailer {
    async fn send_report_email(
        &self,
        recipients: &str,
        subject: &str,
        download_url: &str,
        dynamic_section: &str,
    ) -> NotificationResult {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.simulate_failure {
            tracing::warn!(
                recipients = %recipients,
                "Mock report mailer simulating failure"
            );
            return NotificationResult::Failed("Simulated failure".to_string());
        }

        tracing::info!(
            recipients = %recipients,
            subject = %subject,
            download_url = %download_url,
            "Mock: Would send report email"
        );

        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentReportEmail {
                recipients: recipients.to_string(),
                subject: subject.to_string(),
                download_url: download_url.to_string(),
                dynamic_section: dynamic_section.to_string(),
            });
        }

        NotificationResult::Sent
    }
}
