//! Email service for sending "report is ready" notifications.
//!
//! Supports multiple email providers:
//! - `console`: Logs emails to console (development)
//! - `smtp`: Sends via SMTP server (lettre, STARTTLS)
//! - `sendgrid`: Uses SendGrid API

use crate::config::EmailConfig;
use domain::services::{NotificationResult, ReportMailer};
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use shared::validation::split_recipients;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// Errors that can occur during email operations.
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Email service not configured")]
    NotConfigured,

    #[error("Invalid email address: {0}")]
    InvalidAddress(String),

    #[error("Failed to send email: {0}")]
    SendFailed(String),

    #[error("Provider error: {0}")]
    ProviderError(String),
}

/// Email message to be sent.
#[derive(Debug, Clone)]
pub struct EmailMessage {
    /// Recipient email address
    pub to: String,
    /// Email subject
    pub subject: String,
    /// Plain text body
    pub body_text: String,
    /// HTML body
    pub body_html: String,
}

impl EmailMessage {
    /// Builds the notification for one recipient of a finished report.
    pub fn report_ready(to: &str, subject: &str, download_url: &str, dynamic_section: &str) -> Self {
        let body_text = format!(
            "Hi,\n\nYour report is ready. Download it here:\n\n{url}\n\n{details}\n",
            url = download_url,
            details = dynamic_section.replace("<br>", "\n"),
        );

        let body_html = format!(
            r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>{subject}</title>
</head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, Helvetica, Arial, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="margin-top: 0;">{subject}</h2>
    <p>{details}</p>
    <div style="margin: 30px 0;">
        <a href="{url}" style="background: #23c48e; color: white; padding: 14px 28px; text-decoration: none; border-radius: 6px; font-weight: bold; display: inline-block;">Download report</a>
    </div>
    <p style="color: #999; font-size: 12px;">Or copy and paste this link into your browser:<br><a href="{url}">{url}</a></p>
</body>
</html>"#,
            subject = escape_html(subject),
            details = dynamic_section
                .split("<br>")
                .map(escape_html)
                .collect::<Vec<_>>()
                .join("<br>"),
            url = escape_html(download_url)
        );

        Self {
            to: to.to_string(),
            subject: subject.to_string(),
            body_text,
            body_html,
        }
    }
}

/// Escapes text for interpolation into HTML content or attribute values.
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Email service for sending report notifications.
#[derive(Clone)]
pub struct EmailService {
    config: Arc<EmailConfig>,
}

impl EmailService {
    /// Creates a new EmailService with the given configuration.
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    /// Check if email service is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Send an email message.
    pub async fn send(&self, message: EmailMessage) -> Result<(), EmailError> {
        if !self.config.enabled {
            debug!(
                to = %message.to,
                subject = %message.subject,
                "Email service disabled, skipping send"
            );
            return Ok(());
        }

        match self.config.provider.as_str() {
            "console" => self.send_console(message).await,
            "smtp" => self.send_smtp(message).await,
            "sendgrid" => self.send_sendgrid(message).await,
            provider => {
                error!(provider = %provider, "Unknown email provider");
                Err(EmailError::NotConfigured)
            }
        }
    }

    /// Console provider - logs email to console (for development).
    async fn send_console(&self, message: EmailMessage) -> Result<(), EmailError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            from = %self.config.sender_email,
            from_name = %self.config.sender_name,
            "Email (console provider)"
        );

        info!(
            body_text = %message.body_text,
            "Email body (plain text)"
        );

        debug!(body_html_length = message.body_html.len(), "Email body (HTML)");

        Ok(())
    }

    /// SMTP provider - sends via SMTP server.
    async fn send_smtp(&self, message: EmailMessage) -> Result<(), EmailError> {
        if self.config.smtp_host.is_empty() {
            return Err(EmailError::NotConfigured);
        }

        let from = Mailbox::new(
            Some(self.config.sender_name.clone()),
            self.config
                .sender_email
                .parse()
                .map_err(|_| EmailError::InvalidAddress(self.config.sender_email.clone()))?,
        );
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|_| EmailError::InvalidAddress(message.to.clone()))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.clone())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(message.body_text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(message.body_html),
                    ),
            )
            .map_err(|e| EmailError::SendFailed(format!("Failed to build message: {}", e)))?;

        let builder = if self.config.smtp_use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| EmailError::ProviderError(e.to_string()))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.smtp_host)
        };

        let mut builder = builder.port(self.config.smtp_port);
        if !self.config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.smtp_username.clone(),
                self.config.smtp_password.clone(),
            ));
        }

        builder
            .build()
            .send(email)
            .await
            .map_err(|e| EmailError::SendFailed(format!("SMTP send failed: {}", e)))?;

        info!(
            to = %message.to,
            subject = %message.subject,
            "Email sent via SMTP"
        );
        Ok(())
    }

    /// SendGrid provider - sends via SendGrid API.
    async fn send_sendgrid(&self, message: EmailMessage) -> Result<(), EmailError> {
        if self.config.sendgrid_api_key.is_empty() {
            return Err(EmailError::NotConfigured);
        }

        let client = reqwest::Client::new();

        let body = serde_json::json!({
            "personalizations": [{
                "to": [{ "email": message.to }]
            }],
            "from": {
                "email": self.config.sender_email,
                "name": self.config.sender_name
            },
            "subject": message.subject,
            "content": [
                { "type": "text/plain", "value": message.body_text },
                { "type": "text/html", "value": message.body_html }
            ]
        });

        let response = client
            .post("https://api.sendgrid.com/v3/mail/send")
            .header(
                "Authorization",
                format!("Bearer {}", self.config.sendgrid_api_key),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EmailError::SendFailed(format!("SendGrid request failed: {}", e)))?;

        if response.status().is_success() {
            info!(
                to = %message.to,
                subject = %message.subject,
                "Email sent via SendGrid"
            );
            Ok(())
        } else {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            error!(
                status = %status,
                error = %error_body,
                "SendGrid API error"
            );
            Err(EmailError::ProviderError(format!(
                "SendGrid returned {}: {}",
                status, error_body
            )))
        }
    }
}

#[async_trait::async_trait]
impl ReportMailer for EmailService {
    async fn send_report_email(
        &self,
        recipients: &str,
        subject: &str,
        download_url: &str,
        dynamic_section: &str,
    ) -> NotificationResult {
        if !self.is_enabled() {
            debug!(recipients = %recipients, "Email service disabled, skipping report email");
            return NotificationResult::Skipped;
        }

        let mut failures = Vec::new();
        for to in split_recipients(recipients) {
            let message = EmailMessage::report_ready(to, subject, download_url, dynamic_section);
            if let Err(e) = self.send(message).await {
                error!(to = %to, error = %e, "Failed to send report email");
                failures.push(format!("{}: {}", to, e));
            }
        }

        if failures.is_empty() {
            NotificationResult::Sent
        } else {
            NotificationResult::Failed(failures.join("; "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> EmailConfig {
        EmailConfig {
            enabled: true,
            provider: "console".to_string(),
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            smtp_use_tls: true,
            sendgrid_api_key: String::new(),
            sender_email: "test@example.com".to_string(),
            sender_name: "Test".to_string(),
        }
    }

    #[test]
    fn test_email_service_creation() {
        let service = EmailService::new(test_config());
        assert!(service.is_enabled());
    }

    #[tokio::test]
    async fn test_send_console_email() {
        let service = EmailService::new(test_config());
        let message = EmailMessage::report_ready(
            "user@example.com",
            "Your daily Energy is ready",
            "http://localhost/reports/a.gz",
            "Report name: Energy<br>Period: Daily, at 10:00",
        );

        assert!(service.send(message).await.is_ok());
    }

    #[tokio::test]
    async fn test_report_email_to_every_recipient() {
        let service = EmailService::new(test_config());
        let result = service
            .send_report_email("a@example.com, b@example.com", "s", "u", "d")
            .await;
        assert_eq!(result, NotificationResult::Sent);
    }

    #[tokio::test]
    async fn test_report_email_disabled_is_skipped() {
        let mut config = test_config();
        config.enabled = false;
        let service = EmailService::new(config);

        let result = service.send_report_email("a@example.com", "s", "u", "d").await;
        assert_eq!(result, NotificationResult::Skipped);
    }

    #[tokio::test]
    async fn test_unknown_provider_fails() {
        let mut config = test_config();
        config.provider = "carrier-pigeon".to_string();
        let service = EmailService::new(config);

        let result = service.send_report_email("a@example.com", "s", "u", "d").await;
        assert!(result.is_failure());
    }

    #[tokio::test]
    async fn test_smtp_without_host_not_configured() {
        let mut config = test_config();
        config.provider = "smtp".to_string();
        let service = EmailService::new(config);

        let message = EmailMessage::report_ready("a@example.com", "s", "u", "d");
        assert!(matches!(
            service.send(message).await,
            Err(EmailError::NotConfigured)
        ));
    }

    #[test]
    fn test_report_ready_message() {
        let message = EmailMessage::report_ready(
            "user@example.com",
            "Your one time Energy is ready",
            "http://localhost/reports/x.gz",
            "Report name: Energy<br>Period: One time",
        );

        assert_eq!(message.to, "user@example.com");
        assert!(message.body_text.contains("http://localhost/reports/x.gz"));
        assert!(message.body_text.contains("Period: One time"));
        assert!(message
            .body_html
            .contains("Report name: Energy<br>Period: One time"));
    }

    #[test]
    fn test_report_ready_escapes_report_name() {
        let message = EmailMessage::report_ready(
            "user@example.com",
            "Your daily <script>alert(1)</script> is ready",
            "http://localhost/reports/x.gz",
            "Report name: <b>\"A&B\"</b><br>Period: Daily",
        );

        assert!(!message.body_html.contains("<script>"));
        assert!(message
            .body_html
            .contains("<title>Your daily &lt;script&gt;alert(1)&lt;/script&gt; is ready</title>"));
        assert!(message
            .body_html
            .contains("Report name: &lt;b&gt;&quot;A&amp;B&quot;&lt;/b&gt;<br>Period: Daily"));
        assert_eq!(message.subject, "Your daily <script>alert(1)</script> is ready");
        assert!(message.body_text.contains("Report name: <b>\"A&B\"</b>\nPeriod: Daily"));
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("plain text"), "plain text");
        assert_eq!(escape_html("a<b>&'c'"), "a&lt;b&gt;&amp;&#x27;c&#x27;");
    }
}
