//! Common validation utilities.

use validator::{ValidateEmail, ValidationError};

/// Maximum length of a report name.
pub const MAX_REPORT_NAME_LENGTH: usize = 255;

/// Maximum number of recipients a single report may address.
const MAX_RECIPIENTS: usize = 20;

/// Validates a comma-separated list of recipient email addresses.
///
/// Whitespace around each address is ignored. At least one address is required.
pub fn validate_recipients(recipients: &str) -> Result<(), ValidationError> {
    let addresses: Vec<&str> = split_recipients(recipients).collect();

    if addresses.is_empty() {
        let mut err = ValidationError::new("recipients_empty");
        err.message = Some("At least one recipient is required".into());
        return Err(err);
    }

    if addresses.len() > MAX_RECIPIENTS {
        let mut err = ValidationError::new("recipients_too_many");
        err.message = Some(format!("At most {} recipients are allowed", MAX_RECIPIENTS).into());
        return Err(err);
    }

    if let Some(bad) = addresses.iter().find(|a| !a.validate_email()) {
        let mut err = ValidationError::new("recipients_invalid");
        err.message = Some(format!("Invalid recipient email: {}", bad).into());
        return Err(err);
    }

    Ok(())
}

/// Splits a recipients string into trimmed, non-empty addresses.
pub fn split_recipients(recipients: &str) -> impl Iterator<Item = &str> {
    recipients
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
}

/// Validates that a report name is present and not overly long.
pub fn validate_report_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("name_empty");
        err.message = Some("Report name cannot be empty".into());
        return Err(err);
    }
    if trimmed.chars().count() > MAX_REPORT_NAME_LENGTH {
        let mut err = ValidationError::new("name_length");
        err.message = Some(
            format!(
                "Report name cannot exceed {} characters",
                MAX_REPORT_NAME_LENGTH
            )
            .into(),
        );
        return Err(err);
    }
    Ok(())
}
