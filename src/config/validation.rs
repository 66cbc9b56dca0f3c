//! Configuration validation
//!
//! Validates deskport settings before a run:
//! - Page size within what the platforms accept
//! - A non-zero retry budget
//! - Retry-After bounds that make sense together

use super::deskport_config::DeskportConfig;
use crate::DeskportError;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a deskport configuration, collecting every problem
pub fn validate_config(config: &DeskportConfig) -> ValidationResult {
    let mut errors = Vec::new();

    if config.export.page_size == 0 || config.export.page_size > 1000 {
        errors.push(ValidationError::new(
            "export.page_size",
            format!("must be between 1 and 1000, got {}", config.export.page_size),
        ));
    }

    if config.export.max_pages == 0 {
        errors.push(ValidationError::new("export.max_pages", "must be at least 1"));
    }

    if config.http.max_attempts == 0 {
        errors.push(ValidationError::new("http.max_attempts", "must be at least 1"));
    }

    if config.http.timeout_secs == 0 {
        errors.push(ValidationError::new("http.timeout_secs", "must be at least 1"));
    }

    if config.http.default_retry_after_secs > config.http.max_retry_after_secs {
        errors.push(ValidationError::new(
            "http.default_retry_after_secs",
            format!(
                "exceeds http.max_retry_after_secs ({} > {})",
                config.http.default_retry_after_secs, config.http.max_retry_after_secs
            ),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate and fold every problem into a single configuration error
pub fn validate_config_result(config: &DeskportConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let joined = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        DeskportError::Config(joined)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&DeskportConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = DeskportConfig::default();
        config.export.page_size = 0;
        config.http.max_attempts = 0;
        config.http.default_retry_after_secs = 900;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.field == "export.page_size"));
    }

    #[test]
    fn test_result_is_config_error() {
        let mut config = DeskportConfig::default();
        config.export.page_size = 5000;
        let err = validate_config_result(&config).unwrap_err();
        assert!(matches!(err, DeskportError::Config(_)));
        assert!(err.to_string().contains("export.page_size"));
    }
}
