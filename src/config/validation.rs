//! Configuration validation
//!
//! Validates configuration and reports issues.

use std::time::Duration;

use super::types::sandbox::parse_memory_limit;
use super::types::Config;
use crate::language::Language;

/// Result of configuration validation
#[derive(Debug, Clone)]
pub struct ConfigValidationResult {
    /// Whether the config is valid
    pub valid: bool,
    /// Validation errors (critical)
    pub errors: Vec<ValidationIssue>,
    /// Validation warnings (non-critical)
    pub warnings: Vec<ValidationIssue>,
}

impl ConfigValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        ConfigValidationResult {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Add an error
    pub fn with_error(mut self, issue: ValidationIssue) -> Self {
        self.valid = false;
        self.errors.push(issue);
        self
    }

    /// Add a warning
    pub fn with_warning(mut self, issue: ValidationIssue) -> Self {
        self.warnings.push(issue);
        self
    }
}

/// A validation issue
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Path to the config field
    pub path: String,
    /// Issue message
    pub message: String,
    /// Suggested fix
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " ({})", suggestion)?;
        }
        Ok(())
    }
}

/// Validate the configuration
pub fn validate_config(config: &Config) -> ConfigValidationResult {
    let mut result = ConfigValidationResult::valid();

    result = validate_sandbox_config(config, result);
    result = validate_execution_config(config, result);
    result = validate_admin_config(config, result);

    result
}

fn validate_sandbox_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let sandbox = &config.sandbox;

    for language in Language::ALL {
        if sandbox.image_for(language).is_empty() {
            result = result.with_error(
                ValidationIssue::new(
                    format!("sandbox.images.{}", language),
                    "No image configured and fallback image is empty",
                )
                .with_suggestion("Set sandbox.fallback_image or a per-language image"),
            );
        }
    }

    if let Some(limit) = &sandbox.memory_limit {
        if parse_memory_limit(limit).is_none() {
            result = result.with_error(
                ValidationIssue::new(
                    "sandbox.memory_limit",
                    format!("Cannot parse memory limit: {}", limit),
                )
                .with_suggestion("Use a value like \"512m\" or \"1g\""),
            );
        }
    }

    if let Some(cpus) = sandbox.cpu_limit {
        if cpus <= 0.0 {
            result = result.with_error(ValidationIssue::new(
                "sandbox.cpu_limit",
                "CPU limit must be positive",
            ));
        }
    }

    if sandbox.user.is_empty() || sandbox.user == "root" {
        result = result.with_warning(
            ValidationIssue::new("sandbox.user", "Untrusted code would run as root")
                .with_suggestion("Use the image's unprivileged user (coderunner)"),
        );
    }

    result
}

fn validate_execution_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    let exec = &config.execution;

    if exec.min_timeout > exec.max_timeout {
        result = result.with_error(ValidationIssue::new(
            "execution.min_timeout",
            "min_timeout is larger than max_timeout",
        ));
    }

    if config.maintenance.sweep_interval.is_zero() {
        result = result.with_error(
            ValidationIssue::new("maintenance.sweep_interval", "Sweep interval must be positive")
                .with_suggestion("Use a value such as \"10m\""),
        );
    } else if config.maintenance.sweep_interval < Duration::from_secs(60) {
        result = result.with_warning(ValidationIssue::new(
            "maintenance.sweep_interval",
            "Sweep interval shorter than one minute",
        ));
    }

    result
}

fn validate_admin_config(config: &Config, mut result: ConfigValidationResult) -> ConfigValidationResult {
    if config.admin.api_key.is_none() {
        result = result.with_warning(
            ValidationIssue::new("admin.api_key", "Admin endpoints are disabled")
                .with_suggestion("Set CODEFORGE_ADMIN_API_KEY to enable them"),
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = Config::default();
        let result = validate_config(&config);

        // Default config should have warnings but no errors
        assert!(result.errors.is_empty());
        assert!(result.valid);
        assert!(result.warnings.iter().any(|w| w.path == "admin.api_key"));
    }

    #[test]
    fn test_invalid_limits() {
        let mut config = Config::default();
        config.sandbox.memory_limit = Some("plenty".to_string());
        config.sandbox.cpu_limit = Some(0.0);
        config.execution.min_timeout = Duration::from_secs(600);

        let result = validate_config(&config);
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 3);
    }
}
