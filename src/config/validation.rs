//! Configuration validation
//!
//! Runs on the deserialized [`DrillConfig`] and collects every issue instead
//! of stopping at the first one.

use std::time::Duration;

use reqwest::Url;

use crate::config::schema::DrillConfig;
use crate::error::{Severity, ValidationIssue};

/// Durations above this are accepted with a warning.
const LONG_DURATION: Duration = Duration::from_secs(2 * 60 * 60);

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent loading).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Configuration validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates a configuration and returns every issue found.
    pub fn validate(&mut self, config: &DrillConfig) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_base("api_base", &config.api_base, &["https", "http"]);
        self.validate_base("ws_base", &config.ws_base, &["wss", "ws"]);

        let timing = &config.timing;
        for (path, value) in [
            ("timing.exercise_duration", timing.exercise_duration),
            ("timing.display_delay", timing.display_delay),
            ("timing.reconnect_backoff", timing.reconnect_backoff),
            ("timing.ransomware_lockout", timing.ransomware_lockout),
            ("timing.code_ttl", timing.code_ttl),
            ("timing.request_timeout", timing.request_timeout),
        ] {
            self.validate_duration(path, value);
        }

        if timing.exercise_duration.as_secs() > u64::from(u32::MAX) {
            self.add_error(
                "timing.exercise_duration",
                "Exercise duration does not fit the countdown",
            );
        }

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    /// `schemes[0]` is the secure scheme; the rest are accepted with a warning.
    fn validate_base(&mut self, path: &str, value: &str, schemes: &[&str]) {
        let url = match Url::parse(value) {
            Ok(url) => url,
            Err(e) => {
                self.add_error(path, &format!("'{value}' is not a valid URL: {e}"));
                return;
            }
        };

        match schemes.iter().position(|s| *s == url.scheme()) {
            Some(0) => {}
            Some(_) => self.add_warning(
                path,
                &format!("'{}' traffic is not encrypted", url.scheme()),
            ),
            None => self.add_error(
                path,
                &format!(
                    "Unsupported scheme '{}', expected one of {}",
                    url.scheme(),
                    schemes.join(", ")
                ),
            ),
        }

        if url.host_str().is_none() {
            self.add_error(path, "URL has no host");
        }
    }

    fn validate_duration(&mut self, path: &str, value: Duration) {
        if value.is_zero() {
            self.add_error(path, "Duration must be greater than zero");
        } else if value > LONG_DURATION {
            self.add_warning(path, "Duration is unusually long (> 2h)");
        }
    }

    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Error,
        });
    }

    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue {
            path: path.to_string(),
            message: message.to_string(),
            severity: Severity::Warning,
        });
    }
}
