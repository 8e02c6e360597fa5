//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, grace within the overall bound)
//! - Cross-field checks (remote telemetry needs an endpoint)
//! - Production sanity warnings that do not block startup
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::HeaderValue;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{AppConfig, TelemetryMode, RECOMMENDED_MIN_SHUTDOWN_TIMEOUT_SECS};

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.grace_secs == 0 {
        errors.push(ValidationError::new("listener.grace_secs", "must be greater than 0"));
    }

    let shutdown_timeout = config.shutdown_timeout();
    if shutdown_timeout.is_zero() {
        errors.push(ValidationError::new("shutdown.timeout_secs", "must be greater than 0"));
    } else if config.listener.grace_period() > shutdown_timeout {
        errors.push(ValidationError::new(
            "listener.grace_secs",
            format!(
                "grace period ({}s) exceeds the overall shutdown timeout ({}s)",
                config.listener.grace_secs,
                shutdown_timeout.as_secs()
            ),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if let Some(origin) = config.http.cors_origin() {
        if HeaderValue::from_str(origin).is_err() {
            errors.push(ValidationError::new(
                "http.cors_allow_origins",
                format!("'{}' is not a valid origin header value", origin),
            ));
        }
    }

    let prefix = &config.http.ingress_prefix;
    if !prefix.is_empty() && (!prefix.starts_with('/') || prefix.ends_with('/')) {
        errors.push(ValidationError::new(
            "http.ingress_prefix",
            "must start with '/' and must not end with '/'",
        ));
    }

    let telemetry = &config.telemetry;
    if telemetry.mode == TelemetryMode::Remote
        && telemetry.endpoint.as_deref().map_or(true, str::is_empty)
    {
        errors.push(ValidationError::new(
            "telemetry.endpoint",
            "required when telemetry mode is remote",
        ));
    }
    if telemetry.queue_capacity == 0 {
        errors.push(ValidationError::new("telemetry.queue_capacity", "must be greater than 0"));
    }
    if telemetry.batch_size == 0 {
        errors.push(ValidationError::new("telemetry.batch_size", "must be greater than 0"));
    }
    if telemetry.flush_interval_ms == 0 {
        errors.push(ValidationError::new("telemetry.flush_interval_ms", "must be greater than 0"));
    }

    if let Some(address) = &config.observability.metrics_address {
        if address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "observability.metrics_address",
                format!("'{}' is not a socket address", address),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Non-fatal observations about a production configuration.
pub fn production_warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    if config.development {
        return warnings;
    }

    let timeout = config.shutdown_timeout().as_secs();
    if timeout < RECOMMENDED_MIN_SHUTDOWN_TIMEOUT_SECS {
        warnings.push(format!(
            "Cleanup timeout is set to {} seconds which might be too small for production mode",
            timeout
        ));
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = AppConfig::default();
        config.listener.grace_secs = 0;
        config.telemetry.mode = TelemetryMode::Remote;
        config.telemetry.batch_size = 0;
        config.http.ingress_prefix = "api/".to_string();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.grace_secs",
                "http.ingress_prefix",
                "telemetry.endpoint",
                "telemetry.batch_size",
            ]
        );
    }

    #[test]
    fn grace_must_fit_inside_shutdown_timeout() {
        let mut config = AppConfig::default();
        config.shutdown.timeout_secs = Some(10);

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "listener.grace_secs");
    }

    #[test]
    fn short_production_timeout_warns() {
        let mut config = AppConfig::default();
        config.shutdown.timeout_secs = Some(60);
        assert_eq!(production_warnings(&config).len(), 1);

        config.development = true;
        assert!(production_warnings(&config).is_empty());
    }

    #[test]
    fn rejects_unparseable_metrics_address() {
        let mut config = AppConfig::default();
        config.observability.metrics_address = Some("localhost".to_string());
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "observability.metrics_address");

        config.observability.metrics_address = Some("127.0.0.1:9090".to_string());
        assert!(validate_config(&config).is_ok());
    }
}
