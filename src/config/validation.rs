//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes > 0, intervals > 0, known methods)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ClientConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// Human-readable explanation.
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

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

const KNOWN_METHODS: &[&str] = &[
    "GET", "HEAD", "OPTIONS", "PUT", "DELETE", "POST", "PATCH", "TRACE", "CONNECT",
];

/// Validate a parsed configuration.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.cache.max_size == 0 {
        errors.push(ValidationError::new("cache.max_size", "must be greater than 0"));
    }
    if config.cache.check_interval_ms == 0 {
        errors.push(ValidationError::new(
            "cache.check_interval_ms",
            "must be greater than 0",
        ));
    }
    if config.cache.default_stale_ms > config.cache.default_ttl_ms {
        errors.push(ValidationError::new(
            "cache.default_stale_ms",
            format!(
                "stale time {}ms exceeds ttl {}ms",
                config.cache.default_stale_ms, config.cache.default_ttl_ms
            ),
        ));
    }

    if config.circuit_breaker.threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.threshold",
            "must be at least 1",
        ));
    }
    if config.circuit_breaker.reset_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.reset_timeout_ms",
            "must be greater than 0",
        ));
    }

    if config.retries.max_attempts > 0 && config.retries.base_delay_ms == 0 {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must be greater than 0 when retries are enabled",
        ));
    }
    if config.retries.max_delay_ms < config.retries.base_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must not be smaller than base_delay_ms",
        ));
    }

    for method in &config.dedupe.methods {
        if !KNOWN_METHODS.contains(&method.to_ascii_uppercase().as_str()) {
            errors.push(ValidationError::new(
                "dedupe.methods",
                format!("unknown HTTP method '{}'", method),
            ));
        }
    }

    if config.transport.timeout_ms == 0 {
        errors.push(ValidationError::new(
            "transport.timeout_ms",
            "must be greater than 0",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
