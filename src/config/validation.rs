//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (pool limits > 0)
//! - Validate log level names
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Disabled timeouts are valid; they simply switch the phase off

use crate::config::schema::ClientConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown log level {0:?}")]
    UnknownLogLevel(String),

    #[error("pool.max_idle_per_host must be greater than 0 when the pool is enabled")]
    EmptyPool,

    #[error("pool.idle_timeout_secs must be greater than 0 when the pool is enabled")]
    ZeroIdleTimeout,
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    if config.pool.enabled {
        if config.pool.max_idle_per_host == 0 {
            errors.push(ValidationError::EmptyPool);
        }
        if config.pool.idle_timeout_secs == 0 {
            errors.push(ValidationError::ZeroIdleTimeout);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
