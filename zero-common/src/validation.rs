//! Configuration validation for Zero services.
//!
//! Checks that required values are present and within valid ranges before
//! the service starts.

use std::collections::HashSet;
use thiserror::Error;

use crate::config::{
    Config, ExecutionConfig, ObservabilityConfig, ScreenerConfig, MAX_CACHE_TTL_SECS,
    MAX_LOOKBACK_DAYS,
};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.network.bind.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "network.bind".into(),
            });
        }

        if let Err(e) = self.screener.validate() {
            errors.push(e);
        }

        if let Err(e) = self.screener.execution.validate() {
            errors.push(e);
        }

        if let Err(e) = self.observability.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }

    /// Load, apply environment overrides, and validate configuration.
    pub fn load_and_validate() -> anyhow::Result<Self> {
        let config = Self::load_with_env()?;
        config.validate().map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(config)
    }
}

impl Validate for ScreenerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "screener.port".into(),
            });
        }

        if self.provider_order.is_empty() {
            return Err(ValidationError::MissingField {
                field: "screener.provider_order".into(),
            });
        }

        let mut seen = HashSet::new();
        for name in &self.provider_order {
            if !seen.insert(name.to_lowercase()) {
                return Err(ValidationError::InvalidValue {
                    field: "screener.provider_order".into(),
                    reason: format!("provider '{}' listed more than once", name),
                });
            }
        }

        if self.lookback_days == 0 || self.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(ValidationError::InvalidValue {
                field: "screener.lookback_days".into(),
                reason: format!("must be between 1 and {}", MAX_LOOKBACK_DAYS),
            });
        }

        if self.cache_ttl_secs > MAX_CACHE_TTL_SECS {
            return Err(ValidationError::InvalidValue {
                field: "screener.cache_ttl_secs".into(),
                reason: format!("must be at most {}", MAX_CACHE_TTL_SECS),
            });
        }

        if self.batch_size == 0 {
            return Err(ValidationError::InvalidValue {
                field: "screener.batch_size".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.default_universe.is_empty() {
            return Err(ValidationError::MissingField {
                field: "screener.default_universe".into(),
            });
        }

        Ok(())
    }
}

impl Validate for ExecutionConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.interpreter.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "screener.execution.interpreter".into(),
            });
        }

        if self.timeout_ms == 0 {
            return Err(ValidationError::InvalidValue {
                field: "screener.execution.timeout_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.max_concurrent_runs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "screener.execution.max_concurrent_runs".into(),
                reason: "must be greater than 0".into(),
            });
        }

        if self.max_output_bytes < 1024 {
            return Err(ValidationError::InvalidValue {
                field: "screener.execution.max_output_bytes".into(),
                reason: "must be at least 1024".into(),
            });
        }

        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("must be one of: {}", valid_levels.join(", ")),
            });
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.to_lowercase().as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.observability.log_level = "invalid".into();
        let result = config.validate();
        assert!(matches!(
            result,
            Err(ValidationError::InvalidValue { ref field, .. }) if field == "observability.log_level"
        ));
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let mut config = Config::default();
        config.screener.provider_order = vec!["yahoo".into(), "Yahoo".into()];
        let result = config.validate();
        assert!(matches!(result, Err(ValidationError::InvalidValue { .. })));
    }

    #[test]
    fn test_lookback_out_of_range_rejected() {
        let mut config = Config::default();
        config.screener.lookback_days = MAX_LOOKBACK_DAYS + 1;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidValue { ref field, .. }) if field == "screener.lookback_days"
        ));

        config.screener.lookback_days = MAX_LOOKBACK_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_huge_cache_ttl_rejected() {
        let mut config = Config::default();
        config.screener.cache_ttl_secs = u64::MAX / 1000;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidValue { ref field, .. }) if field == "screener.cache_ttl_secs"
        ));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = Config::default();
        config.screener.execution.timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_multiple_errors_collected() {
        let mut config = Config::default();
        config.screener.execution.timeout_ms = 0;
        config.observability.log_format = "xml".into();
        let result = config.validate();
        assert!(matches!(result, Err(ValidationError::Multiple(ref v)) if v.len() == 2));
    }
}
