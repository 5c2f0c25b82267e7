//! Zero Common - Shared configuration, errors, and logging for Zero services.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup
//! - Small string helpers used when reporting failures

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    Config, ExecutionConfig, ExternalSecretsConfig, NetworkConfig, ObservabilityConfig,
    ScreenerConfig, SecretsConfig, MAX_CACHE_TTL_SECS, MAX_LOOKBACK_DAYS,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};
