//! Market data provider abstraction.
//!
//! Defines the `MarketDataProvider` trait that every upstream source
//! implements so the coordinator can fall back across them.

use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::RawDataSet;

// ============================================================================
// Provider Error
// ============================================================================

/// Errors specific to data providers.
///
/// These never leave the data layer: the coordinator logs them and moves
/// on to the next provider.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// Network error (connection failed, timeout)
    Network(String),
    /// Authentication error (invalid or missing credentials)
    Auth(String),
    /// Rate limit exceeded
    RateLimited { retry_after_secs: Option<u64> },
    /// Provider has no usable configuration
    NotReady(String),
    /// Upstream answered with something we could not interpret
    InvalidResponse(String),
    /// Internal provider error
    Internal(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::Auth(msg) => write!(f, "Authentication error: {}", msg),
            Self::RateLimited { retry_after_secs } => {
                write!(f, "Rate limited")?;
                if let Some(secs) = retry_after_secs {
                    write!(f, ", retry after {} seconds", secs)?;
                }
                Ok(())
            }
            Self::NotReady(msg) => write!(f, "Provider not ready: {}", msg),
            Self::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    /// Map a reqwest transport error.
    pub fn from_request(e: &reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Network("Request timeout".into())
        } else if e.is_connect() {
            Self::Network("Connection failed".into())
        } else {
            Self::Network(zero_common::util::sanitize_for_log(&e.to_string()))
        }
    }

    /// Map a non-success HTTP status.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Self::Auth(format!("HTTP {}", status))
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => Self::RateLimited {
                retry_after_secs: None,
            },
            _ => Self::Internal(format!(
                "HTTP {}: {}",
                status,
                zero_common::util::truncate_with_ellipsis(body, 200)
            )),
        }
    }
}

/// Build the shared HTTP client for an adapter.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("zero-screener/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// First calendar day of a lookback window ending today (UTC).
pub(crate) fn window_start(lookback_days: u32) -> Result<NaiveDate, ProviderError> {
    Utc::now()
        .date_naive()
        .checked_sub_days(Days::new(u64::from(lookback_days)))
        .ok_or_else(|| {
            ProviderError::Internal(format!("lookback of {} days is out of range", lookback_days))
        })
}

// ============================================================================
// Provider Trait
// ============================================================================

/// Trait for upstream daily-bar sources.
///
/// Implementations are constructed once at startup from configuration and
/// hold no per-call state beyond their credentials and HTTP client.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name as used in the provider order (e.g., "yahoo")
    fn name(&self) -> &'static str;

    /// Whether the provider has the credentials it needs.
    fn is_ready(&self) -> bool;

    /// Whether the symbol is in this provider's universe.
    fn supports(&self, _symbol: &str) -> bool {
        true
    }

    /// Fetch history for a batch of symbols.
    ///
    /// Symbols the provider cannot serve are simply absent from the map.
    /// A symbol may come back as a placeholder record when the upstream
    /// acknowledged it but returned no bars.
    async fn fetch(&self, symbols: &[String], lookback_days: u32)
        -> Result<RawDataSet, ProviderError>;
}

// ============================================================================
// Provider Info
// ============================================================================

/// Readiness summary exposed over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderInfo {
    pub name: String,
    pub is_ready: bool,
}

impl ProviderInfo {
    pub fn from_provider<P: MarketDataProvider + ?Sized>(provider: &P) -> Self {
        Self {
            name: provider.name().to_string(),
            is_ready: provider.is_ready(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_display() {
        let err = ProviderError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert!(err.to_string().contains("30 seconds"));

        let err = ProviderError::Network("connection refused".into());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(
            ProviderError::from_status(reqwest::StatusCode::UNAUTHORIZED, ""),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            ProviderError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::RateLimited { .. }
        ));
        let err = ProviderError::from_status(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        assert!(err.to_string().contains("upstream down"));
    }

    #[test]
    fn test_window_start_out_of_range_is_an_error() {
        assert!(matches!(window_start(u32::MAX), Err(ProviderError::Internal(_))));

        let start = window_start(30).unwrap();
        assert_eq!((Utc::now().date_naive() - start).num_days(), 30);
    }

    #[test]
    fn test_provider_info_serializes_camel_case() {
        let info = ProviderInfo {
            name: "yahoo".into(),
            is_ready: true,
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["isReady"], true);
    }
}
