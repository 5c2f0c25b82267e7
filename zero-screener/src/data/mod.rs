//! Market data layer for screener runs.
//!
//! Fetches daily history for a symbol set from several upstream providers
//! with ordered fallback, memoizes results with a TTL, and rewrites each
//! provider's bar spelling into one canonical shape.
//!
//! # Data Sources
//! - **Alpaca**: multi-symbol bars endpoint, requires key id + secret
//! - **Tiingo**: per-symbol daily prices, requires token
//! - **Yahoo**: public v8 chart endpoint, no credentials

mod alpaca;
mod batch;
mod cache;
mod coordinator;
mod normalize;
mod provider;
mod registry;
mod tiingo;
mod yahoo;

pub use alpaca::AlpacaAdapter;
pub use batch::BatchPolicy;
pub use cache::{cache_key, CacheStats, CachedFetch, DataCache};
pub use coordinator::{FetchCoordinator, FetchOutcome};
pub use normalize::{normalize, normalize_bars};
pub use provider::{MarketDataProvider, ProviderError, ProviderInfo};
pub use registry::{ProviderOrder, ProviderRegistry};
pub use tiingo::TiingoAdapter;
pub use yahoo::YahooAdapter;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Core Data Types
// ============================================================================

/// One bar as the provider spelled it.
pub type RawBar = serde_json::Map<String, serde_json::Value>;

/// Raw per-symbol payload returned by a provider and stored in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSymbolRecord {
    /// Latest close, if known
    pub price: Option<f64>,
    /// Latest volume, if known
    pub volume: Option<f64>,
    /// Company name
    pub name: Option<String>,
    /// Market capitalization
    pub market_cap: Option<f64>,
    /// History in provider spelling
    #[serde(default)]
    pub historical: Vec<RawBar>,
    /// Provider that produced the record
    pub source: String,
    /// True only when no real data was available
    #[serde(default)]
    pub placeholder: bool,
}

impl RawSymbolRecord {
    /// Create an empty record tagged with its provider.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            price: None,
            volume: None,
            name: None,
            market_cap: None,
            historical: Vec::new(),
            source: source.into(),
            placeholder: false,
        }
    }

    /// Create a record standing in for a symbol with no real data.
    pub fn placeholder(source: impl Into<String>) -> Self {
        Self {
            placeholder: true,
            ..Self::new(source)
        }
    }
}

/// Canonical daily bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Trading date, `YYYY-MM-DD`
    pub date: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adj_close: Option<f64>,
}

/// Normalized per-symbol record handed to user code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    pub price: Option<f64>,
    pub volume: Option<f64>,
    pub name: Option<String>,
    pub market_cap: Option<f64>,
    /// Ascending by date, unique per date
    pub historical: Vec<Bar>,
    pub source: String,
    pub placeholder: bool,
}

/// Symbol-keyed raw data. Ordered so serialized payloads are deterministic.
pub type RawDataSet = BTreeMap<String, RawSymbolRecord>;

/// Symbol-keyed normalized data.
pub type DataSet = BTreeMap<String, SymbolRecord>;

/// Uppercase, trim, and de-duplicate symbols, keeping first-seen order.
pub fn canonical_symbols<S: AsRef<str>>(symbols: &[S]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    symbols
        .iter()
        .map(|s| s.as_ref().trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_symbols() {
        let symbols = canonical_symbols(&["aapl", " MSFT ", "AAPL", "", "brk.b"]);
        assert_eq!(symbols, vec!["AAPL", "MSFT", "BRK.B"]);
    }

    #[test]
    fn test_placeholder_record() {
        let record = RawSymbolRecord::placeholder("yahoo");
        assert!(record.placeholder);
        assert!(record.historical.is_empty());
        assert_eq!(record.source, "yahoo");
    }
}
