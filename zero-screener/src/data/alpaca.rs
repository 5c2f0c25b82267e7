//! Alpaca market data adapter.
//!
//! # API Documentation
//! <https://docs.alpaca.markets/reference/stockbars>
//!
//! Multi-symbol daily bars in one request, paginated with
//! `next_page_token`. Bars keep Alpaca's single-letter keys
//! (`t`, `o`, `h`, `l`, `c`, `v`).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::batch::BatchPolicy;
use super::provider::{http_client, window_start, MarketDataProvider, ProviderError};
use super::{RawBar, RawDataSet, RawSymbolRecord};

// ============================================================================
// Constants
// ============================================================================

/// Alpaca data API base URL
const ALPACA_API_BASE: &str = "https://data.alpaca.markets";

/// Multi-symbol bars endpoint
const BARS_ENDPOINT: &str = "/v2/stocks/bars";

/// Upper bound on pages followed per batch
const MAX_PAGES: usize = 20;

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    bars: Option<HashMap<String, Vec<RawBar>>>,
    next_page_token: Option<String>,
}

// ============================================================================
// Alpaca Adapter
// ============================================================================

/// Alpaca adapter. Ready only with both a key id and a secret.
pub struct AlpacaAdapter {
    credentials: Option<(String, String)>,
    client: reqwest::Client,
    base_url: String,
    batch: BatchPolicy,
}

impl AlpacaAdapter {
    pub fn new(credentials: Option<(String, String)>, timeout: Duration, batch: BatchPolicy) -> Self {
        Self::with_base_url(credentials, ALPACA_API_BASE, timeout, batch)
    }

    /// Point the adapter at a different host (used by tests).
    pub fn with_base_url(
        credentials: Option<(String, String)>,
        base_url: impl Into<String>,
        timeout: Duration,
        batch: BatchPolicy,
    ) -> Self {
        Self {
            credentials,
            client: http_client(timeout),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            batch,
        }
    }

    /// Create from config
    pub fn from_config(config: &zero_common::Config) -> Self {
        let screener = &config.screener;
        Self::new(
            config.alpaca_credentials(),
            Duration::from_secs(screener.request_timeout_secs),
            BatchPolicy::new(screener.batch_size, screener.batch_delay_ms),
        )
    }

    /// Fetch one batch, following pagination.
    async fn fetch_bars(
        &self,
        symbols: &[String],
        lookback_days: u32,
    ) -> Result<RawDataSet, ProviderError> {
        let (key_id, secret) = self
            .credentials
            .as_ref()
            .ok_or_else(|| ProviderError::NotReady("Alpaca credentials not configured".into()))?;

        let start = window_start(lookback_days)?.format("%Y-%m-%d").to_string();
        let joined = symbols.join(",");
        let mut page_token: Option<String> = None;
        let mut bars_by_symbol: HashMap<String, Vec<RawBar>> = HashMap::new();

        for page in 0..MAX_PAGES {
            let mut query: Vec<(&str, &str)> = vec![
                ("symbols", joined.as_str()),
                ("timeframe", "1Day"),
                ("start", start.as_str()),
                ("limit", "10000"),
                ("adjustment", "raw"),
                ("feed", "iex"),
            ];
            if let Some(token) = page_token.as_deref() {
                query.push(("page_token", token));
            }

            debug!(symbols = %joined, page, "Fetching bars from Alpaca");

            let response = self
                .client
                .get(format!("{}{}", self.base_url, BARS_ENDPOINT))
                .query(&query)
                .header("accept", "application/json")
                .header("APCA-API-KEY-ID", key_id)
                .header("APCA-API-SECRET-KEY", secret)
                .send()
                .await
                .map_err(|e| ProviderError::from_request(&e))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::from_status(status, &body));
            }

            let parsed: BarsResponse = response.json().await.map_err(|e| {
                ProviderError::InvalidResponse(format!("Failed to parse bars: {}", e))
            })?;

            for (symbol, bars) in parsed.bars.unwrap_or_default() {
                bars_by_symbol
                    .entry(symbol.to_uppercase())
                    .or_default()
                    .extend(bars);
            }

            match parsed.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }

            if page + 1 == MAX_PAGES {
                warn!(symbols = %joined, "Alpaca pagination cap reached, result may be partial");
            }
        }

        Ok(bars_by_symbol
            .into_iter()
            .map(|(symbol, bars)| (symbol, to_record(bars)))
            .collect())
    }
}

fn to_record(bars: Vec<RawBar>) -> RawSymbolRecord {
    if bars.is_empty() {
        return RawSymbolRecord::placeholder("alpaca");
    }

    let mut record = RawSymbolRecord::new("alpaca");
    if let Some(last) = bars.last() {
        record.price = last.get("c").and_then(Value::as_f64);
        record.volume = last.get("v").and_then(Value::as_f64);
    }
    record.historical = bars;
    record
}

// ============================================================================
// MarketDataProvider Implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for AlpacaAdapter {
    fn name(&self) -> &'static str {
        "alpaca"
    }

    fn is_ready(&self) -> bool {
        self.credentials.is_some()
    }

    fn supports(&self, symbol: &str) -> bool {
        // US equities only; no index (^) or FX (=X) tickers
        !symbol.starts_with('^') && !symbol.contains('=')
    }

    async fn fetch(&self, symbols: &[String], lookback_days: u32) -> Result<RawDataSet, ProviderError> {
        self.batch
            .run(self.name(), symbols, |batch| async move {
                self.fetch_bars(&batch, lookback_days).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_not_ready_without_credentials() {
        let adapter = AlpacaAdapter::new(None, Duration::from_secs(1), BatchPolicy::default());
        assert!(!adapter.is_ready());

        let adapter = AlpacaAdapter::new(
            Some(("id".into(), "secret".into())),
            Duration::from_secs(1),
            BatchPolicy::default(),
        );
        assert!(adapter.is_ready());
    }

    #[test]
    fn test_supports_excludes_indices() {
        let adapter = AlpacaAdapter::new(None, Duration::from_secs(1), BatchPolicy::default());
        assert!(adapter.supports("AAPL"));
        assert!(!adapter.supports("^GSPC"));
        assert!(!adapter.supports("EURUSD=X"));
    }

    #[test]
    fn test_to_record_takes_last_close() {
        let bars: Vec<RawBar> = vec![
            json!({"t": "2024-01-02T05:00:00Z", "o": 1.0, "h": 2.0, "l": 0.5, "c": 1.5, "v": 100}),
            json!({"t": "2024-01-03T05:00:00Z", "o": 1.5, "h": 2.5, "l": 1.0, "c": 2.0, "v": 200}),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();

        let record = to_record(bars);
        assert_eq!(record.price, Some(2.0));
        assert_eq!(record.volume, Some(200.0));
        assert_eq!(record.historical.len(), 2);
        assert!(!record.placeholder);
    }

    #[tokio::test]
    async fn test_fetch_without_credentials_is_not_ready() {
        let adapter = AlpacaAdapter::new(None, Duration::from_secs(1), BatchPolicy::new(5, 0));
        let err = adapter.fetch(&["AAPL".to_string()], 30).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotReady(_)));
    }
}
