//! Tiingo end-of-day adapter.
//!
//! One request per symbol against `/tiingo/daily/{ticker}/prices`. Rows
//! use lower-case OHLCV keys plus `adjClose`, with RFC 3339 dates.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use super::batch::BatchPolicy;
use super::provider::{http_client, window_start, MarketDataProvider, ProviderError};
use super::{RawBar, RawDataSet, RawSymbolRecord};

/// Tiingo API base URL
const TIINGO_API_BASE: &str = "https://api.tiingo.com";

/// Tiingo adapter. Ready only with an API token.
pub struct TiingoAdapter {
    token: Option<String>,
    client: reqwest::Client,
    base_url: String,
    batch: BatchPolicy,
}

impl TiingoAdapter {
    pub fn new(token: Option<String>, timeout: Duration, batch: BatchPolicy) -> Self {
        Self::with_base_url(token, TIINGO_API_BASE, timeout, batch)
    }

    /// Point the adapter at a different host (used by tests).
    pub fn with_base_url(
        token: Option<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        batch: BatchPolicy,
    ) -> Self {
        Self {
            token,
            client: http_client(timeout),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            batch,
        }
    }

    /// Create from config
    pub fn from_config(config: &zero_common::Config) -> Self {
        let screener = &config.screener;
        Self::new(
            config.tiingo_token(),
            Duration::from_secs(screener.request_timeout_secs),
            BatchPolicy::new(screener.batch_size, screener.batch_delay_ms),
        )
    }

    async fn fetch_symbol(
        &self,
        symbol: &str,
        lookback_days: u32,
    ) -> Result<Option<RawSymbolRecord>, ProviderError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ProviderError::NotReady("Tiingo token not configured".into()))?;

        // Tiingo spells share classes with a dash (BRK-B)
        let ticker = symbol.replace('.', "-").to_lowercase();
        let url = format!("{}/tiingo/daily/{}/prices", self.base_url, ticker);
        let start = window_start(lookback_days)?.format("%Y-%m-%d").to_string();

        debug!(url = %url, symbol, "Fetching prices from Tiingo");

        let response = self
            .client
            .get(&url)
            .query(&[("startDate", start.as_str()), ("token", token)])
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::from_request(&e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &body));
        }

        let body: Value = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("Failed to parse prices: {}", e))
        })?;

        parse_prices(body)
    }
}

fn parse_prices(body: Value) -> Result<Option<RawSymbolRecord>, ProviderError> {
    let rows = match body {
        Value::Array(rows) => rows,
        // Unknown tickers come back as {"detail": "..."}
        Value::Object(obj) if obj.contains_key("detail") => return Ok(None),
        other => {
            return Err(ProviderError::InvalidResponse(format!(
                "expected array of prices, got {}",
                zero_common::util::truncate_with_ellipsis(&other.to_string(), 120)
            )))
        }
    };

    let historical: Vec<RawBar> = rows
        .into_iter()
        .filter_map(|row| match row {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .collect();

    if historical.is_empty() {
        return Ok(Some(RawSymbolRecord::placeholder("tiingo")));
    }

    let mut record = RawSymbolRecord::new("tiingo");
    if let Some(last) = historical.last() {
        record.price = last.get("close").and_then(Value::as_f64);
        record.volume = last.get("volume").and_then(Value::as_f64);
    }
    record.historical = historical;
    Ok(Some(record))
}

#[async_trait]
impl MarketDataProvider for TiingoAdapter {
    fn name(&self) -> &'static str {
        "tiingo"
    }

    fn is_ready(&self) -> bool {
        self.token.is_some()
    }

    fn supports(&self, symbol: &str) -> bool {
        !symbol.starts_with('^') && !symbol.contains('=')
    }

    async fn fetch(&self, symbols: &[String], lookback_days: u32) -> Result<RawDataSet, ProviderError> {
        self.batch
            .run(self.name(), symbols, |batch| async move {
                let mut out = RawDataSet::new();
                let mut last_error = None;

                for symbol in batch {
                    match self.fetch_symbol(&symbol, lookback_days).await {
                        Ok(Some(record)) => {
                            out.insert(symbol, record);
                        }
                        Ok(None) => debug!(symbol = %symbol, "Tiingo does not know symbol"),
                        Err(e @ (ProviderError::Auth(_) | ProviderError::NotReady(_))) => {
                            return Err(e)
                        }
                        Err(e) => last_error = Some(e),
                    }
                }

                match last_error {
                    Some(e) if out.is_empty() => Err(e),
                    _ => Ok(out),
                }
            })
            .await
    }
}
