//! Yahoo Finance adapter.
//!
//! Daily bars from the public v8 chart endpoint. No credentials, one
//! request per symbol. Bars are emitted in Yahoo's capitalized spelling
//! (`Date`, `Open`, `Adj Close`) and left for the normalizer to rewrite.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::batch::BatchPolicy;
use super::provider::{http_client, window_start, MarketDataProvider, ProviderError};
use super::{RawBar, RawDataSet, RawSymbolRecord};

// ============================================================================
// Constants
// ============================================================================

/// Yahoo chart API base URL
const YAHOO_API_BASE: &str = "https://query2.finance.yahoo.com";

/// Chart endpoint prefix
const CHART_ENDPOINT: &str = "/v8/finance/chart";

// ============================================================================
// API Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    regular_market_price: Option<f64>,
    regular_market_volume: Option<f64>,
    long_name: Option<String>,
    short_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<QuoteData>,
    adjclose: Option<Vec<AdjCloseData>>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjCloseData {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

// ============================================================================
// Yahoo Adapter
// ============================================================================

/// Yahoo Finance adapter. Always ready.
pub struct YahooAdapter {
    client: reqwest::Client,
    base_url: String,
    batch: BatchPolicy,
}

impl YahooAdapter {
    pub fn new(timeout: Duration, batch: BatchPolicy) -> Self {
        Self::with_base_url(YAHOO_API_BASE, timeout, batch)
    }

    /// Point the adapter at a different host (used by tests).
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration, batch: BatchPolicy) -> Self {
        Self {
            client: http_client(timeout),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            batch,
        }
    }

    /// Create from config
    pub fn from_config(config: &zero_common::Config) -> Self {
        let screener = &config.screener;
        Self::new(
            Duration::from_secs(screener.request_timeout_secs),
            BatchPolicy::new(screener.batch_size, screener.batch_delay_ms),
        )
    }

    fn chart_url(&self, symbol: &str, lookback_days: u32) -> Result<String, ProviderError> {
        let start = window_start(lookback_days)?
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();
        let end = Utc::now().timestamp();
        Ok(format!(
            "{}{}/{}?period1={}&period2={}&interval=1d&includeAdjustedClose=true",
            self.base_url, CHART_ENDPOINT, symbol, start, end
        ))
    }

    /// Fetch one symbol. `Ok(None)` means Yahoo does not know it.
    async fn fetch_symbol(
        &self,
        symbol: &str,
        lookback_days: u32,
    ) -> Result<Option<RawSymbolRecord>, ProviderError> {
        let url = self.chart_url(symbol, lookback_days)?;
        debug!(url = %url, symbol, "Fetching chart from Yahoo");

        let response = self
            .client
            .get(&url)
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

        let chart: ChartResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse chart: {}", e)))?;

        parse_chart(symbol, chart)
    }
}

/// Turn a chart document into a raw record.
fn parse_chart(symbol: &str, resp: ChartResponse) -> Result<Option<RawSymbolRecord>, ProviderError> {
    let Some(data) = resp.chart.result.and_then(|r| r.into_iter().next()) else {
        return match resp.chart.error {
            Some(err) if err.code == "Not Found" => Ok(None),
            Some(err) => Err(ProviderError::InvalidResponse(format!(
                "{}: {}",
                err.code,
                err.description.unwrap_or_default()
            ))),
            None => Err(ProviderError::InvalidResponse(format!(
                "empty chart result for {}",
                symbol
            ))),
        };
    };

    let timestamps = data.timestamp.unwrap_or_default();
    let (quote, adj_closes) = match data.indicators {
        Some(ind) => (
            ind.quote.into_iter().next().unwrap_or_default(),
            ind.adjclose
                .and_then(|v| v.into_iter().next())
                .map(|a| a.adjclose)
                .unwrap_or_default(),
        ),
        None => (QuoteData::default(), Vec::new()),
    };

    let at = |v: &[Option<f64>], i: usize| v.get(i).copied().flatten();
    let mut historical: Vec<RawBar> = Vec::with_capacity(timestamps.len());

    for (i, &ts) in timestamps.iter().enumerate() {
        let Some(date) = DateTime::from_timestamp(ts, 0).map(|dt| dt.date_naive()) else {
            continue;
        };

        let fields = [
            ("Open", at(&quote.open, i)),
            ("High", at(&quote.high, i)),
            ("Low", at(&quote.low, i)),
            ("Close", at(&quote.close, i)),
            ("Volume", at(&quote.volume, i)),
            ("Adj Close", at(&adj_closes, i)),
        ];

        // Holidays come back as all-null rows
        if fields.iter().all(|(_, v)| v.is_none()) {
            continue;
        }

        let mut bar = RawBar::new();
        bar.insert("Date".into(), json!(date.format("%Y-%m-%d").to_string()));
        for (key, value) in fields {
            if let Some(v) = value {
                bar.insert(key.into(), json!(v));
            }
        }
        historical.push(bar);
    }

    let mut record = if historical.is_empty() {
        RawSymbolRecord::placeholder("yahoo")
    } else {
        RawSymbolRecord::new("yahoo")
    };

    let last_close = historical
        .last()
        .and_then(|b| b.get("Close"))
        .and_then(Value::as_f64);

    record.price = data.meta.regular_market_price.or(last_close);
    record.volume = data.meta.regular_market_volume;
    record.name = data.meta.long_name.or(data.meta.short_name);
    record.historical = historical;

    Ok(Some(record))
}

// ============================================================================
// MarketDataProvider Implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for YahooAdapter {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn supports(&self, symbol: &str) -> bool {
        !symbol.is_empty() && symbol.len() <= 12
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
                        Ok(None) => debug!(symbol = %symbol, "Yahoo does not know symbol"),
                        Err(e @ ProviderError::RateLimited { .. }) => return Err(e),
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
