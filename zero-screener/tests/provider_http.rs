//! HTTP adapter tests against mocked upstreams.

use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zero_screener::data::{
    normalize_bars, AlpacaAdapter, BatchPolicy, MarketDataProvider, ProviderError, TiingoAdapter,
    YahooAdapter,
};

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn fast_batches() -> BatchPolicy {
    BatchPolicy::new(5, 0)
}

fn creds() -> Option<(String, String)> {
    Some(("key-id".to_string(), "secret".to_string()))
}

// ============================================================================
// Yahoo
// ============================================================================

#[tokio::test]
async fn test_yahoo_fetch_and_unknown_symbol() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/AAPL"))
        .and(query_param("interval", "1d"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "chart": {
                "result": [{
                    "meta": { "regularMarketPrice": 190.5, "shortName": "Apple" },
                    "timestamp": [1704292200, 1704205800],
                    "indicators": {
                        "quote": [{
                            "open": [184.2, 187.15],
                            "high": [185.9, 188.44],
                            "low": [183.4, 183.89],
                            "close": [184.25, 185.64],
                            "volume": [58414500.0, 82488700.0]
                        }]
                    }
                }],
                "error": null
            }
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v8/finance/chart/ZZZZ"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let adapter = YahooAdapter::with_base_url(server.uri(), Duration::from_secs(5), fast_batches());
    let data = adapter.fetch(&symbols(&["AAPL", "ZZZZ"]), 30).await.unwrap();

    assert!(!data.contains_key("ZZZZ"));
    let aapl = &data["AAPL"];
    assert_eq!(aapl.source, "yahoo");
    assert_eq!(aapl.name.as_deref(), Some("Apple"));
    assert_eq!(aapl.price, Some(190.5));

    // Upstream order is descending here; the normalizer sorts it
    let bars = normalize_bars(&aapl.historical);
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[0].date, "2024-01-02");
    assert_eq!(bars[1].date, "2024-01-03");
    assert_eq!(bars[0].close, 185.64);
}

#[tokio::test]
async fn test_yahoo_out_of_range_lookback_is_an_error() {
    let server = MockServer::start().await;

    let adapter = YahooAdapter::with_base_url(server.uri(), Duration::from_secs(5), fast_batches());
    let handle = tokio::spawn(async move { adapter.fetch(&symbols(&["AAPL"]), u32::MAX).await });
    let result = handle.await.expect("fetch task must not panic");

    assert!(matches!(result, Err(ProviderError::Internal(_))), "{result:?}");
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_yahoo_server_error_fails_batch() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;

    let adapter = YahooAdapter::with_base_url(server.uri(), Duration::from_secs(5), fast_batches());
    let err = adapter.fetch(&symbols(&["AAPL"]), 30).await.unwrap_err();
    assert!(matches!(err, ProviderError::Internal(_)));
}

// ============================================================================
// Alpaca
// ============================================================================

#[tokio::test]
async fn test_alpaca_follows_pagination() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/stocks/bars"))
        .and(query_param("page_token", "p2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bars": {
                "MSFT": [
                    { "t": "2024-01-02T05:00:00Z", "o": 373.86, "h": 375.9, "l": 366.77, "c": 370.87, "v": 25258600 }
                ]
            },
            "next_page_token": null
        })))
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/stocks/bars"))
        .and(header("APCA-API-KEY-ID", "key-id"))
        .and(header("APCA-API-SECRET-KEY", "secret"))
        .and(query_param("timeframe", "1Day"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bars": {
                "AAPL": [
                    { "t": "2024-01-02T05:00:00Z", "o": 187.15, "h": 188.44, "l": 183.89, "c": 185.64, "v": 82488700 },
                    { "t": "2024-01-03T05:00:00Z", "o": 184.22, "h": 185.88, "l": 183.43, "c": 184.25, "v": 58414500 }
                ]
            },
            "next_page_token": "p2"
        })))
        .mount(&server)
        .await;

    let adapter =
        AlpacaAdapter::with_base_url(creds(), server.uri(), Duration::from_secs(5), fast_batches());
    assert!(adapter.is_ready());

    let data = adapter.fetch(&symbols(&["AAPL", "MSFT"]), 30).await.unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data["AAPL"].historical.len(), 2);
    assert_eq!(data["AAPL"].price, Some(184.25));
    assert_eq!(data["MSFT"].source, "alpaca");

    let bars = normalize_bars(&data["MSFT"].historical);
    assert_eq!(bars[0].date, "2024-01-02");
    assert_eq!(bars[0].volume, 25258600.0);
}

#[tokio::test]
async fn test_alpaca_rejected_credentials_are_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/stocks/bars"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "message": "forbidden" })))
        .mount(&server)
        .await;

    let adapter =
        AlpacaAdapter::with_base_url(creds(), server.uri(), Duration::from_secs(5), fast_batches());
    let err = adapter.fetch(&symbols(&["AAPL"]), 30).await.unwrap_err();
    assert!(matches!(err, ProviderError::Auth(_)));
}

// ============================================================================
// Tiingo
// ============================================================================

#[tokio::test]
async fn test_tiingo_fetch_rewrites_share_class_ticker() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/tiingo/daily/brk-b/prices"))
        .and(query_param("token", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "date": "2024-01-02T00:00:00.000Z", "open": 356.0, "high": 358.1, "low": 354.6,
              "close": 357.2, "volume": 3350000, "adjClose": 357.2 },
            { "date": "2024-01-03T00:00:00.000Z", "open": 356.5, "high": 357.0, "low": 353.9,
              "close": 354.9, "volume": 3010000, "adjClose": 354.9 }
        ])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/tiingo/daily/zzzz/prices"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({ "detail": "Error: Ticker 'ZZZZ' not found" })),
        )
        .mount(&server)
        .await;

    let adapter = TiingoAdapter::with_base_url(
        Some("tok".into()),
        server.uri(),
        Duration::from_secs(5),
        fast_batches(),
    );
    let data = adapter.fetch(&symbols(&["BRK.B", "ZZZZ"]), 30).await.unwrap();

    assert_eq!(data.len(), 1);
    let brk = &data["BRK.B"];
    assert_eq!(brk.price, Some(354.9));

    let bars = normalize_bars(&brk.historical);
    assert_eq!(bars.len(), 2);
    assert_eq!(bars[1].date, "2024-01-03");
    assert_eq!(bars[1].adj_close, Some(354.9));
}

#[tokio::test]
async fn test_tiingo_without_token_is_not_ready() {
    let adapter = TiingoAdapter::with_base_url(
        None,
        "http://127.0.0.1:1",
        Duration::from_secs(1),
        fast_batches(),
    );
    assert!(!adapter.is_ready());
    let err = adapter.fetch(&symbols(&["AAPL"]), 30).await.unwrap_err();
    assert!(matches!(err, ProviderError::NotReady(_)));
}

#[tokio::test]
async fn test_tiingo_rate_limit_surfaces_when_nothing_fetched() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let adapter = TiingoAdapter::with_base_url(
        Some("tok".into()),
        server.uri(),
        Duration::from_secs(5),
        fast_batches(),
    );
    let err = adapter.fetch(&symbols(&["AAPL"]), 30).await.unwrap_err();
    assert!(matches!(err, ProviderError::RateLimited { .. }));
}
