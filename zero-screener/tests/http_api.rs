//! HTTP surface tests. None of these start an interpreter.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::sync::Arc;
use tower::ServiceExt;
use zero_common::Config;
use zero_screener::data::{MarketDataProvider, ProviderError, RawDataSet, RawSymbolRecord};
use zero_screener::pipeline::InMemoryScreenerStore;
use zero_screener::{build_router, ScreenerState};

struct Static {
    name: &'static str,
    ready: bool,
}

#[async_trait]
impl MarketDataProvider for Static {
    fn name(&self) -> &'static str {
        self.name
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn fetch(&self, symbols: &[String], _lookback_days: u32) -> Result<RawDataSet, ProviderError> {
        Ok(symbols
            .iter()
            .filter(|s| s.as_str() != "ZZZZ")
            .map(|s| (s.clone(), RawSymbolRecord::new(self.name)))
            .collect())
    }
}

fn test_app() -> axum::Router {
    let mut config = Config::default();
    config.screener.provider_order = vec!["alpha".into(), "beta".into()];
    config.screener.execution.interpreter = "zero-screener-no-such-python".into();

    let providers: Vec<Arc<dyn MarketDataProvider>> = vec![
        Arc::new(Static { name: "alpha", ready: true }),
        Arc::new(Static { name: "beta", ready: false }),
    ];
    let state = ScreenerState::with_parts(config, providers, Arc::new(InMemoryScreenerStore::new()))
        .unwrap();
    build_router(Arc::new(state))
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn send_json(method: &str, uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = test_app().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "zero-screener");
}

#[tokio::test]
async fn test_list_providers_reports_readiness() {
    let response = test_app().oneshot(get("/api/v1/providers")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = json_body(response).await;
    let providers = json.as_array().unwrap();
    assert_eq!(providers.len(), 2);
    assert_eq!(providers[0]["name"], "alpha");
    assert_eq!(providers[0]["isReady"], true);
    assert_eq!(providers[1]["isReady"], false);
}

#[tokio::test]
async fn test_provider_order_round_trip() {
    let app = test_app();

    let response = app.clone().oneshot(get("/api/v1/providers/order")).await.unwrap();
    assert_eq!(json_body(response).await["order"], serde_json::json!(["alpha", "beta"]));

    let response = app
        .clone()
        .oneshot(send_json("PUT", "/api/v1/providers/order", r#"{"order": ["Beta", "alpha"]}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["order"], serde_json::json!(["beta", "alpha"]));

    let response = app.oneshot(get("/api/v1/providers/order")).await.unwrap();
    assert_eq!(json_body(response).await["order"], serde_json::json!(["beta", "alpha"]));
}

#[tokio::test]
async fn test_unknown_provider_order_is_400_with_valid_names() {
    let response = test_app()
        .oneshot(send_json("PUT", "/api/v1/providers/order", r#"{"order": ["gamma"]}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = json_body(response).await;
    assert_eq!(json["kind"], "unknown_provider");
    assert_eq!(json["name"], "gamma");
    assert_eq!(json["valid"], serde_json::json!(["alpha", "beta"]));
    assert!(json["error"].as_str().unwrap().contains("gamma"));
}

#[tokio::test]
async fn test_cache_stats_and_clear() {
    let app = test_app();

    let response = app.clone().oneshot(get("/api/v1/cache/stats")).await.unwrap();
    let json = json_body(response).await;
    assert_eq!(json["totalEntries"], 0);
    assert_eq!(json["activeEntries"], 0);

    let response = app
        .oneshot(send_json("POST", "/api/v1/cache/clear", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["cleared"], 0);
}

#[tokio::test]
async fn test_no_data_is_422() {
    let response = test_app()
        .oneshot(send_json(
            "POST",
            "/api/v1/screener/run",
            r#"{"code": "def screen_stocks(data): return []", "symbols": ["ZZZZ"]}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let json = json_body(response).await;
    assert_eq!(json["kind"], "no_data_available");
    assert_eq!(json["requested"], serde_json::json!(["ZZZZ"]));
}

#[tokio::test]
async fn test_out_of_range_lookback_is_400() {
    let response = test_app()
        .oneshot(send_json(
            "POST",
            "/api/v1/screener/run",
            r#"{"code": "def screen_stocks(data): return []", "symbols": ["AAPL"], "lookbackDays": 4294967295}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = json_body(response).await;
    assert_eq!(json["kind"], "invalid_request");
    assert!(json["error"].as_str().unwrap().contains("lookbackDays"));
}

#[tokio::test]
async fn test_interpreter_launch_failure_is_500() {
    let response = test_app()
        .oneshot(send_json(
            "POST",
            "/api/v1/screener/run",
            r#"{"code": "def screen_stocks(data): return []", "symbols": ["AAPL"]}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(response).await["kind"], "internal");
}

#[tokio::test]
async fn test_unknown_stored_screener_is_404() {
    let response = test_app()
        .oneshot(send_json("POST", "/api/v1/screener/missing/run", ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["kind"], "not_found");
}
