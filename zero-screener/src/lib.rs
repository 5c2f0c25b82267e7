//! Zero Screener Library
//!
//! Runs user-submitted Python screeners against recent daily market data
//! and returns the matching symbols.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                   zero-screener (Rust Service)                      │
//! │                           :4440                                     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────┐      │
//! │  │  Market Data    │  │  Script         │  │  Sandboxed      │      │
//! │  │  Fallback+Cache │─▶│  Assembler      │─▶│  Executor       │      │
//! │  └─────────────────┘  └─────────────────┘  └────────┬────────┘      │
//! │                                                     ▼               │
//! │                                            ┌─────────────────┐      │
//! │                                            │  Result         │      │
//! │                                            │  Extractor      │      │
//! │                                            └─────────────────┘      │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Provider fallback
//! - Providers are visited in a runtime-configurable order
//! - Each provider is asked only for symbols still unresolved
//! - The first provider to return real data for a symbol wins
//!
//! ## Result protocol
//! - The harness prints its JSON result between per-run nonce markers
//! - Anything else on stdout is noise and is ignored

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod error;
pub mod pipeline;
pub mod routes;
pub mod sandbox;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use zero_common::config::Config;

use crate::data::{
    AlpacaAdapter, DataCache, FetchCoordinator, MarketDataProvider, ProviderRegistry,
    TiingoAdapter, YahooAdapter,
};
use crate::error::ScreenerError;
use crate::pipeline::{InMemoryScreenerStore, ScreenerPipeline, ScreenerStore};
use crate::sandbox::{ExecutorConfig, SandboxExecutor};

/// Largest accepted request body (screener code plus symbols).
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Screener service state
pub struct ScreenerState {
    /// Configuration
    pub config: Config,
    /// Fetch, execute and extract pipeline
    pub pipeline: Arc<ScreenerPipeline>,
}

impl ScreenerState {
    /// Create state with the built-in providers and an in-memory store
    pub fn new(config: Config) -> Result<Self, ScreenerError> {
        let providers: Vec<Arc<dyn MarketDataProvider>> = vec![
            Arc::new(AlpacaAdapter::from_config(&config)),
            Arc::new(TiingoAdapter::from_config(&config)),
            Arc::new(YahooAdapter::from_config(&config)),
        ];
        Self::with_parts(config, providers, Arc::new(InMemoryScreenerStore::new()))
    }

    /// Create state from explicit providers and store
    pub fn with_parts(
        config: Config,
        providers: Vec<Arc<dyn MarketDataProvider>>,
        store: Arc<dyn ScreenerStore>,
    ) -> Result<Self, ScreenerError> {
        let screener = &config.screener;
        let registry = Arc::new(ProviderRegistry::new(providers, &screener.provider_order)?);
        let cache = Arc::new(DataCache::with_ttl(screener.cache_ttl_secs));
        let coordinator = Arc::new(FetchCoordinator::new(registry, cache));
        let executor = SandboxExecutor::new(ExecutorConfig::from_config(&screener.execution));
        let pipeline = Arc::new(ScreenerPipeline::new(coordinator, executor, store, screener));

        Ok(Self { config, pipeline })
    }
}

/// Build the HTTP router over shared state.
pub fn build_router(state: Arc<ScreenerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        // Screener runs
        .route("/api/v1/screener/run", post(routes::run_screener))
        .route("/api/v1/screener/:id/run", post(routes::run_stored_screener))
        // Providers
        .route("/api/v1/providers", get(routes::list_providers))
        .route(
            "/api/v1/providers/order",
            get(routes::get_provider_order).put(routes::set_provider_order),
        )
        // Cache
        .route("/api/v1/cache/clear", post(routes::clear_cache))
        .route("/api/v1/cache/stats", get(routes::cache_stats))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .with_state(state)
}

/// Main screener service
pub struct ScreenerService {
    state: Arc<ScreenerState>,
}

impl ScreenerService {
    /// Create a new screener service
    pub fn new(config: Config) -> Result<Self> {
        let state = Arc::new(ScreenerState::new(config)?);
        Ok(Self { state })
    }

    pub fn state(&self) -> &Arc<ScreenerState> {
        &self.state
    }

    /// Start the screener service
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = self.state.config.screener_addr().parse()?;
        let app = build_router(self.state.clone());

        // Drop expired cache entries periodically; reads already ignore them
        let cache = self.state.pipeline.coordinator().cache().clone();
        let ttl = self
            .state
            .config
            .screener
            .cache_ttl_secs
            .clamp(1, zero_common::MAX_CACHE_TTL_SECS);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(ttl));
            loop {
                interval.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired cache entries");
                }
            }
        });

        tracing::info!(address = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
