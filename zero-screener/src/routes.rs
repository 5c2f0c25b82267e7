//! HTTP routes for the screener service.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::data::{CacheStats, ProviderInfo};
use crate::error::ScreenerError;
use crate::pipeline::{ScreenerRequest, ScreenerRun};
use crate::ScreenerState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub service: String,
}

/// Provider visitation order, used for both reads and updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBody {
    pub order: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    pub cleared: usize,
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        service: "zero-screener".to_string(),
    })
}

/// Run an ad-hoc screener
pub async fn run_screener(
    State(state): State<Arc<ScreenerState>>,
    Json(request): Json<ScreenerRequest>,
) -> Result<Json<ScreenerRun>, ScreenerError> {
    let run = state.pipeline.run_screener(request).await?;
    Ok(Json(run))
}

/// Run a stored screener by id
pub async fn run_stored_screener(
    State(state): State<Arc<ScreenerState>>,
    Path(id): Path<String>,
) -> Result<Json<ScreenerRun>, ScreenerError> {
    let run = state.pipeline.run_stored(&id).await?;
    Ok(Json(run))
}

pub async fn list_providers(State(state): State<Arc<ScreenerState>>) -> Json<Vec<ProviderInfo>> {
    Json(state.pipeline.coordinator().registry().infos())
}

pub async fn get_provider_order(State(state): State<Arc<ScreenerState>>) -> Json<OrderBody> {
    let order = state.pipeline.coordinator().registry().order().await;
    Json(OrderBody {
        order: order.names().to_vec(),
    })
}

/// Replace the provider order. Unknown or repeated names are rejected.
pub async fn set_provider_order(
    State(state): State<Arc<ScreenerState>>,
    Json(body): Json<OrderBody>,
) -> Result<Json<OrderBody>, ScreenerError> {
    let order = state
        .pipeline
        .coordinator()
        .registry()
        .set_order(&body.order)
        .await?;
    Ok(Json(OrderBody {
        order: order.names().to_vec(),
    }))
}

pub async fn clear_cache(State(state): State<Arc<ScreenerState>>) -> impl IntoResponse {
    let cleared = state.pipeline.coordinator().cache().clear();
    tracing::info!(cleared, "Market data cache cleared");
    Json(CacheClearResponse { cleared })
}

pub async fn cache_stats(State(state): State<Arc<ScreenerState>>) -> Json<CacheStats> {
    Json(state.pipeline.coordinator().cache().stats())
}
