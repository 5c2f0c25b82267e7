//! Screener pipeline orchestrator.
//!
//! resolve symbols -> fetch (with fallback + cache) -> normalize ->
//! assemble -> execute -> extract -> attach metadata.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tracing::{info, warn, Instrument};
use zero_common::config::MAX_LOOKBACK_DAYS;

use crate::data::{canonical_symbols, normalize, FetchCoordinator, FetchOutcome};
use crate::error::ScreenerError;
use crate::sandbox::{
    assemble, extract, ExecutionResult, ExtractError, Markers, RunOutput, SandboxExecutor,
};

/// Longest stderr tail carried by a script error.
const STDERR_TAIL_CHARS: usize = 2000;

// ============================================================================
// Request / Response Types
// ============================================================================

/// One ad-hoc screener run.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenerRequest {
    /// User analysis code
    pub code: String,
    /// Universe to screen; inferred from the code when absent or empty
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
    /// Provider to try before the configured order
    #[serde(default)]
    pub preferred_provider: Option<String>,
    /// History window override, in calendar days
    #[serde(default)]
    pub lookback_days: Option<u32>,
}

/// Facts about how a run's input was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub timestamp: String,
    pub provider: String,
    pub symbols_requested: usize,
    pub symbols_retrieved: usize,
    pub missing_symbols: Vec<String>,
    pub run_id: String,
    pub cache_hit: bool,
}

/// A finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenerRun {
    pub results: ExecutionResult,
    pub metadata: RunMetadata,
}

// ============================================================================
// Stored Screeners
// ============================================================================

/// A persisted screener definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredScreener {
    pub id: String,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub symbols: Vec<String>,
    #[serde(default)]
    pub preferred_provider: Option<String>,
}

impl StoredScreener {
    fn to_request(&self) -> ScreenerRequest {
        ScreenerRequest {
            code: self.code.clone(),
            symbols: Some(self.symbols.clone()),
            preferred_provider: self.preferred_provider.clone(),
            lookback_days: None,
        }
    }
}

/// Source of stored screener definitions.
#[async_trait]
pub trait ScreenerStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<StoredScreener>, ScreenerError>;

    async fn put(&self, screener: StoredScreener) -> Result<(), ScreenerError>;
}

/// Process-local store, for tests and single-node use.
#[derive(Default)]
pub struct InMemoryScreenerStore {
    screeners: RwLock<HashMap<String, StoredScreener>>,
}

impl InMemoryScreenerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScreenerStore for InMemoryScreenerStore {
    async fn get(&self, id: &str) -> Result<Option<StoredScreener>, ScreenerError> {
        Ok(self.screeners.read().await.get(id).cloned())
    }

    async fn put(&self, screener: StoredScreener) -> Result<(), ScreenerError> {
        self.screeners
            .write()
            .await
            .insert(screener.id.clone(), screener);
        Ok(())
    }
}

// ============================================================================
// Symbol Inference
// ============================================================================

static UNIVERSE_ASSIGNMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:tickers|symbols|universe)\s*=\s*\[([^\]]*)\]").unwrap());

static QUOTED_SYMBOL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"["']([A-Za-z0-9.\-^=]{1,15})["']"#).unwrap());

/// Best-effort scan of user code for a literal symbol list.
pub fn infer_symbols(code: &str) -> Vec<String> {
    let found: Vec<String> = UNIVERSE_ASSIGNMENT
        .captures_iter(code)
        .filter_map(|c| c.get(1))
        .flat_map(|list| {
            QUOTED_SYMBOL
                .captures_iter(list.as_str())
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect::<Vec<_>>()
        })
        .collect();
    canonical_symbols(&found)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Pipeline
// ============================================================================

/// Turn a finished process into a result or a terminal error.
fn interpret(
    output: &RunOutput,
    timeout: Duration,
    markers: &Markers,
) -> Result<ExecutionResult, ScreenerError> {
    let elapsed_ms = millis(output.elapsed);
    let stderr_tail =
        || zero_common::util::tail_with_ellipsis(output.stderr.trim(), STDERR_TAIL_CHARS);

    if output.timed_out {
        return Err(ScreenerError::ScriptTimeout {
            timeout_ms: millis(timeout),
            elapsed_ms,
            stderr_tail: stderr_tail(),
        });
    }

    match extract(&output.stdout, markers, output.captured_payload.as_deref()) {
        Ok(mut result) => {
            result.execution_time = output.elapsed.as_secs_f64();
            if output.exit_code != Some(0) && result.error.is_none() {
                result.error = Some(match output.exit_code {
                    Some(code) => format!("Screener process exited with code {}", code),
                    None => "Screener process was terminated by a signal".to_string(),
                });
            }
            Ok(result)
        }
        Err(ExtractError::NoResult { excerpt }) => {
            if output.exit_code == Some(0) {
                Err(ScreenerError::ResultParse { excerpt })
            } else {
                Err(ScreenerError::ScriptRuntime {
                    exit_code: output.exit_code,
                    stderr_tail: stderr_tail(),
                    elapsed_ms,
                })
            }
        }
    }
}

/// End-to-end screener runner. Owns the fetch layer and the executor.
pub struct ScreenerPipeline {
    coordinator: Arc<FetchCoordinator>,
    executor: SandboxExecutor,
    store: Arc<dyn ScreenerStore>,
    permits: Semaphore,
    default_universe: Vec<String>,
    lookback_days: u32,
}

impl ScreenerPipeline {
    pub fn new(
        coordinator: Arc<FetchCoordinator>,
        executor: SandboxExecutor,
        store: Arc<dyn ScreenerStore>,
        config: &zero_common::ScreenerConfig,
    ) -> Self {
        Self {
            coordinator,
            executor,
            store,
            permits: Semaphore::new(config.execution.max_concurrent_runs.max(1)),
            default_universe: canonical_symbols(&config.default_universe),
            lookback_days: config.lookback_days,
        }
    }

    pub fn coordinator(&self) -> &Arc<FetchCoordinator> {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<dyn ScreenerStore> {
        &self.store
    }

    /// Symbols for a request: explicit list, else inferred, else default.
    pub fn resolve_symbols(&self, request: &ScreenerRequest) -> Vec<String> {
        if let Some(explicit) = request.symbols.as_deref() {
            let symbols = canonical_symbols(explicit);
            if !symbols.is_empty() {
                return symbols;
            }
        }

        let inferred = infer_symbols(&request.code);
        if !inferred.is_empty() {
            return inferred;
        }

        self.default_universe.clone()
    }

    /// Run a screener end to end.
    pub async fn run_screener(&self, request: ScreenerRequest) -> Result<ScreenerRun, ScreenerError> {
        let run_id = zero_common::logging::generate_run_id();
        let symbols = self.resolve_symbols(&request);
        let span = zero_common::run_span!(run_id, symbols = symbols.len());

        self.run_inner(run_id, symbols, request).instrument(span).await
    }

    /// Run a stored screener by id.
    pub async fn run_stored(&self, id: &str) -> Result<ScreenerRun, ScreenerError> {
        let screener = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| ScreenerError::NotFound(id.to_string()))?;
        info!(screener_id = %screener.id, name = %screener.name, "Running stored screener");
        self.run_screener(screener.to_request()).await
    }

    async fn run_inner(
        &self,
        run_id: String,
        symbols: Vec<String>,
        request: ScreenerRequest,
    ) -> Result<ScreenerRun, ScreenerError> {
        let lookback = request.lookback_days.filter(|d| *d > 0).unwrap_or(self.lookback_days);
        if lookback > MAX_LOOKBACK_DAYS {
            return Err(ScreenerError::InvalidRequest(format!(
                "lookbackDays must be at most {}",
                MAX_LOOKBACK_DAYS
            )));
        }
        info!(lookback_days = lookback, "Starting screener run");

        let FetchOutcome {
            data,
            provider_used,
            missing,
            cache_hit,
        } = self
            .coordinator
            .fetch(&symbols, lookback, request.preferred_provider.as_deref())
            .await?;

        let normalized = normalize(&data);
        let symbols_retrieved = normalized.values().filter(|r| !r.placeholder).count();
        let script = assemble(&request.code, &normalized)?;

        let output = {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|e| ScreenerError::Internal(format!("execution semaphore closed: {}", e)))?;
            self.executor.run(&script).await?
        };

        let results = match interpret(&output, self.executor.config().timeout, &script.markers) {
            Ok(results) => results,
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Screener run failed");
                return Err(e);
            }
        };

        info!(
            matches = results.matches.len(),
            provider = %provider_used,
            cache_hit,
            elapsed_ms = millis(output.elapsed),
            has_error = results.error.is_some(),
            "Screener run finished"
        );

        Ok(ScreenerRun {
            results,
            metadata: RunMetadata {
                timestamp: chrono::Utc::now().to_rfc3339(),
                provider: provider_used,
                symbols_requested: symbols.len(),
                symbols_retrieved,
                missing_symbols: missing,
                run_id,
                cache_hit,
            },
        })
    }
}
