//! Errors surfaced by a screener run.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Terminal failure of a screener run or a control-plane request.
///
/// Script failures are never retried and never turned into an empty
/// success.
#[derive(Debug, Error)]
pub enum ScreenerError {
    /// No provider returned real data for any requested symbol
    #[error("No market data available for {} requested symbol(s)", requested.len())]
    NoDataAvailable { requested: Vec<String> },

    /// The child process exceeded its deadline and was killed
    #[error("Screener timed out after {elapsed_ms}ms (limit {timeout_ms}ms)")]
    ScriptTimeout {
        timeout_ms: u64,
        elapsed_ms: u64,
        stderr_tail: String,
    },

    /// The child exited non-zero without emitting a result
    #[error("Screener exited with code {exit_code:?}: {stderr_tail}")]
    ScriptRuntime {
        exit_code: Option<i32>,
        stderr_tail: String,
        elapsed_ms: u64,
    },

    /// The child exited cleanly but no result could be recovered
    #[error("Could not parse screener output")]
    ResultParse { excerpt: String },

    /// The interpreter could not be started
    #[error("Failed to start interpreter: {0}")]
    Spawn(String),

    #[error("Unknown provider '{name}'")]
    UnknownProvider { name: String, valid: Vec<String> },

    #[error("Provider '{name}' listed more than once")]
    DuplicateProvider { name: String },

    /// The request asked for something the service will not do
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Screener not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScreenerError {
    /// Stable machine-readable kind for HTTP error bodies.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NoDataAvailable { .. } => "no_data_available",
            Self::ScriptTimeout { .. } => "script_timeout",
            Self::ScriptRuntime { .. } => "script_runtime_error",
            Self::ResultParse { .. } => "result_parse_failure",
            Self::UnknownProvider { .. } => "unknown_provider",
            Self::DuplicateProvider { .. } => "duplicate_provider",
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
            Self::Spawn(_) | Self::Internal(_) => "internal",
        }
    }

    /// HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NoDataAvailable { .. } | Self::ScriptRuntime { .. } => 422,
            Self::ScriptTimeout { .. } => 408,
            Self::ResultParse { .. } => 502,
            Self::UnknownProvider { .. }
            | Self::DuplicateProvider { .. }
            | Self::InvalidRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::Spawn(_) | Self::Internal(_) => 500,
        }
    }

    /// Structured fields for the error body, beyond `error` and `kind`.
    pub fn details(&self) -> serde_json::Value {
        use serde_json::json;

        match self {
            Self::NoDataAvailable { requested } => json!({ "requested": requested }),
            Self::ScriptTimeout {
                timeout_ms,
                elapsed_ms,
                stderr_tail,
            } => json!({
                "timeoutMs": timeout_ms,
                "elapsedMs": elapsed_ms,
                "stderrTail": stderr_tail,
            }),
            Self::ScriptRuntime {
                exit_code,
                stderr_tail,
                elapsed_ms,
            } => json!({
                "exitCode": exit_code,
                "stderrTail": stderr_tail,
                "elapsedMs": elapsed_ms,
            }),
            Self::ResultParse { excerpt } => json!({ "excerpt": excerpt }),
            Self::UnknownProvider { name, valid } => json!({ "name": name, "valid": valid }),
            Self::DuplicateProvider { name } => json!({ "name": name }),
            _ => json!({}),
        }
    }
}

impl IntoResponse for ScreenerError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut body = serde_json::json!({
            "error": self.to_string(),
            "kind": self.kind(),
        });
        if let (Some(body), serde_json::Value::Object(details)) =
            (body.as_object_mut(), self.details())
        {
            for (key, value) in details {
                body.insert(key, value);
            }
        }

        (status, axum::Json(body)).into_response()
    }
}
