//! Sandboxed execution of user screeners.
//!
//! A screener is assembled into a standalone Python program, run in a
//! child process with a scrubbed environment and a hard deadline, and its
//! result is recovered from the process output.

mod assembler;
mod bootstrap;
mod executor;
mod extractor;
mod markers;

pub use assembler::{
    assemble, assemble_with_markers, AssembledScript, ENTRY_FUNCTION, PARTIAL_RESULT_NAMES,
};
pub use bootstrap::{bootstrap, InterpreterInfo};
pub use executor::{ExecutorConfig, RunOutput, SandboxExecutor, ENV_ALLOWLIST};
pub use extractor::{extract, ExtractError};
pub use markers::{MarkerScanner, Markers};

use serde::{Deserialize, Serialize};

/// Structured result of one screener run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// Matching symbols, in the order the screener produced them
    pub matches: Vec<String>,
    /// Per-symbol explanation, free-form
    pub details: serde_json::Map<String, serde_json::Value>,
    /// Child process wall-clock time in seconds
    pub execution_time: f64,
    /// Set when the screener failed, possibly after producing some matches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
