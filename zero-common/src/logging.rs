//! Logging utilities for Zero services.
//!
//! Structured logging via `tracing`, rendered as JSON for log shippers or
//! pretty text for terminals.
//!
//! # Noise Filtering
//!
//! HTTP client internals (hyper, reqwest, h2, rustls) are clamped to `warn`
//! so pipeline logs stay readable at `debug`.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Modules whose chatter is clamped to `warn`.
pub const NOISY_MODULES: &[&str] = &[
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio_util",
    "tower_http",
];

/// Build the filter directive string for a base level plus exclusions.
fn build_directives(log_level: &str, excluded_targets: &[String]) -> String {
    let mut directives = String::from(log_level);

    for module in NOISY_MODULES {
        directives.push_str(&format!(",{}=warn", module));
    }

    for target in excluded_targets {
        directives.push_str(&format!(",{}=warn", target));
    }

    directives
}

/// Initialize logging with the given configuration.
///
/// `RUST_LOG`, when set, replaces the computed filter entirely.
pub fn init_logging(log_level: &str, log_format: &str) {
    init_logging_with_exclusions(log_level, log_format, &[]);
}

/// Like [`init_logging`], with additional modules clamped to `warn`.
pub fn init_logging_with_exclusions(
    log_level: &str,
    log_format: &str,
    excluded_targets: &[String],
) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(build_directives(log_level, excluded_targets)));

    let subscriber = tracing_subscriber::registry().with(filter);

    if log_format == "json" {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_file(true)
            .with_line_number(true);
        let _ = subscriber.with(fmt_layer).try_init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        let _ = subscriber.with(fmt_layer).try_init();
    }

    tracing::info!(
        log_level = %log_level,
        log_format = %log_format,
        noise_filtered = NOISY_MODULES.len() + excluded_targets.len(),
        "Logging initialized"
    );
}

/// Generate a new run ID.
pub fn generate_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Create a tracing span for one screener run.
///
/// # Example
///
/// ```ignore
/// let span = run_span!(run_id, symbols = symbols.len());
/// async { /* ... */ }.instrument(span).await;
/// ```
#[macro_export]
macro_rules! run_span {
    ($run_id:expr) => {
        tracing::info_span!("screener_run", run_id = %$run_id)
    };
    ($run_id:expr, $($field:tt)*) => {
        tracing::info_span!("screener_run", run_id = %$run_id, $($field)*)
    };
}
