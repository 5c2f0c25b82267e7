//! Zero Screener - runs user screeners against recent market data.
//!
//! Verifies the Python interpreter at startup, then serves the HTTP API.

use anyhow::Result;
use zero_common::config::Config;
use zero_common::logging::init_logging_with_exclusions;
use zero_screener::sandbox::bootstrap;
use zero_screener::ScreenerService;

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = std::time::Instant::now();

    let config = Config::load_and_validate()?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Zero Screener v{}", env!("CARGO_PKG_VERSION"));

    let interpreter = bootstrap(&config.screener.execution).await?;
    if !interpreter.missing_packages.is_empty() {
        tracing::warn!(
            missing = ?interpreter.missing_packages,
            "Screeners importing these packages will fail"
        );
    }

    let service = ScreenerService::new(config)?;

    let startup_duration = startup_start.elapsed();
    tracing::info!(
        duration_ms = u64::try_from(startup_duration.as_millis()).unwrap_or(u64::MAX),
        "Service initialized in {:?}",
        startup_duration
    );

    service.start().await
}
