//! Batching with an inter-batch delay, so upstreams are hit politely.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::provider::ProviderError;
use super::RawDataSet;

/// How an adapter splits a symbol list into upstream requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Symbols per request (at least 1)
    pub size: usize,
    /// Pause between consecutive requests
    pub delay: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            size: 5,
            delay: Duration::from_millis(250),
        }
    }
}

impl BatchPolicy {
    pub fn new(size: usize, delay_ms: u64) -> Self {
        Self {
            size: size.max(1),
            delay: Duration::from_millis(delay_ms),
        }
    }

    /// Run `fetch_batch` over consecutive chunks and merge the results.
    ///
    /// Auth and readiness errors abort at once since every later batch
    /// would fail the same way. Other batch failures are skipped; the last
    /// one is returned only when no batch succeeded.
    pub async fn run<F, Fut>(
        &self,
        provider: &str,
        symbols: &[String],
        mut fetch_batch: F,
    ) -> Result<RawDataSet, ProviderError>
    where
        F: FnMut(Vec<String>) -> Fut,
        Fut: Future<Output = Result<RawDataSet, ProviderError>>,
    {
        let mut merged = RawDataSet::new();
        let mut last_error = None;
        let mut any_ok = false;

        for (i, chunk) in symbols.chunks(self.size.max(1)).enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            debug!(provider, batch = i, size = chunk.len(), "Fetching batch");

            match fetch_batch(chunk.to_vec()).await {
                Ok(data) => {
                    any_ok = true;
                    merged.extend(data);
                }
                Err(e @ (ProviderError::Auth(_) | ProviderError::NotReady(_))) => return Err(e),
                Err(e) => {
                    warn!(provider, batch = i, error = %e, "Batch failed, continuing");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if !any_ok => Err(e),
            _ => Ok(merged),
        }
    }
}
