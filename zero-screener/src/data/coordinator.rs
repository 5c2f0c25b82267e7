//! Provider fallback coordinator.
//!
//! Walks the provider order, asking each ready provider for the symbols
//! still unresolved, until every symbol has real data or providers run out.
//! Results are memoized in the [`DataCache`].

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::cache::{cache_key, CachedFetch, DataCache};
use super::registry::ProviderRegistry;
use super::{canonical_symbols, RawDataSet};
use crate::error::ScreenerError;

/// Result of one coordinated fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    /// Per-symbol records; may include placeholders for missing symbols
    pub data: RawDataSet,
    /// Provider that contributed the first real batch
    pub provider_used: String,
    /// Requested symbols with no real data, in request order
    pub missing: Vec<String>,
    /// Served from cache without contacting any provider
    pub cache_hit: bool,
}

impl FetchOutcome {
    /// Number of symbols with real data.
    pub fn retrieved(&self) -> usize {
        self.data.values().filter(|r| !r.placeholder).count()
    }
}

/// Sequential multi-provider fetch with a shared cache.
pub struct FetchCoordinator {
    registry: Arc<ProviderRegistry>,
    cache: Arc<DataCache>,
}

impl FetchCoordinator {
    pub fn new(registry: Arc<ProviderRegistry>, cache: Arc<DataCache>) -> Self {
        Self { registry, cache }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<DataCache> {
        &self.cache
    }

    /// Providers to visit, preferred one first, each at most once.
    async fn visitation_order(&self, preferred: Option<&str>) -> Vec<String> {
        let configured = self.registry.order().await;
        let mut order = Vec::with_capacity(configured.names().len() + 1);

        if let Some(name) = preferred.map(|p| p.trim().to_lowercase()) {
            if self.registry.contains(&name) {
                order.push(name);
            } else {
                warn!(provider = %name, "Preferred provider is not registered, ignoring");
            }
        }

        for name in configured.names() {
            if !order.contains(name) {
                order.push(name.clone());
            }
        }

        order
    }

    /// Fetch history for `symbols` over `lookback_days`.
    ///
    /// Fails with [`ScreenerError::NoDataAvailable`] only when no provider
    /// produced real data for any symbol. Partial results are returned and
    /// cached, with the gaps listed in `missing`.
    pub async fn fetch<S: AsRef<str>>(
        &self,
        symbols: &[S],
        lookback_days: u32,
        preferred: Option<&str>,
    ) -> Result<FetchOutcome, ScreenerError> {
        let symbols = canonical_symbols(symbols);
        if symbols.is_empty() {
            return Err(ScreenerError::NoDataAvailable { requested: Vec::new() });
        }

        let key = cache_key(&symbols, lookback_days);
        if let Some(hit) = self.cache.get(&key) {
            debug!(symbols = symbols.len(), provider = %hit.provider_used, "Cache hit");
            return Ok(FetchOutcome {
                data: hit.data,
                provider_used: hit.provider_used,
                missing: hit.missing,
                cache_hit: true,
            });
        }

        let mut data = RawDataSet::new();
        let mut remaining: Vec<String> = symbols.clone();
        let mut provider_used: Option<String> = None;

        for name in self.visitation_order(preferred).await {
            if remaining.is_empty() {
                break;
            }

            let Some(provider) = self.registry.get(&name) else {
                continue;
            };

            if !provider.is_ready() {
                debug!(provider = %name, "Provider not ready, skipping");
                continue;
            }

            let targets: Vec<String> = remaining
                .iter()
                .filter(|s| provider.supports(s))
                .cloned()
                .collect();
            if targets.is_empty() {
                continue;
            }

            debug!(provider = %name, symbols = targets.len(), "Routing request to provider");

            let batch = match provider.fetch(&targets, lookback_days).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(provider = %name, error = %e, "Provider error, failing over to next provider");
                    continue;
                }
            };

            let wanted: HashSet<&str> = targets.iter().map(String::as_str).collect();
            let mut resolved: HashSet<String> = HashSet::new();

            for (symbol, record) in batch {
                let symbol = symbol.to_uppercase();
                if !wanted.contains(symbol.as_str()) {
                    continue;
                }

                if record.placeholder {
                    data.entry(symbol).or_insert(record);
                    continue;
                }

                // First real record wins; a placeholder may be replaced
                if data.get(&symbol).map_or(false, |r| !r.placeholder) {
                    continue;
                }
                data.insert(symbol.clone(), record);
                resolved.insert(symbol);
            }

            if !resolved.is_empty() {
                info!(provider = %name, retrieved = resolved.len(), "Provider supplied data");
                provider_used.get_or_insert_with(|| name.clone());
                remaining.retain(|s| !resolved.contains(s));
            }
        }

        let Some(provider_used) = provider_used else {
            warn!(symbols = ?symbols, "No provider returned data");
            return Err(ScreenerError::NoDataAvailable { requested: symbols });
        };

        let missing: Vec<String> = symbols
            .iter()
            .filter(|s| data.get(*s).map_or(true, |r| r.placeholder))
            .cloned()
            .collect();

        if !missing.is_empty() {
            info!(missing = ?missing, "Some symbols unresolved after all providers");
        }

        self.cache.insert(
            key,
            CachedFetch {
                data: data.clone(),
                provider_used: provider_used.clone(),
                missing: missing.clone(),
            },
        );

        Ok(FetchOutcome {
            data,
            provider_used,
            missing,
            cache_hit: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MarketDataProvider, ProviderError, RawSymbolRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Scripted {
        name: &'static str,
        ready: bool,
        real: Vec<&'static str>,
        placeholders: Vec<&'static str>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(name: &'static str, real: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                name,
                ready: true,
                real,
                placeholders: Vec::new(),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl MarketDataProvider for Scripted {
        fn name(&self) -> &'static str {
            self.name
        }
        fn is_ready(&self) -> bool {
            self.ready
        }
        async fn fetch(&self, symbols: &[String], _: u32) -> Result<RawDataSet, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = RawDataSet::new();
            for s in symbols {
                if self.real.contains(&s.as_str()) {
                    out.insert(s.clone(), RawSymbolRecord::new(self.name));
                } else if self.placeholders.contains(&s.as_str()) {
                    out.insert(s.clone(), RawSymbolRecord::placeholder(self.name));
                }
            }
            Ok(out)
        }
    }

    fn coordinator(providers: Vec<Arc<dyn MarketDataProvider>>, order: &[&str]) -> FetchCoordinator {
        let registry = ProviderRegistry::new(providers, order).unwrap();
        FetchCoordinator::new(Arc::new(registry), Arc::new(DataCache::with_ttl(300)))
    }

    #[tokio::test]
    async fn test_preferred_provider_goes_first() {
        let a = Scripted::new("a", vec!["AAPL"]);
        let b = Scripted::new("b", vec!["AAPL"]);
        let coord = coordinator(vec![a.clone(), b.clone()], &["a", "b"]);

        let out = coord.fetch(&["AAPL"], 30, Some("b")).await.unwrap();
        assert_eq!(out.provider_used, "b");
        assert_eq!(out.data["AAPL"].source, "b");
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unregistered_preferred_is_ignored() {
        let a = Scripted::new("a", vec!["AAPL"]);
        let coord = coordinator(vec![a.clone()], &["a"]);

        let out = coord.fetch(&["AAPL"], 30, Some("nope")).await.unwrap();
        assert_eq!(out.provider_used, "a");
    }

    #[tokio::test]
    async fn test_placeholder_replaced_by_later_real_record() {
        let a = Arc::new(Scripted {
            name: "a",
            ready: true,
            real: vec!["AAPL"],
            placeholders: vec!["MSFT"],
            calls: AtomicU32::new(0),
        });
        let b = Scripted::new("b", vec!["MSFT"]);
        let coord = coordinator(vec![a.clone(), b.clone()], &["a", "b"]);

        let out = coord.fetch(&["AAPL", "MSFT"], 30, None).await.unwrap();
        assert!(!out.data["MSFT"].placeholder);
        assert_eq!(out.data["MSFT"].source, "b");
        assert!(out.missing.is_empty());
        assert_eq!(out.retrieved(), 2);
    }

    #[tokio::test]
    async fn test_leftover_placeholder_reported_missing() {
        let a = Arc::new(Scripted {
            name: "a",
            ready: true,
            real: vec!["AAPL"],
            placeholders: vec!["NEWCO"],
            calls: AtomicU32::new(0),
        });
        let coord = coordinator(vec![a], &["a"]);

        let out = coord.fetch(&["AAPL", "NEWCO"], 30, None).await.unwrap();
        assert!(out.data["NEWCO"].placeholder);
        assert_eq!(out.missing, vec!["NEWCO"]);
        assert_eq!(out.retrieved(), 1);
    }

    #[tokio::test]
    async fn test_placeholders_only_is_no_data() {
        let a = Arc::new(Scripted {
            name: "a",
            ready: true,
            real: vec![],
            placeholders: vec!["AAPL"],
            calls: AtomicU32::new(0),
        });
        let coord = coordinator(vec![a], &["a"]);

        let err = coord.fetch(&["AAPL"], 30, None).await.unwrap_err();
        assert!(matches!(err, ScreenerError::NoDataAvailable { .. }));
    }

    #[tokio::test]
    async fn test_not_ready_provider_skipped() {
        let a = Arc::new(Scripted {
            name: "a",
            ready: false,
            real: vec!["AAPL"],
            placeholders: vec![],
            calls: AtomicU32::new(0),
        });
        let b = Scripted::new("b", vec!["AAPL"]);
        let coord = coordinator(vec![a.clone(), b], &["a", "b"]);

        let out = coord.fetch(&["aapl"], 30, None).await.unwrap();
        assert_eq!(out.provider_used, "b");
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    }
}
