//! Provider registry and runtime-mutable visitation order.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::provider::{MarketDataProvider, ProviderInfo};
use crate::error::ScreenerError;

// ============================================================================
// Provider Order
// ============================================================================

/// Ordered list of registered provider names.
///
/// Construction validates against the registry, so a `ProviderOrder` never
/// names an unknown provider or repeats one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOrder(Vec<String>);

impl ProviderOrder {
    /// Validate `names` against the set of registered providers.
    pub fn parse<S: AsRef<str>>(names: &[S], valid: &[String]) -> Result<Self, ScreenerError> {
        let mut seen = HashSet::new();
        let mut order = Vec::with_capacity(names.len());

        for raw in names {
            let name = raw.as_ref().trim().to_lowercase();
            if !valid.contains(&name) {
                return Err(ScreenerError::UnknownProvider {
                    name,
                    valid: valid.to_vec(),
                });
            }
            if !seen.insert(name.clone()) {
                return Err(ScreenerError::DuplicateProvider { name });
            }
            order.push(name);
        }

        Ok(Self(order))
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }
}

// ============================================================================
// Provider Registry
// ============================================================================

/// Registered providers plus the current visitation order.
pub struct ProviderRegistry {
    providers: BTreeMap<&'static str, Arc<dyn MarketDataProvider>>,
    order: RwLock<ProviderOrder>,
}

impl ProviderRegistry {
    /// Build a registry. The initial order is validated like any later update.
    pub fn new<S: AsRef<str>>(
        providers: Vec<Arc<dyn MarketDataProvider>>,
        order: &[S],
    ) -> Result<Self, ScreenerError> {
        let mut map: BTreeMap<&'static str, Arc<dyn MarketDataProvider>> = BTreeMap::new();
        for provider in providers {
            let name = provider.name();
            info!(provider = name, ready = provider.is_ready(), "Registered data provider");
            map.insert(name, provider);
        }

        let valid: Vec<String> = map.keys().map(|k| k.to_string()).collect();
        let order = ProviderOrder::parse(order, &valid)?;

        Ok(Self {
            providers: map,
            order: RwLock::new(order),
        })
    }

    /// Registered provider names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.providers.keys().map(|k| k.to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MarketDataProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Readiness of every registered provider.
    pub fn infos(&self) -> Vec<ProviderInfo> {
        self.providers
            .values()
            .map(|p| ProviderInfo::from_provider(p.as_ref()))
            .collect()
    }

    pub async fn order(&self) -> ProviderOrder {
        self.order.read().await.clone()
    }

    /// Replace the visitation order. Unknown or repeated names are rejected
    /// and the previous order is kept.
    pub async fn set_order<S: AsRef<str>>(&self, names: &[S]) -> Result<ProviderOrder, ScreenerError> {
        let order = ProviderOrder::parse(names, &self.names())?;
        *self.order.write().await = order.clone();
        info!(order = ?order.names(), "Provider order updated");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ProviderError, RawDataSet};
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl MarketDataProvider for Named {
        fn name(&self) -> &'static str {
            self.0
        }
        fn is_ready(&self) -> bool {
            self.0 != "alpaca"
        }
        async fn fetch(&self, _: &[String], _: u32) -> Result<RawDataSet, ProviderError> {
            Ok(RawDataSet::new())
        }
    }

    fn registry() -> ProviderRegistry {
        let providers: Vec<Arc<dyn MarketDataProvider>> =
            vec![Arc::new(Named("yahoo")), Arc::new(Named("alpaca"))];
        ProviderRegistry::new(providers, &["alpaca", "yahoo"]).unwrap()
    }

    #[test]
    fn test_order_rejects_unknown() {
        let valid = vec!["yahoo".to_string()];
        let err = ProviderOrder::parse(&["yahoo", "bloomberg"], &valid).unwrap_err();
        match err {
            ScreenerError::UnknownProvider { name, valid } => {
                assert_eq!(name, "bloomberg");
                assert_eq!(valid, vec!["yahoo"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_order_rejects_duplicates() {
        let valid = vec!["yahoo".to_string()];
        assert!(matches!(
            ProviderOrder::parse(&["yahoo", "YAHOO"], &valid),
            Err(ScreenerError::DuplicateProvider { .. })
        ));
    }

    #[test]
    fn test_infos_report_readiness() {
        let infos = registry().infos();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().any(|i| i.name == "alpaca" && !i.is_ready));
        assert!(infos.iter().any(|i| i.name == "yahoo" && i.is_ready));
    }

    #[tokio::test]
    async fn test_set_order_keeps_previous_on_error() {
        let registry = registry();
        assert!(registry.set_order(&["tiingo"]).await.is_err());
        assert_eq!(registry.order().await.names(), &["alpaca", "yahoo"]);

        registry.set_order(&["yahoo"]).await.unwrap();
        assert_eq!(registry.order().await.names(), &["yahoo"]);
    }
}
