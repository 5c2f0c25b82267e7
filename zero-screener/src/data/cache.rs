//! Fetch result cache.
//!
//! In-memory memoization of coordinator results keyed by symbol set and
//! lookback window. Expiry is checked lazily on read.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;

use super::RawDataSet;

/// What a cache hit hands back, verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFetch {
    pub data: RawDataSet,
    pub provider_used: String,
    pub missing: Vec<String>,
}

/// Cache entry with TTL
#[derive(Debug, Clone)]
struct CacheEntry {
    payload: CachedFetch,
    created_at: DateTime<Utc>,
    ttl: Duration,
}

impl CacheEntry {
    fn new(payload: CachedFetch, ttl: Duration) -> Self {
        Self {
            payload,
            created_at: Utc::now(),
            ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() - self.created_at >= self.ttl
    }
}

/// Compute the cache key for a request.
///
/// Symbols are uppercased and sorted first, so `["msft", "AAPL"]` and
/// `["AAPL", "MSFT"]` share an entry.
pub fn cache_key<S: AsRef<str>>(symbols: &[S], lookback_days: u32) -> String {
    let mut sorted: Vec<String> = symbols
        .iter()
        .map(|s| s.as_ref().trim().to_uppercase())
        .collect();
    sorted.sort();
    sorted.dedup();

    let mut hasher = Sha256::new();
    hasher.update(sorted.join(",").as_bytes());
    hasher.update(b"|");
    hasher.update(lookback_days.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Market data cache
pub struct DataCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl DataCache {
    /// Create with a TTL in seconds
    pub fn with_ttl(ttl_secs: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl: i64::try_from(ttl_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
        }
    }

    /// Get a cached result if present and not expired
    pub fn get(&self, key: &str) -> Option<CachedFetch> {
        let cache = self.entries.read().ok()?;

        cache.get(key).and_then(|entry| {
            if entry.is_expired() {
                None
            } else {
                Some(entry.payload.clone())
            }
        })
    }

    /// Store a result under the configured TTL
    pub fn insert(&self, key: impl Into<String>, payload: CachedFetch) {
        let entry = CacheEntry::new(payload, self.ttl);

        if let Ok(mut cache) = self.entries.write() {
            cache.insert(key.into(), entry);
        }
    }

    /// Drop expired entries
    pub fn purge_expired(&self) -> usize {
        match self.entries.write() {
            Ok(mut cache) => {
                let before = cache.len();
                cache.retain(|_, entry| !entry.is_expired());
                before - cache.len()
            }
            Err(_) => 0,
        }
    }

    /// Clear all entries
    pub fn clear(&self) -> usize {
        match self.entries.write() {
            Ok(mut cache) => {
                let removed = cache.len();
                cache.clear();
                removed
            }
            Err(_) => 0,
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let (total, expired) = self
            .entries
            .read()
            .ok()
            .map(|c| {
                let total = c.len();
                let expired = c.values().filter(|e| e.is_expired()).count();
                (total, expired)
            })
            .unwrap_or((0, 0));

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            active_entries: total - expired,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
}

// ============================================================================
// Tests
// ============================================================================
