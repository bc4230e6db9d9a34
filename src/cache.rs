use crate::kv_store::KvStore;
use crate::metrics;
use crate::types::{BalanceResult, InvalidSet, NetworkMode};
use crate::utils::now_millis;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const BALANCE_CACHE_PURPOSE: &str = "cw20balance";
pub const INVALID_CACHE_PURPOSE: &str = "cw20invalid";

/// Default lifetime of a cached balance snapshot.
pub const DEFAULT_BALANCE_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
/// Default lifetime of the invalid-contract set. Independent of the balance TTL.
pub const DEFAULT_INVALID_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Persisted cache document: `{"ts": <unix millis>, "data": T}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    #[serde(rename = "ts")]
    pub timestamp: i64,
    #[serde(rename = "data")]
    pub payload: T,
}

impl<T> CacheEntry<T> {
    pub fn new(payload: T) -> Self {
        Self {
            timestamp: now_millis(),
            payload,
        }
    }

    /// Valid while `now - timestamp < ttl`.
    pub fn is_fresh_at(&self, ttl: Duration, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.timestamp) < ttl.as_millis() as i64
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.is_fresh_at(ttl, now_millis())
    }
}

/// Composite key `{purpose}:{address}:{network-mode}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub purpose: &'static str,
    pub address: String,
    pub mode: NetworkMode,
}

impl CacheKey {
    pub fn balances(address: &str, mode: NetworkMode) -> Self {
        Self {
            purpose: BALANCE_CACHE_PURPOSE,
            address: address.to_string(),
            mode,
        }
    }

    pub fn invalid(address: &str, mode: NetworkMode) -> Self {
        Self {
            purpose: INVALID_CACHE_PURPOSE,
            address: address.to_string(),
            mode,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.purpose, self.address, self.mode)
    }
}

/// Typed TTL caches over a `KvStore`.
///
/// `get_entry`/`put` are the raw operations: reads never auto-expire and any
/// store or decode failure reads as absent, writes that fail are logged and
/// dropped. The balance and invalid-set helpers apply their own TTL.
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn KvStore>,
    balance_ttl: Duration,
    invalid_ttl: Duration,
}

impl CacheStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_ttls(store, DEFAULT_BALANCE_CACHE_TTL, DEFAULT_INVALID_CACHE_TTL)
    }

    pub fn with_ttls(store: Arc<dyn KvStore>, balance_ttl: Duration, invalid_ttl: Duration) -> Self {
        Self {
            store,
            balance_ttl,
            invalid_ttl,
        }
    }

    pub fn balance_ttl(&self) -> Duration {
        self.balance_ttl
    }

    pub fn invalid_ttl(&self) -> Duration {
        self.invalid_ttl
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub async fn get_entry<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<CacheEntry<T>> {
        if !self.store.is_available() {
            return None;
        }
        let key = key.to_string();
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                debug!("Cache read for {} failed, treating as miss: {:#}", key, e);
                return None;
            }
        };
        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!("Unreadable cache entry {}: {}", key, e);
                None
            }
        }
    }

    pub async fn put<T: Serialize>(&self, key: &CacheKey, payload: &T) {
        if !self.store.is_available() {
            return;
        }
        let key = key.to_string();
        let entry = CacheEntry {
            timestamp: now_millis(),
            payload,
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("⚠️ Failed to encode cache entry {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.set(&key, raw).await {
            warn!("⚠️ Cache write for {} on {} store failed: {:#}", key, self.store.name(), e);
        }
    }

    /// Non-expired balance snapshot for the holder, if any.
    pub async fn fresh_balances(&self, address: &str, mode: NetworkMode) -> Option<BalanceResult> {
        let entry = self
            .get_entry::<BalanceResult>(&CacheKey::balances(address, mode))
            .await
            .filter(|entry| entry.is_fresh(self.balance_ttl));
        match entry {
            Some(entry) => {
                metrics::increment_cache_hit(BALANCE_CACHE_PURPOSE);
                Some(entry.payload)
            }
            None => {
                metrics::increment_cache_miss(BALANCE_CACHE_PURPOSE);
                None
            }
        }
    }

    pub async fn store_balances(&self, address: &str, mode: NetworkMode, balances: &BalanceResult) {
        self.put(&CacheKey::balances(address, mode), balances).await;
    }

    /// Known-invalid contracts; an expired or missing entry reads as empty.
    pub async fn fresh_invalid_set(&self, address: &str, mode: NetworkMode) -> InvalidSet {
        let entry = self
            .get_entry::<InvalidSet>(&CacheKey::invalid(address, mode))
            .await
            .filter(|entry| entry.is_fresh(self.invalid_ttl));
        match entry {
            Some(entry) => {
                metrics::increment_cache_hit(INVALID_CACHE_PURPOSE);
                entry.payload
            }
            None => {
                metrics::increment_cache_miss(INVALID_CACHE_PURPOSE);
                InvalidSet::new()
            }
        }
    }

    pub async fn store_invalid_set(&self, address: &str, mode: NetworkMode, invalid: &InvalidSet) {
        self.put(&CacheKey::invalid(address, mode), invalid).await;
    }
}
