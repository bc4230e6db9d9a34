//! # Balance Aggregator
//!
//! Entry point of one aggregation cycle for `(address, network mode, registry)`:
//!
//! 1. Empty registry: nothing to fetch, the view is ready and empty.
//! 2. Fresh balance snapshot in the cache: returned as is, no network calls.
//! 3. Primary (batched GraphQL) surface configured: run the `BatchFetcher`. A
//!    non-empty result is cached and returned. An empty one falls through to
//!    the LCD only on Classic, where that path is authoritative; elsewhere the
//!    empty result is returned.
//! 4. No primary surface: straight to the `FallbackFetcher`.
//!
//! Nothing escapes a cycle. Errors and panics are logged and turn into an
//! empty result without any cache write.
//!
//! The last finished result of each address is published through an
//! `ArcSwap` so a UI can poll `view()` while the next cycle runs. A second
//! `aggregate` call for an address whose cycle is still in flight does not
//! start another one; it gets the current view.

use anyhow::{bail, Context, Result};
use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use crate::batch_fetcher::{BatchConfig, BatchFetcher};
use crate::cache::CacheStore;
use crate::chains::ChainConfig;
use crate::fallback_fetcher::FallbackFetcher;
use crate::graph_client::HiveClient;
use crate::kv_store::build_store;
use crate::lcd_client::LcdClient;
use crate::metrics;
use crate::settings::Settings;
use crate::types::{BalanceEntry, BalanceResult, NetworkMode, QueryTarget, Registry};

/// What a caller renders after a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceView {
    /// Registry is non-empty and no result exists yet for this holder.
    pub loading: bool,
    pub whitelist: Registry,
    pub list: Option<Vec<BalanceEntry>>,
}

impl BalanceView {
    pub fn pending(registry: &Registry) -> Self {
        Self {
            loading: !registry.is_empty(),
            whitelist: registry.clone(),
            list: None,
        }
    }

    /// Joins `result` with the registry, in registry order. Ids missing from
    /// the registry are left out.
    pub fn ready(registry: &Registry, result: &BalanceResult) -> Self {
        let list = registry
            .iter()
            .filter_map(|(id, descriptor)| {
                result.get(id).map(|balance| {
                    let mut entry = BalanceEntry::from_descriptor(descriptor, balance.clone());
                    entry.address = id.clone();
                    entry
                })
            })
            .collect();
        Self {
            loading: false,
            whitelist: registry.clone(),
            list: Some(list),
        }
    }
}

/// Last finished result per holder address.
type Snapshots = HashMap<String, Arc<BalanceResult>>;

/// Marks an address as in flight until dropped.
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<String, ()>,
    address: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(in_flight: &'a DashMap<String, ()>, address: &str) -> Option<Self> {
        match in_flight.entry(address.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(());
                metrics::set_cycles_in_flight(in_flight.len());
                Some(Self {
                    in_flight,
                    address: address.to_string(),
                })
            }
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.address);
        metrics::set_cycles_in_flight(self.in_flight.len());
    }
}

pub struct BalanceAggregator {
    mode: NetworkMode,
    cache: CacheStore,
    batch: Option<BatchFetcher>,
    fallback: Option<FallbackFetcher>,
    snapshots: ArcSwap<Snapshots>,
    in_flight: DashMap<String, ()>,
}

impl BalanceAggregator {
    pub fn new(mode: NetworkMode, cache: CacheStore) -> Self {
        Self {
            mode,
            cache,
            batch: None,
            fallback: None,
            snapshots: ArcSwap::from_pointee(Snapshots::new()),
            in_flight: DashMap::new(),
        }
    }

    /// Primary surface. Without one every cycle goes to the fallback path.
    pub fn with_batch(mut self, batch: BatchFetcher) -> Self {
        self.batch = Some(batch);
        self
    }

    /// Fallback surface. It should persist into the same `CacheStore`.
    pub fn with_fallback(mut self, fallback: FallbackFetcher) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Wires the HTTP clients and the configured cache backend for `chain`.
    pub async fn from_settings(settings: &Settings, chain: &ChainConfig) -> Result<Self> {
        let mode = chain.mode();
        let store = build_store(&settings.cache).await;
        let cache = CacheStore::with_ttls(store, settings.cache.balance_ttl(), settings.cache.invalid_ttl());
        let timeout = settings.fetch.request_timeout();

        let mut aggregator = Self::new(mode, cache.clone());
        if let Some(uri) = chain.graph_uri() {
            let client = HiveClient::new(uri, mode, timeout).context("Failed to build GraphQL client")?;
            aggregator = aggregator.with_batch(BatchFetcher::new(Arc::new(client), BatchConfig::from(&settings.fetch)));
        }
        if let Some(lcd) = chain.lcd_uri() {
            let mut client = LcdClient::new(lcd, timeout).context("Failed to build LCD client")?;
            if let Some(qps) = settings.fetch.lcd_qps_limit {
                client = client.with_qps_limit(qps);
            }
            aggregator = aggregator.with_fallback(FallbackFetcher::new(
                Arc::new(client),
                cache,
                settings.fetch.fallback_concurrency,
            ));
        }
        info!(
            "Aggregator for {} ({}): primary={} fallback={}",
            chain.name,
            mode,
            chain.graph_uri().unwrap_or("none"),
            chain.lcd_uri().unwrap_or("none")
        );
        Ok(aggregator)
    }

    pub fn mode(&self) -> NetworkMode {
        self.mode
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn is_in_flight(&self, address: &str) -> bool {
        self.in_flight.contains_key(address)
    }

    /// Current view for `address` without starting a cycle.
    pub fn view(&self, address: &str, registry: &Registry) -> BalanceView {
        if registry.is_empty() {
            return BalanceView::ready(registry, &BalanceResult::new());
        }
        match self.snapshots.load().get(address) {
            Some(result) => BalanceView::ready(registry, result),
            None => BalanceView::pending(registry),
        }
    }

    /// Runs one cycle. Never fails: any error yields an empty list.
    #[tracing::instrument(skip(self, registry), fields(mode = %self.mode, tokens = registry.len()))]
    pub async fn aggregate(&self, address: &str, registry: &Registry) -> BalanceView {
        if registry.is_empty() {
            metrics::increment_aggregation_cycle("empty");
            return BalanceView::ready(registry, &BalanceResult::new());
        }
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, address) else {
            debug!("Cycle for {} already in flight, returning current view", address);
            return self.view(address, registry);
        };

        let cycle_id = uuid::Uuid::new_v4();
        let started = Instant::now();
        let outcome = AssertUnwindSafe(self.run_cycle(address, registry, cycle_id))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok((result, source))) => {
                metrics::increment_aggregation_cycle(source);
                debug!("[{}] {} balance(s) from {}", cycle_id, result.len(), source);
                result
            }
            Ok(Err(e)) => {
                metrics::increment_aggregation_cycle("failed");
                warn!("⚠️ [{}] Aggregation for {} failed: {:#}", cycle_id, address, e);
                BalanceResult::new()
            }
            Err(_) => {
                metrics::increment_aggregation_cycle("failed");
                warn!("🔴 [{}] Aggregation for {} panicked", cycle_id, address);
                BalanceResult::new()
            }
        };
        metrics::record_aggregation_cycle_duration(started.elapsed());

        let view = BalanceView::ready(registry, &result);
        let result = Arc::new(result);
        self.snapshots.rcu(|current| {
            let mut next = Snapshots::clone(current);
            next.insert(address.to_string(), Arc::clone(&result));
            next
        });
        view
    }

    async fn run_cycle(
        &self,
        address: &str,
        registry: &Registry,
        cycle_id: uuid::Uuid,
    ) -> Result<(BalanceResult, &'static str)> {
        if address.trim().is_empty() {
            bail!("Holder address is empty");
        }
        if let Some(cached) = self.cache.fresh_balances(address, self.mode).await {
            debug!("[{}] Balance cache hit for {}", cycle_id, address);
            return Ok((cached, "cache"));
        }

        let invalid = self.cache.fresh_invalid_set(address, self.mode).await;
        let targets: Vec<QueryTarget> = registry
            .keys()
            .map(|id| QueryTarget::balance_of(id.clone(), address))
            .collect();

        if let Some(batch) = &self.batch {
            let result = batch.fetch(&targets).await;
            if !result.is_empty() {
                self.cache.store_balances(address, self.mode, &result).await;
                return Ok((result, "batch"));
            }
            if !self.mode.is_classic() || targets.is_empty() {
                info!("[{}] Primary surface returned no balances for {}", cycle_id, address);
                return Ok((result, "batch"));
            }
            info!("[{}] Primary surface empty on {}, falling back to LCD", cycle_id, self.mode);
        }

        let fallback = self
            .fallback
            .as_ref()
            .context("No query surface configured for this network")?;
        let outcome = fallback.fetch(address, self.mode, &targets, invalid).await;
        Ok((outcome.balances, "fallback"))
    }
}
