//! # Terra Balance SDK
//!
//! Multi-source CW20 balance aggregation for Terra Classic and Terra mainnet.
//! Given a holder address and a token registry, the SDK returns one coherent
//! balance snapshot per cycle, preferring a batched GraphQL surface and
//! falling back to per-contract LCD queries.
//!
//! ## Overview
//!
//! - **Batching**: targets are chunked (49 per request) and fetched through a
//!   bounded worker pool with per-chunk retries
//! - **Fallback**: per-contract LCD smart queries with "no such contract"
//!   detection and a time-bounded negative cache
//! - **Caching**: balance snapshots and invalid-contract sets with separate TTLs
//!   over a pluggable key/value store (memory, file, Redis)
//! - **Aggregation**: one entry point that never fails, returning
//!   `{loading, whitelist, list}`
//!
//! ## Architecture
//!
//! ### Query Layer
//! `graph_client` (batched GraphQL, two record shapes) and `lcd_client`
//! (single smart query, message-bearing errors).
//!
//! ### Fetch Layer
//! `batch_fetcher` and `fallback_fetcher`, both running on `worker_pool`.
//!
//! ### Cache Layer
//! `cache` (typed TTL entries) over `kv_store` (persistence backends).
//!
//! ### Orchestration
//! `aggregator` decides per cycle which path runs; `registry` and `chains`
//! provide its inputs.

// Core Types
/// Tokens, targets, balances and network modes
pub mod types;

// Query Layer
/// Batched GraphQL client (hive / mantle)
pub mod graph_client;
/// LCD smart-query client
pub mod lcd_client;

// Fetch Layer
/// Bounded concurrency with index claiming
pub mod worker_pool;
/// Primary path: chunked, retried GraphQL batches
pub mod batch_fetcher;
/// Secondary path: per-contract LCD queries
pub mod fallback_fetcher;

// Cache Layer
/// Typed TTL caches for balances and invalid contracts
pub mod cache;
/// Key/value persistence backends
pub mod kv_store;

// Orchestration
/// Cycle entry point
pub mod aggregator;
/// Chain selection
pub mod chains;
/// Token registry loading and merging
pub mod registry;

// Infrastructure
/// Metrics and observability
pub mod metrics;
/// Configuration
pub mod settings;
/// Shared helpers
pub mod utils;

pub use aggregator::{BalanceAggregator, BalanceView};
pub use batch_fetcher::{BatchConfig, BatchFetcher};
pub use cache::CacheStore;
pub use fallback_fetcher::FallbackFetcher;
pub use settings::Settings;
pub use types::{BalanceEntry, BalanceResult, NetworkMode, Registry, TokenDescriptor};
