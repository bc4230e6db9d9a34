//! # Batch Fetcher
//!
//! Runs the primary (batched GraphQL) protocol across all targets:
//!
//! 1. Chunk the targets (`chunk_size`, 49 by default to stay under the
//!    endpoint's 50-field limit).
//! 2. One task per chunk; each task retries its query up to `max_attempts`
//!    times with no backoff. A chunk that fails every attempt contributes an
//!    empty mapping instead of failing the run.
//! 3. Tasks run through a `BoundedWorkerPool` (`max_concurrency`, 3 by default).
//! 4. Per-chunk mappings are merged in chunk order; on overlapping keys the
//!    last merged chunk wins.
//! 5. Raw records are normalized: `null` entries are dropped, then the record
//!    shape is detected and decoded into a balance string.

use log::{debug, info, warn};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

use crate::graph_client::{BatchQueryClient, GraphQueryError, RawBatchResponse};
use crate::metrics;
use crate::settings::FetchSettings;
use crate::types::conversions::{balance_from_value, ConversionError};
use crate::types::{BalanceResult, QueryTarget};
use crate::utils::chunk_items;
use crate::worker_pool::BoundedWorkerPool;

/// One primary record, decoded from whichever shape the endpoint used.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimaryRecord {
    /// Classic mantle: `{"Result": "{\"balance\":\"123\"}", "Height": ...}`.
    Legacy { result: String },
    /// Hive: `{"contractQuery": {"balance": "123"}}`.
    Structured { contract_query: Value },
}

impl PrimaryRecord {
    /// Shape detection by field presence. `None` for null or unknown records.
    pub fn detect(raw: &Value) -> Option<Self> {
        let object = raw.as_object()?;
        if let Some(result) = object.get("Result").and_then(Value::as_str) {
            return Some(PrimaryRecord::Legacy {
                result: result.to_string(),
            });
        }
        match object.get("contractQuery") {
            Some(Value::Null) | None => None,
            Some(contract_query) => Some(PrimaryRecord::Structured {
                contract_query: contract_query.clone(),
            }),
        }
    }

    pub fn balance(&self) -> Result<String, ConversionError> {
        let decoded;
        let body = match self {
            PrimaryRecord::Legacy { result } => {
                decoded = serde_json::from_str::<Value>(result)
                    .map_err(|e| ConversionError::MalformedRecord(e.to_string()))?;
                &decoded
            }
            PrimaryRecord::Structured { contract_query } => contract_query,
        };
        match body {
            Value::Object(fields) => balance_from_value(fields.get("balance").unwrap_or(&Value::Null)),
            other => Err(ConversionError::MalformedRecord(other.to_string())),
        }
    }
}

/// Drops null/unrecognized records and decodes the rest into balances.
pub fn normalize_records(raw: RawBatchResponse) -> BalanceResult {
    let mut balances = BalanceResult::with_capacity(raw.len());
    for (token, value) in raw {
        if value.is_null() {
            continue;
        }
        let Some(record) = PrimaryRecord::detect(&value) else {
            debug!("Unrecognized primary record for {}: {}", token, value);
            continue;
        };
        match record.balance() {
            Ok(balance) => {
                balances.insert(token, balance);
            }
            Err(e) => debug!("Dropping undecodable record for {}: {}", token, e),
        }
    }
    balances
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub chunk_size: usize,
    pub max_attempts: usize,
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from(&FetchSettings::default())
    }
}

impl From<&FetchSettings> for BatchConfig {
    fn from(settings: &FetchSettings) -> Self {
        Self {
            chunk_size: settings.chunk_size,
            max_attempts: settings.max_attempts,
            max_concurrency: settings.batch_concurrency,
        }
    }
}

#[derive(Clone)]
pub struct BatchFetcher {
    client: Arc<dyn BatchQueryClient>,
    config: BatchConfig,
}

impl BatchFetcher {
    pub fn new(client: Arc<dyn BatchQueryClient>, config: BatchConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> BatchConfig {
        self.config
    }

    /// Fetches and normalizes balances for every target.
    pub async fn fetch(&self, targets: &[QueryTarget]) -> BalanceResult {
        normalize_records(self.fetch_raw(targets).await)
    }

    /// Steps 1-4: chunk, query with retries through the pool, merge.
    pub async fn fetch_raw(&self, targets: &[QueryTarget]) -> RawBatchResponse {
        if targets.is_empty() {
            return RawBatchResponse::new();
        }
        let chunks = chunk_items(targets, self.config.chunk_size);
        let pool = BoundedWorkerPool::new("batch", self.config.max_concurrency);
        info!(
            "Batch fetch: {} targets in {} chunk(s), concurrency {}",
            targets.len(),
            chunks.len(),
            pool.max_concurrency()
        );

        let tasks: Vec<_> = chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| async move {
                Ok::<_, std::convert::Infallible>(self.fetch_chunk(index, chunk).await)
            })
            .collect();

        let mut merged = RawBatchResponse::with_capacity(targets.len());
        for data in pool.run(tasks).await.into_iter().flatten() {
            merged.extend(data);
        }
        merged
    }

    async fn fetch_chunk(&self, index: usize, chunk: &[QueryTarget]) -> RawBatchResponse {
        metrics::record_batch_chunk_size(chunk.len());
        let attempt = AtomicUsize::new(0);
        let client = self.client.as_ref();
        let attempt_ref = &attempt;
        // FixedInterval(0) yields immediate retries: attempts - 1 of them
        let strategy = FixedInterval::from_millis(0).take(self.config.max_attempts.saturating_sub(1));

        let outcome: Result<RawBatchResponse, GraphQueryError> = Retry::spawn(strategy, move || async move {
            let n = attempt_ref.fetch_add(1, Ordering::SeqCst) + 1;
            let result = client.query(chunk).await;
            if let Err(e) = &result {
                metrics::increment_batch_attempt_failed(n);
                debug!("Chunk {} attempt {} failed: {}", index, n, e);
            }
            result
        })
        .await;

        match outcome {
            Ok(data) => data,
            Err(e) => {
                metrics::increment_batch_chunk_abandoned();
                warn!(
                    "⚠️ Chunk {} ({} targets) failed after {} attempt(s), skipping: {}",
                    index,
                    chunk.len(),
                    attempt.load(Ordering::SeqCst),
                    e
                );
                RawBatchResponse::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_detect_legacy_shape() {
        let raw = json!({"Height": "1", "Result": "{\"balance\":\"100\"}"});
        let record = PrimaryRecord::detect(&raw).unwrap();
        assert!(matches!(record, PrimaryRecord::Legacy { .. }));
        assert_eq!(record.balance().unwrap(), "100");
    }

    #[test]
    fn test_detect_structured_shape() {
        let raw = json!({"contractQuery": {"balance": "250"}});
        let record = PrimaryRecord::detect(&raw).unwrap();
        assert!(matches!(record, PrimaryRecord::Structured { .. }));
        assert_eq!(record.balance().unwrap(), "250");

        let missing = json!({"contractQuery": {}});
        assert_eq!(PrimaryRecord::detect(&missing).unwrap().balance().unwrap(), "0");
    }

    #[test]
    fn test_normalize_drops_null_and_unknown() {
        let mut raw = RawBatchResponse::new();
        raw.insert("a".into(), json!({"contractQuery": {"balance": "1"}}));
        raw.insert("b".into(), Value::Null);
        raw.insert("c".into(), json!({"contractQuery": null}));
        raw.insert("d".into(), json!({"somethingElse": 1}));
        raw.insert("e".into(), json!({"Result": "not json"}));
        raw.insert("f".into(), json!({"Result": "{\"balance\":\"9\"}"}));
        let balances = normalize_records(raw);
        assert_eq!(balances.len(), 2);
        assert_eq!(balances["a"], "1");
        assert_eq!(balances["f"], "9");
        assert!(!balances.contains_key("b"));
    }

    /// Answers every target with a structured balance, failing chunks that
    /// contain a poisoned id.
    struct FakeGraph {
        poisoned: Option<String>,
        calls: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl BatchQueryClient for FakeGraph {
        async fn query(&self, batch: &[QueryTarget]) -> Result<RawBatchResponse, GraphQueryError> {
            self.calls.lock().unwrap().push(batch.len());
            if let Some(poisoned) = &self.poisoned {
                if batch.iter().any(|t| &t.id == poisoned) {
                    return Err(GraphQueryError::Graphql("boom".into()));
                }
            }
            Ok(batch
                .iter()
                .map(|t| (t.id.clone(), json!({"contractQuery": {"balance": "5"}})))
                .collect())
        }
    }

    fn targets(n: usize) -> Vec<QueryTarget> {
        (0..n)
            .map(|i| QueryTarget::balance_of(format!("terra1token{i:03}"), "terra1holder"))
            .collect()
    }

    #[tokio::test]
    async fn test_chunks_of_49() {
        let client = Arc::new(FakeGraph {
            poisoned: None,
            calls: Mutex::new(Vec::new()),
        });
        let fetcher = BatchFetcher::new(client.clone(), BatchConfig::default());
        let balances = fetcher.fetch(&targets(120)).await;
        assert_eq!(balances.len(), 120);
        let mut sizes = client.calls.lock().unwrap().clone();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![22, 49, 49]);
    }

    #[tokio::test]
    async fn test_failed_chunk_is_retried_then_skipped() {
        let client = Arc::new(FakeGraph {
            poisoned: Some("terra1token050".to_string()),
            calls: Mutex::new(Vec::new()),
        });
        let fetcher = BatchFetcher::new(client.clone(), BatchConfig::default());
        let balances = fetcher.fetch(&targets(120)).await;

        // Second chunk (49..98) failed twice and contributed nothing
        assert_eq!(balances.len(), 71);
        assert!(balances.contains_key("terra1token000"));
        assert!(!balances.contains_key("terra1token050"));
        assert!(balances.contains_key("terra1token119"));
        assert_eq!(client.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_single_attempt_configuration() {
        let client = Arc::new(FakeGraph {
            poisoned: Some("terra1token000".to_string()),
            calls: Mutex::new(Vec::new()),
        });
        let config = BatchConfig {
            max_attempts: 1,
            ..BatchConfig::default()
        };
        let fetcher = BatchFetcher::new(client.clone(), config);
        assert!(fetcher.fetch(&targets(3)).await.is_empty());
        assert_eq!(client.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_targets_skip_network() {
        let client = Arc::new(FakeGraph {
            poisoned: None,
            calls: Mutex::new(Vec::new()),
        });
        let fetcher = BatchFetcher::new(client.clone(), BatchConfig::default());
        assert!(fetcher.fetch_raw(&[]).await.is_empty());
        assert!(client.calls.lock().unwrap().is_empty());
    }
}
