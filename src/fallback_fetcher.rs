// Fallback Fetcher - per-contract LCD queries when the batched surface is
// missing or came back empty.
//
// Failures are classified by message text: "no such contract" marks the
// contract invalid (negative cache, time-bounded), anything else is transient
// and the contract is queried again next cycle (the balance snapshot is not
// cached for that run). Both record a "0" balance.

use log::{debug, info, warn};
use std::sync::Arc;

use crate::cache::CacheStore;
use crate::lcd_client::{BalanceQueryClient, LcdError};
use crate::metrics;
use crate::types::conversions::normalize_balance;
use crate::types::{BalanceResult, InvalidSet, NetworkMode, QueryTarget};
use crate::worker_pool::BoundedWorkerPool;

/// Substring the LCD uses when the contract address has no code.
pub const NO_SUCH_CONTRACT: &str = "no such contract";

/// String-based classification; the LCD exposes no structured error code for this.
pub fn is_missing_contract(message: &str) -> bool {
    message.contains(NO_SUCH_CONTRACT)
}

/// Result of one contract lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Balance(String),
    /// Permanent: the contract does not exist.
    MissingContract,
    /// Network, timeout or node error; eligible for retry next cycle.
    Transient(String),
}

impl LookupOutcome {
    pub fn from_error(error: &LcdError) -> Self {
        let message = error.message();
        if is_missing_contract(&message) {
            LookupOutcome::MissingContract
        } else {
            LookupOutcome::Transient(message)
        }
    }

    /// Balance recorded for this cycle; every failure reads as "0".
    pub fn balance(&self) -> String {
        match self {
            LookupOutcome::Balance(balance) => balance.clone(),
            _ => "0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FallbackOutcome {
    pub balances: BalanceResult,
    /// Previously known invalid contracts merged with the ones found this run.
    pub invalid: InvalidSet,
    pub newly_invalid: Vec<String>,
    pub transient_failures: usize,
}

#[derive(Clone)]
pub struct FallbackFetcher {
    client: Arc<dyn BalanceQueryClient>,
    cache: CacheStore,
    max_concurrency: usize,
}

impl FallbackFetcher {
    pub fn new(client: Arc<dyn BalanceQueryClient>, cache: CacheStore, max_concurrency: usize) -> Self {
        Self {
            client,
            cache,
            max_concurrency,
        }
    }

    pub async fn lookup(&self, contract: &str, address: &str) -> LookupOutcome {
        match self.client.get_balance(contract, address).await {
            Ok(response) => {
                let raw = response.balance.unwrap_or_else(|| "0".to_string());
                match normalize_balance(&raw) {
                    Ok(balance) => {
                        metrics::increment_fallback_request("ok");
                        LookupOutcome::Balance(balance)
                    }
                    Err(e) => {
                        metrics::increment_fallback_request("malformed");
                        LookupOutcome::Transient(e.to_string())
                    }
                }
            }
            Err(e) => {
                let outcome = LookupOutcome::from_error(&e);
                match &outcome {
                    LookupOutcome::MissingContract => metrics::increment_fallback_request("missing_contract"),
                    _ => metrics::increment_fallback_request("transient"),
                }
                outcome
            }
        }
    }

    /// Queries every target not in `known_invalid`, then persists the merged
    /// invalid set followed by the balance snapshot. The snapshot is only
    /// written when no lookup failed transiently, so those targets are queried
    /// again on the next cycle.
    pub async fn fetch(
        &self,
        address: &str,
        mode: NetworkMode,
        targets: &[QueryTarget],
        known_invalid: InvalidSet,
    ) -> FallbackOutcome {
        let eligible: Vec<&QueryTarget> = targets
            .iter()
            .filter(|target| !known_invalid.get(&target.id).copied().unwrap_or(false))
            .collect();
        let skipped = targets.len() - eligible.len();
        if skipped > 0 {
            debug!("Fallback: skipping {} contract(s) known to be invalid", skipped);
        }

        let pool = BoundedWorkerPool::new("fallback", self.max_concurrency);
        info!(
            "Fallback fetch: {} contract(s) via LCD, concurrency {}",
            eligible.len(),
            pool.max_concurrency()
        );
        let tasks: Vec<_> = eligible
            .iter()
            .map(|target| async move {
                let outcome = self.lookup(&target.payload.contract, &target.payload.address).await;
                Ok::<_, std::convert::Infallible>((target.id.clone(), outcome))
            })
            .collect();

        let mut outcome = FallbackOutcome {
            invalid: known_invalid,
            ..FallbackOutcome::default()
        };
        for (id, lookup) in pool.run(tasks).await.into_iter().flatten() {
            match &lookup {
                LookupOutcome::MissingContract => {
                    warn!("🔴 Contract {} marked invalid: {}", id, NO_SUCH_CONTRACT);
                    outcome.invalid.insert(id.clone(), true);
                    outcome.newly_invalid.push(id.clone());
                }
                LookupOutcome::Transient(message) => {
                    debug!("Transient LCD failure for {}: {}", id, message);
                    outcome.transient_failures += 1;
                }
                LookupOutcome::Balance(_) => {}
            }
            outcome.balances.insert(id, lookup.balance());
        }

        if !outcome.newly_invalid.is_empty() {
            metrics::increment_invalid_contracts_marked(outcome.newly_invalid.len());
        }
        if outcome.transient_failures > 0 {
            warn!(
                "⚠️ Fallback: {} transient failure(s) recorded as 0, will retry next cycle",
                outcome.transient_failures
            );
        }

        self.cache.store_invalid_set(address, mode, &outcome.invalid).await;
        // A cached snapshot would hide transient failures from the next cycle
        if outcome.transient_failures == 0 {
            self.cache.store_balances(address, mode, &outcome.balances).await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_store::MemoryStore;
    use crate::lcd_client::BalanceResponse;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeLcd {
        answers: HashMap<String, Result<Option<String>, String>>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BalanceQueryClient for FakeLcd {
        async fn get_balance(&self, contract: &str, _address: &str) -> Result<BalanceResponse, LcdError> {
            self.calls.lock().unwrap().push(contract.to_string());
            match self.answers.get(contract) {
                Some(Ok(balance)) => Ok(BalanceResponse {
                    balance: balance.clone(),
                }),
                Some(Err(message)) => Err(LcdError::Api {
                    status: 500,
                    message: message.clone(),
                }),
                None => Err(LcdError::Other("unknown".into())),
            }
        }
    }

    fn fake(answers: &[(&str, Result<Option<&str>, &str>)]) -> Arc<FakeLcd> {
        Arc::new(FakeLcd {
            answers: answers
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Ok(balance) => Ok(balance.as_ref().map(|b| b.to_string())),
                        Err(message) => Err(message.to_string()),
                    };
                    (k.to_string(), v)
                })
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn targets(ids: &[&str]) -> Vec<QueryTarget> {
        ids.iter().map(|id| QueryTarget::balance_of(*id, "terra1holder")).collect()
    }

    #[test]
    fn test_classification() {
        assert!(is_missing_contract(
            "rpc error: code = Unknown desc = no such contract: terra1x: query wasm contract failed"
        ));
        assert!(!is_missing_contract("timeout"));
        let err = LcdError::Api {
            status: 500,
            message: "out of gas".into(),
        };
        assert_eq!(LookupOutcome::from_error(&err), LookupOutcome::Transient("out of gas".into()));
    }

    #[tokio::test]
    async fn test_fetch_classifies_and_persists() {
        let client = fake(&[
            ("A", Ok(Some("100"))),
            ("B", Ok(None)),
            ("C", Err("no such contract: C")),
            ("D", Err("connection reset")),
        ]);
        let store = MemoryStore::new();
        let cache = CacheStore::new(Arc::new(store.clone()));
        let fetcher = FallbackFetcher::new(client.clone(), cache.clone(), 4);

        let outcome = fetcher
            .fetch("terra1holder", NetworkMode::Classic, &targets(&["A", "B", "C", "D"]), InvalidSet::new())
            .await;

        assert_eq!(outcome.balances["A"], "100");
        assert_eq!(outcome.balances["B"], "0");
        assert_eq!(outcome.balances["C"], "0");
        assert_eq!(outcome.balances["D"], "0");
        assert_eq!(outcome.newly_invalid, vec!["C".to_string()]);
        assert_eq!(outcome.transient_failures, 1);

        let invalid = cache.fresh_invalid_set("terra1holder", NetworkMode::Classic).await;
        assert_eq!(invalid.len(), 1);
        assert_eq!(invalid.get("C"), Some(&true));
        // D failed transiently, so no snapshot may shadow the next cycle
        assert!(cache.fresh_balances("terra1holder", NetworkMode::Classic).await.is_none());
        assert!(store.raw("cw20balance:terra1holder:classic").is_none());
    }

    #[tokio::test]
    async fn test_clean_run_caches_balances() {
        let client = fake(&[("A", Ok(Some("3"))), ("C", Err("no such contract"))]);
        let cache = CacheStore::new(Arc::new(MemoryStore::new()));
        let fetcher = FallbackFetcher::new(client, cache.clone(), 4);

        let outcome = fetcher
            .fetch("terra1holder", NetworkMode::Classic, &targets(&["A", "C"]), InvalidSet::new())
            .await;

        assert_eq!(outcome.transient_failures, 0);
        let cached = cache.fresh_balances("terra1holder", NetworkMode::Classic).await.unwrap();
        assert_eq!(cached, outcome.balances);
    }

    #[tokio::test]
    async fn test_expired_invalid_set_no_longer_suppresses_lookups() {
        let client = fake(&[("A", Ok(Some("1"))), ("C", Ok(Some("2")))]);
        let store = MemoryStore::new();
        let cache = CacheStore::new(Arc::new(store.clone()));
        let stale = crate::utils::now_millis() - cache.invalid_ttl().as_millis() as i64 - 1;
        store.insert_raw(
            "cw20invalid:terra1holder:classic",
            format!(r#"{{"ts":{stale},"data":{{"C":true}}}}"#),
        );

        let known = cache.fresh_invalid_set("terra1holder", NetworkMode::Classic).await;
        assert!(known.is_empty());

        let fetcher = FallbackFetcher::new(client.clone(), cache, 4);
        let outcome = fetcher
            .fetch("terra1holder", NetworkMode::Classic, &targets(&["A", "C"]), known)
            .await;

        let mut calls = client.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec!["A".to_string(), "C".to_string()]);
        assert_eq!(outcome.balances["C"], "2");
        assert!(outcome.invalid.is_empty());
    }

    #[tokio::test]
    async fn test_known_invalid_contracts_are_skipped_and_kept() {
        let client = fake(&[("A", Ok(Some("1"))), ("C", Err("no such contract"))]);
        let cache = CacheStore::new(Arc::new(MemoryStore::new()));
        let fetcher = FallbackFetcher::new(client.clone(), cache.clone(), 4);

        let mut known = InvalidSet::new();
        known.insert("C".to_string(), true);
        known.insert("Z".to_string(), true);
        let outcome = fetcher
            .fetch("terra1holder", NetworkMode::Classic, &targets(&["A", "C"]), known)
            .await;

        assert_eq!(*client.calls.lock().unwrap(), vec!["A".to_string()]);
        assert!(!outcome.balances.contains_key("C"));
        // Previously known invalids survive the merge
        assert_eq!(outcome.invalid.len(), 2);
        assert!(outcome.newly_invalid.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_balance_is_transient() {
        let client = fake(&[("A", Ok(Some("12.5")))]);
        let cache = CacheStore::new(Arc::new(MemoryStore::new()));
        let fetcher = FallbackFetcher::new(client, cache, 4);
        let outcome = fetcher.lookup("A", "terra1holder").await;
        assert!(matches!(outcome, LookupOutcome::Transient(_)));
        assert_eq!(outcome.balance(), "0");
    }
}
