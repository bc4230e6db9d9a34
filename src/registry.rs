//! # Token registry provider
//!
//! Loads the CW20 whitelist (`cw20/tokens.json`) and the contract list
//! (`cw20/contracts.json`) from the public assets host and merges them into
//! one `Registry` per chain. Both documents are keyed by chain name or chain
//! id at the top level.
//!
//! Classic only ever uses the whitelist. Mainnet lists every known contract
//! and lets whitelist entries override them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use indexmap::IndexMap;
use log::{debug, info};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::chains::ChainConfig;
use crate::types::{NetworkMode, Registry, TokenDescriptor};

/// Top-level assets document: chain key -> per-chain entries.
pub type AssetsDocument<T> = IndexMap<String, IndexMap<String, T>>;

/// Entry of `cw20/contracts.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ContractInfo {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
}

#[async_trait]
pub trait TokenRegistry: Send + Sync {
    /// Merged registry for `chain`. May be empty.
    async fn registry(&self, chain: &ChainConfig) -> Result<Registry>;
}

/// Picks the per-chain section of an assets document.
///
/// Exact name, exact chain id, case-insensitive match on either, then the
/// first present of the well-known network keys.
pub fn pick_chain_assets<'a, T>(
    doc: &'a IndexMap<String, T>,
    name: &str,
    chain_id: &str,
) -> Option<&'a T> {
    if let Some(found) = doc.get(name).or_else(|| doc.get(chain_id)) {
        return Some(found);
    }
    let lowered_name = name.to_lowercase();
    let lowered_chain = chain_id.to_lowercase();
    if let Some((_, found)) = doc.iter().find(|(key, _)| {
        let key = key.to_lowercase();
        key == lowered_name || key == lowered_chain
    }) {
        return Some(found);
    }
    ["classic", "columbus-5", "mainnet", "phoenix-1"]
        .iter()
        .find_map(|key| doc.get(*key))
}

/// Builds the registry for `mode` from the picked whitelist and contract sections.
pub fn merge_whitelist(
    mode: NetworkMode,
    whitelist: Option<&IndexMap<String, TokenDescriptor>>,
    contracts: Option<&IndexMap<String, ContractInfo>>,
) -> Registry {
    let mut registry = Registry::new();

    if !mode.is_classic() {
        for (address, contract) in contracts.into_iter().flatten() {
            let symbol = contract
                .name
                .clone()
                .or_else(|| contract.protocol.clone())
                .unwrap_or_else(|| address.clone());
            let protocol = contract.protocol.clone().unwrap_or_else(|| "contract".to_string());
            let mut descriptor = TokenDescriptor::new(address.clone(), symbol, protocol);
            descriptor.icon = contract.icon.clone();
            registry.insert(address.clone(), descriptor);
        }
    }

    for (id, descriptor) in whitelist.into_iter().flatten() {
        let mut descriptor = descriptor.clone();
        descriptor.id = id.clone();
        registry.insert(id.clone(), descriptor);
    }
    registry
}

/// Reads registries from the public assets host, memoized per chain.
pub struct AssetsRegistry {
    base_url: String,
    client: reqwest::Client,
    loaded: DashMap<String, Registry>,
}

impl AssetsRegistry {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            loaded: DashMap::new(),
        }
    }

    /// Drops memoized registries so the next call refetches.
    pub fn invalidate(&self) {
        self.loaded.clear();
    }

    async fn fetch_document<T: DeserializeOwned>(&self, path: &str) -> Result<AssetsDocument<T>> {
        let url = format!("{}/{}", self.base_url, path);
        let doc = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {url}"))?
            .error_for_status()
            .with_context(|| format!("Assets host rejected {url}"))?
            .json::<AssetsDocument<T>>()
            .await
            .with_context(|| format!("Failed to decode {url}"))?;
        debug!("Loaded {} chain section(s) from {}", doc.len(), url);
        Ok(doc)
    }
}

#[async_trait]
impl TokenRegistry for AssetsRegistry {
    async fn registry(&self, chain: &ChainConfig) -> Result<Registry> {
        if let Some(registry) = self.loaded.get(&chain.name) {
            return Ok(registry.clone());
        }

        let mode = chain.mode();
        let whitelist = self.fetch_document::<TokenDescriptor>("cw20/tokens.json").await?;
        let contracts = if mode.is_classic() {
            AssetsDocument::<ContractInfo>::new()
        } else {
            self.fetch_document::<ContractInfo>("cw20/contracts.json").await?
        };

        let registry = merge_whitelist(
            mode,
            pick_chain_assets(&whitelist, &chain.name, &chain.chain_id),
            pick_chain_assets(&contracts, &chain.name, &chain.chain_id),
        );
        info!("📋 Token registry for {} ({}): {} token(s)", chain.name, mode, registry.len());
        self.loaded.insert(chain.name.clone(), registry.clone());
        Ok(registry)
    }
}

/// Fixed registries per network mode.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistry {
    registries: HashMap<NetworkMode, Registry>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, mode: NetworkMode, registry: Registry) -> Self {
        self.registries.insert(mode, registry);
        self
    }
}

#[async_trait]
impl TokenRegistry for StaticRegistry {
    async fn registry(&self, chain: &ChainConfig) -> Result<Registry> {
        Ok(self.registries.get(&chain.mode()).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn whitelist_doc() -> AssetsDocument<TokenDescriptor> {
        serde_json::from_str(
            r#"{
                "classic": {
                    "terra1mir": {"protocol": "Mirror", "symbol": "MIR", "token": "terra1mir", "icon": "https://x/mir.png"}
                },
                "mainnet": {
                    "terra1astro": {"protocol": "Astroport", "symbol": "ASTRO", "token": "terra1astro", "decimals": 6}
                }
            }"#,
        )
        .unwrap()
    }

    fn contracts_doc() -> AssetsDocument<ContractInfo> {
        serde_json::from_str(
            r#"{
                "mainnet": {
                    "terra1pair": {"protocol": "Astroport", "name": "ASTRO-LUNA pair"},
                    "terra1anon": {},
                    "terra1astro": {"protocol": "Astroport", "name": "Astroport token"}
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_pick_chain_assets_order() {
        let doc = whitelist_doc();
        assert!(pick_chain_assets(&doc, "mainnet", "phoenix-1").unwrap().contains_key("terra1astro"));
        assert!(pick_chain_assets(&doc, "MAINNET", "x").unwrap().contains_key("terra1astro"));
        // Unknown chain falls back to the first well-known key present
        assert!(pick_chain_assets(&doc, "localterra", "localterra").unwrap().contains_key("terra1mir"));

        let mut by_id = IndexMap::new();
        by_id.insert("phoenix-1".to_string(), 1);
        assert_eq!(pick_chain_assets(&by_id, "mainnet", "phoenix-1"), Some(&1));
        assert_eq!(pick_chain_assets(&IndexMap::<String, u8>::new(), "a", "b"), None);
    }

    #[test]
    fn test_merge_classic_uses_whitelist_only() {
        let whitelist = whitelist_doc();
        let contracts = contracts_doc();
        let registry = merge_whitelist(
            NetworkMode::Classic,
            whitelist.get("classic"),
            contracts.get("mainnet"),
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry["terra1mir"].id, "terra1mir");
        assert_eq!(registry["terra1mir"].icon.as_deref(), Some("https://x/mir.png"));
    }

    #[test]
    fn test_merge_mainnet_layers_whitelist_over_contracts() {
        let whitelist = whitelist_doc();
        let contracts = contracts_doc();
        let registry = merge_whitelist(
            NetworkMode::Mainnet,
            whitelist.get("mainnet"),
            contracts.get("mainnet"),
        );
        assert_eq!(registry.len(), 3);
        assert_eq!(registry["terra1pair"].symbol, "ASTRO-LUNA pair");
        assert_eq!(registry["terra1anon"].symbol, "terra1anon");
        assert_eq!(registry["terra1anon"].protocol, "contract");
        // Whitelist wins and keeps the contract's position
        assert_eq!(registry["terra1astro"].symbol, "ASTRO");
        assert_eq!(registry["terra1astro"].decimals, Some(6));
        let order: Vec<&str> = registry.keys().map(String::as_str).collect();
        assert_eq!(order, vec!["terra1pair", "terra1anon", "terra1astro"]);
    }

    #[tokio::test]
    async fn test_static_registry_by_mode() {
        let mut registry = Registry::new();
        registry.insert("terra1a".into(), TokenDescriptor::new("terra1a", "A", "P"));
        let provider = StaticRegistry::new().with(NetworkMode::Classic, registry);

        let classic: ChainConfig = serde_json::from_str(r#"{"name":"classic","chainID":"columbus-5","lcd":"x"}"#).unwrap();
        let mainnet: ChainConfig = serde_json::from_str(r#"{"name":"mainnet","chainID":"phoenix-1","lcd":"x"}"#).unwrap();
        assert_eq!(provider.registry(&classic).await.unwrap().len(), 1);
        assert!(provider.registry(&mainnet).await.unwrap().is_empty());
    }
}
