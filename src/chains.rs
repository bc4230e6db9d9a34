//! Chain configuration: which query surfaces exist for a network.

use crate::types::NetworkMode;
use anyhow::Context;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One entry of the public `chains.json` document (fields we use).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainConfig {
    pub name: String,
    #[serde(rename = "chainID", alias = "chain_id", alias = "chainid")]
    pub chain_id: String,
    pub lcd: String,
    #[serde(default)]
    pub mantle: Option<String>,
    #[serde(default)]
    pub hive: Option<String>,
}

impl ChainConfig {
    pub fn mode(&self) -> NetworkMode {
        NetworkMode::from_chain_id(&self.chain_id)
    }

    /// Batched GraphQL endpoint. Classic has none, so it always goes to the LCD.
    pub fn graph_uri(&self) -> Option<&str> {
        if self.mode().is_classic() {
            return None;
        }
        self.hive
            .as_deref()
            .or(self.mantle.as_deref())
            .filter(|uri| !uri.trim().is_empty())
    }

    pub fn lcd_uri(&self) -> Option<&str> {
        Some(self.lcd.as_str()).filter(|uri| !uri.trim().is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("Chain is not defined (requested {0:?}, no 'classic' default)")]
    NotDefined(Option<String>),
}

/// Matches `network` against chain name or chain id, defaulting to `classic`.
pub fn select_chain<'a>(chains: &'a [ChainConfig], network: Option<&str>) -> Result<&'a ChainConfig, ChainError> {
    network
        .and_then(|network| {
            chains
                .iter()
                .find(|chain| chain.name == network || chain.chain_id == network)
        })
        .or_else(|| chains.iter().find(|chain| chain.name == "classic"))
        .ok_or_else(|| ChainError::NotDefined(network.map(str::to_string)))
}

/// Loads `chains.json` (name -> chain) and applies the public mainnet LCD override.
pub async fn fetch_chains(
    client: &reqwest::Client,
    url: &str,
    mainnet_lcd_override: Option<&str>,
) -> anyhow::Result<Vec<ChainConfig>> {
    let doc: HashMap<String, ChainConfig> = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {url}"))?
        .error_for_status()?
        .json()
        .await
        .context("Failed to decode chains document")?;
    debug!("Loaded {} chains from {}", doc.len(), url);
    Ok(apply_lcd_override(doc.into_values().collect(), mainnet_lcd_override))
}

fn apply_lcd_override(mut chains: Vec<ChainConfig>, mainnet_lcd_override: Option<&str>) -> Vec<ChainConfig> {
    if let Some(lcd) = mainnet_lcd_override {
        for chain in chains.iter_mut().filter(|chain| chain.name == "mainnet") {
            chain.lcd = lcd.to_string();
        }
    }
    chains.sort_by(|a, b| a.name.cmp(&b.name));
    chains
}
