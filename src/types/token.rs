use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Static metadata for one CW20 token or contract.
///
/// Owned by the registry provider; the fetchers only read it. `id` is the
/// registry key (contract address or native denom). Asset documents carry it
/// under `token`, contract documents omit it, so registry loading always
/// overwrites it with the map key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDescriptor {
    #[serde(default, alias = "token")]
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

impl TokenDescriptor {
    pub fn new(id: impl Into<String>, symbol: impl Into<String>, protocol: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            protocol: protocol.into(),
            icon: None,
            decimals: None,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = Some(decimals);
        self
    }
}

/// Merged whitelist for one network mode, in registry order.
pub type Registry = IndexMap<String, TokenDescriptor>;

/// Token id -> balance as decimal integer text.
pub type BalanceResult = HashMap<String, String>;

/// Token id -> true for contracts whose lookup failed with "no such contract".
pub type InvalidSet = HashMap<String, bool>;

/// Which Terra network family a cycle runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// Terra Classic (columbus-*): no GraphQL surface, LCD is authoritative.
    Classic,
    /// Terra 2 (phoenix-* and friends).
    Mainnet,
}

impl NetworkMode {
    pub fn from_chain_id(chain_id: &str) -> Self {
        if chain_id.starts_with("columbus") {
            NetworkMode::Classic
        } else {
            NetworkMode::Mainnet
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkMode::Classic => "classic",
            NetworkMode::Mainnet => "mainnet",
        }
    }

    pub fn is_classic(&self) -> bool {
        matches!(self, NetworkMode::Classic)
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a single `balance` smart query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPayload {
    pub contract: String,
    pub address: String,
    pub msg: Value,
}

/// One token to query for one holder during a single cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTarget {
    pub id: String,
    pub payload: QueryPayload,
}

impl QueryTarget {
    pub fn balance_of(id: impl Into<String>, address: impl Into<String>) -> Self {
        let id = id.into();
        let address = address.into();
        Self {
            payload: QueryPayload {
                contract: id.clone(),
                msg: serde_json::json!({ "balance": { "address": address } }),
                address,
            },
            id,
        }
    }
}

/// A registry entry joined with its fetched balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub symbol: String,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
    pub balance: String,
    /// Token id (contract address or denom).
    pub address: String,
}

impl BalanceEntry {
    pub fn from_descriptor(descriptor: &TokenDescriptor, balance: impl Into<String>) -> Self {
        Self {
            symbol: descriptor.symbol.clone(),
            protocol: descriptor.protocol.clone(),
            icon: descriptor.icon.clone(),
            decimals: descriptor.decimals,
            balance: balance.into(),
            address: descriptor.id.clone(),
        }
    }
}
