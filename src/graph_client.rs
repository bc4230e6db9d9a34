//! # Batched GraphQL query client
//!
//! Sends one GraphQL document per chunk with one aliased field per target.
//! Aliases are positional (`t0`, `t1`, ...) so token ids that are not valid
//! GraphQL names (IBC denoms, ids with dashes) are still safe; the client maps
//! aliases back to token ids before returning.
//!
//! Two document shapes exist:
//!
//! - **Classic** (mantle): `WasmContractsContractAddressStore { Height Result }`,
//!   where `Result` is a JSON-encoded string.
//! - **Mainnet** (hive): `wasm { contractQuery(...) }`, a structured object.
//!
//! Decoding of the two shapes happens in `batch_fetcher`; this client returns
//! the raw per-target JSON.

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::types::{NetworkMode, QueryTarget};

/// Token id -> raw record (possibly `null`) as returned by the endpoint.
pub type RawBatchResponse = HashMap<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum GraphQueryError {
    #[error("GraphQL error: {0}")]
    Graphql(String),
    #[error("No data in GraphQL response")]
    MissingData,
    #[error("Got response with status code `{0}`")]
    Status(u16),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
}

/// Primary query surface: many targets per call, errors unclassified.
#[async_trait]
pub trait BatchQueryClient: Send + Sync {
    async fn query(&self, batch: &[QueryTarget]) -> Result<RawBatchResponse, GraphQueryError>;
}

#[derive(Debug, Deserialize)]
struct GraphQLError {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct GraphQLResponse {
    #[serde(default)]
    data: Option<HashMap<String, Value>>,
    #[serde(default)]
    errors: Vec<GraphQLError>,
}

/// Reqwest-backed client for hive (mainnet) and mantle (classic) endpoints.
#[derive(Clone)]
pub struct HiveClient {
    endpoint: String,
    mode: NetworkMode,
    client: reqwest::Client,
}

impl HiveClient {
    pub fn new(endpoint: impl Into<String>, mode: NetworkMode, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(endpoint, mode, client))
    }

    pub fn with_client(endpoint: impl Into<String>, mode: NetworkMode, client: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            mode,
            client,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BatchQueryClient for HiveClient {
    async fn query(&self, batch: &[QueryTarget]) -> Result<RawBatchResponse, GraphQueryError> {
        if batch.is_empty() {
            return Ok(RawBatchResponse::new());
        }
        let document = build_batch_document(batch, self.mode);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "query": document }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GraphQueryError::Status(status.as_u16()));
        }
        let body: GraphQLResponse = response.json().await?;
        unalias_response(batch, body)
    }
}

/// Alias used for the target at `index` within its chunk.
pub fn alias_for(index: usize) -> String {
    format!("t{index}")
}

/// Builds the GraphQL document for one chunk.
pub fn build_batch_document(batch: &[QueryTarget], mode: NetworkMode) -> String {
    let fields: Vec<String> = batch
        .iter()
        .enumerate()
        .map(|(index, target)| {
            let alias = alias_for(index);
            let contract = Value::String(target.payload.contract.clone());
            match mode {
                NetworkMode::Classic => format!(
                    "{alias}: WasmContractsContractAddressStore(ContractAddress: {contract}, QueryMsg: {msg}) {{ Height Result }}",
                    msg = Value::String(target.payload.msg.to_string()),
                ),
                NetworkMode::Mainnet => format!(
                    "{alias}: wasm {{ contractQuery(contractAddress: {contract}, query: {msg}) }}",
                    msg = graphql_literal(&target.payload.msg),
                ),
            }
        })
        .collect();
    format!("query {{\n  {}\n}}", fields.join("\n  "))
}

/// Renders JSON as a GraphQL input literal (object keys unquoted).
pub fn graphql_literal(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let fields: Vec<String> = map
                .iter()
                .map(|(key, value)| format!("{key}: {}", graphql_literal(value)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(graphql_literal).collect();
            format!("[{}]", items.join(", "))
        }
        // JSON string escaping is valid GraphQL string escaping
        other => other.to_string(),
    }
}

fn unalias_response(batch: &[QueryTarget], body: GraphQLResponse) -> Result<RawBatchResponse, GraphQueryError> {
    let Some(mut data) = body.data else {
        return Err(match body.errors.into_iter().next() {
            Some(error) => GraphQueryError::Graphql(error.message),
            None => GraphQueryError::MissingData,
        });
    };
    if !body.errors.is_empty() {
        // Field-level errors are ignored, the rest of the document still counts
        debug!(
            "GraphQL response carried {} field error(s), first: {}",
            body.errors.len(),
            body.errors[0].message
        );
    }

    let mut out = RawBatchResponse::with_capacity(batch.len());
    for (index, target) in batch.iter().enumerate() {
        if let Some(value) = data.remove(&alias_for(index)) {
            out.insert(target.id.clone(), value);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch() -> Vec<QueryTarget> {
        vec![
            QueryTarget::balance_of("terra1aaa", "terra1holder"),
            QueryTarget::balance_of("terra1bbb", "terra1holder"),
        ]
    }

    #[test]
    fn test_mainnet_document() {
        let doc = build_batch_document(&batch(), NetworkMode::Mainnet);
        assert!(doc.contains(
            r#"t0: wasm { contractQuery(contractAddress: "terra1aaa", query: {balance: {address: "terra1holder"}}) }"#
        ));
        assert!(doc.contains(r#"t1: wasm { contractQuery(contractAddress: "terra1bbb""#));
        assert!(doc.starts_with("query {"));
    }

    #[test]
    fn test_classic_document_escapes_query_msg() {
        let doc = build_batch_document(&batch()[..1], NetworkMode::Classic);
        assert!(doc.contains(
            r#"t0: WasmContractsContractAddressStore(ContractAddress: "terra1aaa", QueryMsg: "{\"balance\":{\"address\":\"terra1holder\"}}") { Height Result }"#
        ));
    }

    #[test]
    fn test_graphql_literal() {
        let value = json!({"a": [1, true, null], "b": "x\"y"});
        assert_eq!(graphql_literal(&value), r#"{a: [1, true, null], b: "x\"y"}"#);
    }

    #[test]
    fn test_unalias_maps_back_to_token_ids() {
        let body: GraphQLResponse = serde_json::from_value(json!({
            "data": {
                "t0": {"contractQuery": {"balance": "7"}},
                "t1": null
            }
        }))
        .unwrap();
        let raw = unalias_response(&batch(), body).unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw["terra1aaa"], json!({"contractQuery": {"balance": "7"}}));
        assert!(raw["terra1bbb"].is_null());
    }

    #[test]
    fn test_errors_without_data_fail() {
        let body: GraphQLResponse = serde_json::from_value(json!({
            "errors": [{"message": "rate limited"}]
        }))
        .unwrap();
        match unalias_response(&batch(), body) {
            Err(GraphQueryError::Graphql(msg)) => assert_eq!(msg, "rate limited"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_partial_errors_are_ignored() {
        let body: GraphQLResponse = serde_json::from_value(json!({
            "data": {"t1": {"contractQuery": {"balance": "1"}}},
            "errors": [{"message": "contract not found"}]
        }))
        .unwrap();
        let raw = unalias_response(&batch(), body).unwrap();
        assert_eq!(raw.len(), 1);
        assert!(raw.contains_key("terra1bbb"));
    }
}
