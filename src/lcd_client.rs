// LCD smart-query client: one contract, one holder, one request.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use log::debug;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

type DefaultDirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Decoded `balance` query answer; a missing balance reads as "0" upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BalanceResponse {
    #[serde(default)]
    pub balance: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SmartQueryResponse {
    #[serde(default)]
    data: Option<BalanceResponse>,
}

#[derive(Debug, Deserialize)]
struct LcdErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Failure of a single LCD query.
///
/// `message()` is the human-readable text the fallback fetcher classifies
/// ("no such contract" and friends): the body's `message` when the node sent
/// one, otherwise the HTTP or transport error text.
#[derive(Debug, thiserror::Error)]
pub enum LcdError {
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("Invalid LCD url: {0}")]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Other(String),
}

impl LcdError {
    pub fn message(&self) -> String {
        match self {
            LcdError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Fallback query surface: one balance per call, errors carry a message.
#[async_trait]
pub trait BalanceQueryClient: Send + Sync {
    async fn get_balance(&self, contract: &str, address: &str) -> Result<BalanceResponse, LcdError>;
}

#[derive(Clone)]
pub struct LcdClient {
    base_url: String,
    client: reqwest::Client,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl LcdClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn with_client(base_url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            limiter: None,
        }
    }

    /// Caps requests per second across every worker sharing this client.
    pub fn with_qps_limit(mut self, qps: u32) -> Self {
        if let Some(qps) = NonZeroU32::new(qps) {
            self.limiter = Some(Arc::new(RateLimiter::direct(Quota::per_second(qps))));
        }
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `{lcd}/cosmwasm/wasm/v1/contract/{contract}/smart/{base64(query)}`
    pub fn smart_query_url(&self, contract: &str, address: &str) -> Result<url::Url, LcdError> {
        let query = serde_json::json!({ "balance": { "address": address } });
        let encoded = STANDARD.encode(query.to_string());
        let raw = format!(
            "{}/cosmwasm/wasm/v1/contract/{}/smart/{}",
            self.base_url, contract, encoded
        );
        Ok(url::Url::parse(&raw)?)
    }
}

#[async_trait]
impl BalanceQueryClient for LcdClient {
    async fn get_balance(&self, contract: &str, address: &str) -> Result<BalanceResponse, LcdError> {
        let url = self.smart_query_url(contract, address)?;
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status.is_success() {
            let body: SmartQueryResponse = response.json().await?;
            return Ok(body.data.unwrap_or_default());
        }

        let text = response.text().await.unwrap_or_default();
        debug!("LCD query for {} failed with {}: {}", contract, status, text);
        Err(LcdError::Api {
            status: status.as_u16(),
            message: error_message(status, &text),
        })
    }
}

fn error_message(status: reqwest::StatusCode, body: &str) -> String {
    serde_json::from_str::<LcdErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("Request failed with status code {}", status.as_u16()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_smart_query_url() {
        let client = LcdClient::with_client("https://lcd.example/", reqwest::Client::new());
        let url = client.smart_query_url("terra1contract", "terra1holder").unwrap();
        let expected_query = STANDARD.encode(r#"{"balance":{"address":"terra1holder"}}"#);
        assert_eq!(
            url.as_str(),
            format!("https://lcd.example/cosmwasm/wasm/v1/contract/terra1contract/smart/{expected_query}")
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let client = LcdClient::with_client("not a url", reqwest::Client::new());
        assert!(matches!(client.smart_query_url("c", "a"), Err(LcdError::Url(_))));
    }

    #[test]
    fn test_error_message_prefers_body() {
        let body = r#"{"code":2,"message":"rpc error: code = Unknown desc = no such contract: query wasm contract failed","details":[]}"#;
        let message = error_message(StatusCode::INTERNAL_SERVER_ERROR, body);
        assert!(message.contains("no such contract"));

        let message = error_message(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>");
        assert_eq!(message, "Request failed with status code 502");
    }

    #[test]
    fn test_lcd_error_message() {
        let err = LcdError::Api {
            status: 500,
            message: "no such contract".to_string(),
        };
        assert_eq!(err.message(), "no such contract");
        assert_eq!(LcdError::Other("timeout".into()).message(), "timeout");
    }

    #[test]
    fn test_smart_query_response_decoding() {
        let body: SmartQueryResponse = serde_json::from_str(r#"{"data":{"balance":"123"}}"#).unwrap();
        assert_eq!(body.data.unwrap().balance.as_deref(), Some("123"));
        let body: SmartQueryResponse = serde_json::from_str(r#"{"data":{}}"#).unwrap();
        assert_eq!(body.data.unwrap().balance, None);
    }
}
