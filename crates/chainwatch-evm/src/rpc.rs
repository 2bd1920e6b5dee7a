//! HTTP JSON-RPC [`ChainClient`] backed by `reqwest`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use chainwatch_core::WatchError;

use crate::client::{parse_hex_u64, ChainClient, LogFilter, RawLog};

/// JSON-RPC error code nodes use for "limit exceeded".
pub const LIMIT_EXCEEDED: i64 = -32005;

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Vec<Value>,
    id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

/// Map a JSON-RPC error object to the pipeline's error taxonomy.
pub fn classify_rpc_error(method: &str, err: &JsonRpcError) -> WatchError {
    if err.code == LIMIT_EXCEEDED {
        WatchError::RateLimited(format!("{method}: {err}"))
    } else {
        WatchError::Provider(format!("{method}: {err}"))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Ethereum mainnet endpoint on Infura for `api_key`.
pub fn infura_mainnet_url(api_key: &str) -> String {
    format!("https://mainnet.infura.io/v3/{api_key}")
}

pub struct HttpChainClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpChainClient {
    pub fn new(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, WatchError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| WatchError::Provider(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    /// Issue one JSON-RPC call and return its `result`.
    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, WatchError> {
        let req = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| WatchError::Provider(format!("{method}: {e}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(WatchError::RateLimited(format!("{method}: HTTP 429")));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WatchError::Provider(format!(
                "{method}: HTTP {}: {body}",
                status.as_u16()
            )));
        }

        let body: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| WatchError::Provider(format!("{method}: invalid response: {e}")))?;
        if let Some(err) = body.error {
            return Err(classify_rpc_error(method, &err));
        }
        Ok(body.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn block_number(&self) -> Result<u64, WatchError> {
        let result = self.call("eth_blockNumber", vec![]).await?;
        result
            .as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| WatchError::Provider(format!("eth_blockNumber: unexpected result {result}")))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, WatchError> {
        let result = self.call("eth_getLogs", vec![filter.to_param()]).await?;
        serde_json::from_value(result)
            .map_err(|e| WatchError::Provider(format!("eth_getLogs: malformed logs: {e}")))
    }
}
