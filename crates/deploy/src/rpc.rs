//! Shared utilities for talking to Ethereum JSON-RPC endpoints.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Default timeout for a single RPC request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure of a single JSON-RPC request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// The request never got a well-formed answer.
    #[error("{method}: {reason}")]
    Transport { method: String, reason: String },

    /// The node answered with a JSON-RPC error object.
    #[error("{method}: RPC error {code}: {message}")]
    Response {
        method: String,
        code: i64,
        message: String,
        /// Revert data or reason attached by the node, if any.
        data: Option<String>,
    },

    /// The result did not have the expected shape.
    #[error("{method}: {reason}")]
    Decode { method: String, reason: String },
}

/// Create an HTTP client configured for JSON-RPC requests.
pub fn create_client(timeout: Duration) -> Result<reqwest::Client, anyhow::Error> {
    use anyhow::Context;

    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to create HTTP client")
}

/// Make a JSON-RPC call and deserialize the result.
///
/// # Arguments
/// * `client` - The HTTP client to use
/// * `url` - The RPC endpoint URL
/// * `method` - The RPC method name
/// * `params` - The method parameters
pub async fn json_rpc_call<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: Vec<Value>,
) -> Result<T, RpcError> {
    let transport = |reason: String| RpcError::Transport {
        method: method.to_string(),
        reason,
    };

    let response = client
        .post(url)
        .json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        }))
        .send()
        .await
        .map_err(|e| transport(format!("failed to send request: {e}")))?;

    let result: Value = response
        .json()
        .await
        .map_err(|e| transport(format!("failed to parse response: {e}")))?;

    if let Some(error) = result.get("error") {
        return Err(RpcError::Response {
            method: method.to_string(),
            code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            data: error.get("data").map(|data| match data {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
        });
    }

    let result_value = result.get("result").cloned().unwrap_or(Value::Null);

    serde_json::from_value(result_value).map_err(|e| RpcError::Decode {
        method: method.to_string(),
        reason: format!("failed to deserialize result: {e}"),
    })
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(value: &str) -> Option<u64> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16).ok()
}
