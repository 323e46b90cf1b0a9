//! Lightweight Ethereum JSON-RPC client.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::{LedgerError, Result};

#[derive(Debug, Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug)]
pub struct JsonRpcClient {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(LedgerError::Transport)?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one call. A `null` result deserializes into `R` as JSON null,
    /// so nullable results should use `Option<_>`.
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!(method, id, "json-rpc request");
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(LedgerError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::InvalidResponse(format!(
                "{method}: node answered HTTP {status}"
            )));
        }

        let body: RpcResponse = response.json().await.map_err(LedgerError::Transport)?;
        if let Some(error) = body.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        serde_json::from_value(body.result.unwrap_or(Value::Null)).map_err(|err| {
            LedgerError::InvalidResponse(format!("{method}: unexpected result shape: {err}"))
        })
    }
}

/// Parse a hex quantity such as `"0x1a"`.
pub fn parse_quantity(value: &str) -> Result<u128> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::InvalidResponse(format!("quantity {value:?} lacks 0x")))?;
    if digits.is_empty() {
        return Err(LedgerError::InvalidResponse("empty quantity".into()));
    }
    u128::from_str_radix(digits, 16)
        .map_err(|err| LedgerError::InvalidResponse(format!("quantity {value:?}: {err}")))
}

pub fn parse_quantity_u64(value: &str) -> Result<u64> {
    let wide = parse_quantity(value)?;
    u64::try_from(wide)
        .map_err(|_| LedgerError::InvalidResponse(format!("quantity {value:?} exceeds u64")))
}

/// Render a quantity without leading zeros.
pub fn format_quantity(value: u128) -> String {
    format!("0x{value:x}")
}

/// Decode `0x`-prefixed hex data (`"0x"` alone is empty).
pub fn parse_data(value: &str) -> Result<Vec<u8>> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| LedgerError::InvalidResponse(format!("data {value:?} lacks 0x")))?;
    hex::decode(digits).map_err(|err| LedgerError::InvalidResponse(format!("data: {err}")))
}

pub fn format_data(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert_eq!(parse_quantity_u64("0x539").unwrap(), 1337);
        assert!(parse_quantity("1a").is_err());
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity_u64("0x10000000000000000").is_err());
        assert_eq!(format_quantity(0), "0x0");
        assert_eq!(format_quantity(300_000), "0x493e0");
    }

    #[test]
    fn data() {
        assert_eq!(parse_data("0x").unwrap(), Vec::<u8>::new());
        assert_eq!(parse_data("0x01ff").unwrap(), vec![1, 255]);
        assert!(parse_data("01ff").is_err());
        assert_eq!(format_data(&[0xde, 0xad]), "0xdead");
    }
}
