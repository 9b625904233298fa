//! Raw JSON-RPC transport. Ported from `services/blockchain.py`'s
//! `_rpc_call`/`indexer/usdc_transfers.py`'s `_rpc_call` — same
//! request shape (`{"jsonrpc":"2.0","id":1,"method":...,"params":...}`),
//! just over `reqwest` instead of `urllib`.

use serde_json::{json, Value};
use synod_core::Error;
use std::time::Duration;

pub struct RpcTransport {
    http: reqwest::Client,
    rpc_url: String,
}

impl RpcTransport {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(15)).build().expect("build reqwest client");
        Self { http, rpc_url: rpc_url.into() }
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let response = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|err| Error::ChainTx(format!("rpc_request_failed:{method}:{err}")))?;

        let parsed: Value = response.json().await.map_err(|_| Error::ChainTx(format!("rpc_response_not_json:{method}")))?;

        if parsed.get("error").is_some_and(|err| !err.is_null()) {
            return Err(Error::ChainTx(format!("rpc_error:{method}")));
        }

        Ok(parsed.get("result").cloned().unwrap_or(Value::Null))
    }

    pub async fn call_hex_int(&self, method: &str, params: Value) -> Result<i64, Error> {
        let result = self.call(method, params).await?;
        let hex_str = result.as_str().ok_or_else(|| Error::ChainTx(format!("rpc_bad_result:{method}")))?;
        parse_hex_int(hex_str)
    }
}

pub fn parse_hex_int(value: &str) -> Result<i64, Error> {
    let stripped = value.strip_prefix("0x").ok_or_else(|| Error::ChainTx("expected_0x_prefixed_hex".to_string()))?;
    i64::from_str_radix(stripped, 16).map_err(|_| Error::ChainTx("invalid_hex_int".to_string()))
}

pub fn hex_int(value: i64) -> String {
    format!("0x{value:x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_ints() {
        assert_eq!(parse_hex_int("0xff").unwrap(), 255);
        assert!(parse_hex_int("ff").is_err());
    }

    #[test]
    fn formats_hex_ints() {
        assert_eq!(hex_int(255), "0xff");
    }
}
