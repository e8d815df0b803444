//! JSON-RPC 2.0 bridge to an external signer/node adapter.
//!
//! The adapter owns keys and ABI encoding and exposes three methods:
//! `cb_chainId`, `cb_call` and `cb_sendTransaction`. A JSON-RPC error with
//! code 3 is an execution revert; any other error object is an invalid
//! response.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use super::{CallRequest, Provider, ProviderError, Receipt, TxRequest};

const REVERT_CODE: i64 = 3;

pub struct RpcProvider {
  url: String,
  client: reqwest::Client,
  next_id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse {
  #[serde(default)]
  result: Option<Value>,
  #[serde(default)]
  error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
  code: i64,
  message: String,
  #[serde(default)]
  data: Option<Value>,
}

impl RpcProvider {
  pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ProviderError::Network(e.to_string()))?;
    Ok(Self {
      url: url.into(),
      client,
      next_id: AtomicU64::new(1),
    })
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ProviderError> {
    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
    let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
    debug!(method, id, url = %self.url, "rpc request");

    let response = self.client.post(&self.url).json(&body).send().await.map_err(map_transport)?;
    let status = response.status();
    if !status.is_success() {
      return Err(ProviderError::Network(format!("{} returned HTTP {}", self.url, status)));
    }

    let response: RpcResponse = response
      .json()
      .await
      .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

    if let Some(error) = response.error {
      if error.code == REVERT_CODE {
        let reason = match error.data {
          Some(Value::String(data)) if !data.is_empty() => data,
          _ => error.message,
        };
        return Err(ProviderError::Revert { reason });
      }
      return Err(ProviderError::InvalidResponse(format!(
        "rpc error {}: {}",
        error.code, error.message
      )));
    }

    let result = response
      .result
      .ok_or_else(|| ProviderError::InvalidResponse(format!("{} returned neither result nor error", method)))?;
    serde_json::from_value(result).map_err(|e| ProviderError::InvalidResponse(format!("{}: {}", method, e)))
  }
}

fn map_transport(err: reqwest::Error) -> ProviderError {
  if err.is_timeout() {
    ProviderError::Timeout(err.to_string())
  } else {
    ProviderError::Network(err.to_string())
  }
}

fn parse_chain_id(value: &Value) -> Result<u64, ProviderError> {
  match value {
    Value::Number(n) => n.as_u64(),
    Value::String(s) => match s.strip_prefix("0x") {
      Some(hex) => u64::from_str_radix(hex, 16).ok(),
      None => s.parse().ok(),
    },
    _ => None,
  }
  .ok_or_else(|| ProviderError::InvalidResponse(format!("invalid chain id {}", value)))
}

#[async_trait]
impl Provider for RpcProvider {
  async fn chain_id(&self) -> Result<u64, ProviderError> {
    let value: Value = self.request("cb_chainId", json!([])).await?;
    parse_chain_id(&value)
  }

  async fn call(&self, request: &CallRequest) -> Result<Value, ProviderError> {
    self.request("cb_call", json!([request])).await
  }

  async fn send_transaction(&self, request: &TxRequest) -> Result<Receipt, ProviderError> {
    self.request("cb_sendTransaction", json!([request])).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mockito::Matcher;

  fn provider(server: &mockito::ServerGuard) -> RpcProvider {
    RpcProvider::new(server.url(), Duration::from_secs(5)).unwrap()
  }

  #[tokio::test]
  async fn chain_id_accepts_hex_and_numbers() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("POST", "/")
      .match_body(Matcher::PartialJson(json!({ "method": "cb_chainId" })))
      .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0xa"}"#)
      .create_async()
      .await;

    assert_eq!(provider(&server).chain_id().await.unwrap(), 10);
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn send_transaction_decodes_receipt() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/")
      .match_body(Matcher::PartialJson(json!({ "method": "cb_sendTransaction" })))
      .with_body(
        r#"{"jsonrpc":"2.0","id":1,"result":{"txHash":"0xaa","blockNumber":7,"gasUsed":21000,"logs":[]}}"#,
      )
      .create_async()
      .await;

    let receipt = provider(&server)
      .send_transaction(&TxRequest::invoke("0x01", "mint", vec![]))
      .await
      .unwrap();
    assert_eq!(receipt.tx_hash, "0xaa");
    assert_eq!(receipt.block_number, 7);
    assert_eq!(receipt.contract_address, None);
  }

  #[tokio::test]
  async fn revert_code_maps_to_revert() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/")
      .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":3,"message":"execution reverted","data":"Ownable: caller is not the owner"}}"#)
      .create_async()
      .await;

    let err = provider(&server)
      .send_transaction(&TxRequest::invoke("0x01", "mint", vec![]))
      .await
      .unwrap_err();
    assert_eq!(
      err,
      ProviderError::Revert {
        reason: "Ownable: caller is not the owner".into()
      }
    );
  }

  #[tokio::test]
  async fn other_errors_are_invalid_responses() {
    let mut server = mockito::Server::new_async().await;
    server
      .mock("POST", "/")
      .with_body(r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32601,"message":"method not found"}}"#)
      .create_async()
      .await;

    let err = provider(&server).chain_id().await.unwrap_err();
    assert!(matches!(err, ProviderError::InvalidResponse(_)));
  }

  #[tokio::test]
  async fn http_failures_are_network_errors() {
    let mut server = mockito::Server::new_async().await;
    server.mock("POST", "/").with_status(502).create_async().await;

    let err = provider(&server).chain_id().await.unwrap_err();
    assert!(matches!(err, ProviderError::Network(_)));
  }
}
