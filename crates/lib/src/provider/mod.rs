//! Chain access.
//!
//! The builder never speaks a chain's wire protocol. Everything it needs from
//! a chain goes through [`Provider`]: read-only calls, transaction submission
//! and the chain id. ABI encoding is the provider's concern, so requests carry
//! method names and JSON arguments.

mod memory;
mod rpc;

pub use memory::{DeployedContract, MemoryChain};
pub use rpc::RpcProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Address of the all-zero account.
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// A read-only contract call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
  pub to: String,
  pub method: String,
  #[serde(default)]
  pub args: Vec<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub from: Option<String>,
}

/// What a transaction does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TxPayload {
  /// Create a contract from bytecode. `salt` selects deterministic deployment.
  Deploy {
    bytecode: String,
    #[serde(default)]
    args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    salt: Option<String>,
  },
  /// Call a method on an existing contract.
  Invoke {
    method: String,
    #[serde(default)]
    args: Vec<Value>,
  },
}

/// A state-changing transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxRequest {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub from: Option<String>,
  /// Target contract; `None` for deployments.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub to: Option<String>,
  pub payload: TxPayload,
  /// Native value in wei, as a decimal string.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<String>,
}

impl TxRequest {
  pub fn deploy(bytecode: impl Into<String>, args: Vec<Value>) -> Self {
    Self {
      from: None,
      to: None,
      payload: TxPayload::Deploy {
        bytecode: bytecode.into(),
        args,
        salt: None,
      },
      value: None,
    }
  }

  pub fn invoke(to: impl Into<String>, method: impl Into<String>, args: Vec<Value>) -> Self {
    Self {
      from: None,
      to: Some(to.into()),
      payload: TxPayload::Invoke {
        method: method.into(),
        args,
      },
      value: None,
    }
  }

  pub fn with_from(mut self, from: Option<String>) -> Self {
    self.from = from;
    self
  }

  pub fn with_value(mut self, value: Option<String>) -> Self {
    self.value = value;
    self
  }

  /// Human-readable label for logs.
  pub fn describe(&self) -> String {
    match (&self.payload, &self.to) {
      (TxPayload::Deploy { .. }, _) => "deploy".to_string(),
      (TxPayload::Invoke { method, .. }, Some(to)) => format!("{}.{}", to, method),
      (TxPayload::Invoke { method, .. }, None) => method.clone(),
    }
  }
}

/// An event emitted by a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
  pub address: String,
  pub event: String,
  #[serde(default)]
  pub args: Vec<Value>,
}

/// Result of a mined transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
  pub tx_hash: String,
  pub block_number: u64,
  pub gas_used: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub contract_address: Option<String>,
  #[serde(default)]
  pub logs: Vec<Log>,
}

/// Provider failures. Reverts are kept apart from transport problems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
  #[error("execution reverted: {reason}")]
  Revert { reason: String },

  #[error("network error: {0}")]
  Network(String),

  #[error("provider timed out: {0}")]
  Timeout(String),

  #[error("invalid provider response: {0}")]
  InvalidResponse(String),
}

/// Read/write access to one chain.
#[async_trait]
pub trait Provider: Send + Sync {
  async fn chain_id(&self) -> Result<u64, ProviderError>;

  async fn call(&self, request: &CallRequest) -> Result<Value, ProviderError>;

  async fn send_transaction(&self, request: &TxRequest) -> Result<Receipt, ProviderError>;
}

/// Whether `s` looks like a `0x`-prefixed 20-byte address.
pub fn is_address(s: &str) -> bool {
  s.len() == 42 && s.starts_with("0x") && s[2..].bytes().all(|b| b.is_ascii_hexdigit())
}
