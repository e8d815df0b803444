//! Deterministic in-process chain.
//!
//! Used by tests and by `chainbuild build --simulate`. Addresses and
//! transaction hashes derive from SHA-256 over the sender, its nonce and the
//! request, so the same sequence of transactions always yields the same
//! results.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::{CallRequest, Log, Provider, ProviderError, Receipt, TxPayload, TxRequest};

/// Sender used when a request names none.
pub const DEFAULT_SENDER: &str = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";

const BASE_GAS: u64 = 21_000;

/// A contract created on a [`MemoryChain`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeployedContract {
  pub address: String,
  pub bytecode: String,
  pub args: Vec<Value>,
  pub deployer: String,
}

#[derive(Default)]
struct ChainState {
  block_number: u64,
  nonces: BTreeMap<String, u64>,
  contracts: BTreeMap<String, DeployedContract>,
  transactions: Vec<TxRequest>,
  /// Keyed by `to|method|args`, `to|method` or `*|method`.
  responses: BTreeMap<String, Value>,
  /// Method name (or `deploy:<bytecode>`) -> revert reason.
  reverts: BTreeMap<String, String>,
  events: BTreeMap<String, Vec<(String, Vec<Value>)>>,
  offline: bool,
}

/// Simulated chain implementing [`Provider`].
pub struct MemoryChain {
  chain_id: u64,
  state: Mutex<ChainState>,
}

impl MemoryChain {
  pub fn new(chain_id: u64) -> Self {
    Self {
      chain_id,
      state: Mutex::new(ChainState::default()),
    }
  }

  fn state(&self) -> MutexGuard<'_, ChainState> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Answer `method` calls on any address with `value`.
  pub fn respond(&self, method: &str, value: Value) {
    self.state().responses.insert(format!("*|{}", method), value);
  }

  /// Answer `method` calls on `to` with `value`.
  pub fn respond_at(&self, to: &str, method: &str, value: Value) {
    self
      .state()
      .responses
      .insert(format!("{}|{}", to.to_lowercase(), method), value);
  }

  /// Answer `method(args)` calls on `to` with `value`.
  pub fn respond_with_args(&self, to: &str, method: &str, args: &[Value], value: Value) {
    let key = format!("{}|{}|{}", to.to_lowercase(), method, Value::from(args.to_vec()));
    self.state().responses.insert(key, value);
  }

  /// Make every call or transaction invoking `method` revert.
  pub fn revert_method(&self, method: &str, reason: &str) {
    self.state().reverts.insert(method.to_string(), reason.to_string());
  }

  /// Make deployments of `bytecode` revert.
  pub fn revert_deploy(&self, bytecode: &str, reason: &str) {
    self
      .state()
      .reverts
      .insert(format!("deploy:{}", bytecode), reason.to_string());
  }

  /// Emit `event(args)` whenever `method` is invoked.
  pub fn emit_on(&self, method: &str, event: &str, args: Vec<Value>) {
    self
      .state()
      .events
      .entry(method.to_string())
      .or_default()
      .push((event.to_string(), args));
  }

  /// Simulate a transport outage.
  pub fn set_offline(&self, offline: bool) {
    self.state().offline = offline;
  }

  /// Every transaction accepted so far, in submission order.
  pub fn transactions(&self) -> Vec<TxRequest> {
    self.state().transactions.clone()
  }

  pub fn transaction_count(&self) -> usize {
    self.state().transactions.len()
  }

  pub fn contract(&self, address: &str) -> Option<DeployedContract> {
    self.state().contracts.get(&address.to_lowercase()).cloned()
  }

  pub fn contract_count(&self) -> usize {
    self.state().contracts.len()
  }

  pub fn block_number(&self) -> u64 {
    self.state().block_number
  }
}

fn digest_hex(parts: &[&[u8]]) -> String {
  let mut hasher = Sha256::new();
  for part in parts {
    hasher.update((part.len() as u64).to_le_bytes());
    hasher.update(part);
  }
  hex::encode(hasher.finalize())
}

fn derive_address(parts: &[&[u8]]) -> String {
  format!("0x{}", &digest_hex(parts)[..40])
}

/// Inner calls of an `aggregate3Value` batch that are not allowed to fail.
fn strict_inner_methods(args: &[Value]) -> Vec<String> {
  let Some(Value::Array(calls)) = args.first() else {
    return Vec::new();
  };
  calls
    .iter()
    .filter(|call| !call.get("allowFailure").and_then(Value::as_bool).unwrap_or(false))
    .filter_map(|call| call.pointer("/callData/method").and_then(Value::as_str))
    .map(str::to_string)
    .collect()
}

#[async_trait]
impl Provider for MemoryChain {
  async fn chain_id(&self) -> Result<u64, ProviderError> {
    if self.state().offline {
      return Err(ProviderError::Network("memory chain is offline".into()));
    }
    Ok(self.chain_id)
  }

  async fn call(&self, request: &CallRequest) -> Result<Value, ProviderError> {
    let state = self.state();
    if state.offline {
      return Err(ProviderError::Network("memory chain is offline".into()));
    }
    if let Some(reason) = state.reverts.get(&request.method) {
      return Err(ProviderError::Revert { reason: reason.clone() });
    }

    let to = request.to.to_lowercase();
    let keys = [
      format!("{}|{}|{}", to, request.method, Value::from(request.args.clone())),
      format!("{}|{}", to, request.method),
      format!("*|{}", request.method),
    ];
    keys
      .iter()
      .find_map(|key| state.responses.get(key))
      .cloned()
      .ok_or_else(|| ProviderError::Revert {
        reason: format!("no response for {}.{}", request.to, request.method),
      })
  }

  async fn send_transaction(&self, request: &TxRequest) -> Result<Receipt, ProviderError> {
    let mut state = self.state();
    if state.offline {
      return Err(ProviderError::Network("memory chain is offline".into()));
    }

    let from = request.from.clone().unwrap_or_else(|| DEFAULT_SENDER.to_string()).to_lowercase();

    let (contract_address, logs, payload_len) = match &request.payload {
      TxPayload::Deploy { bytecode, args, salt } => {
        if let Some(reason) = state.reverts.get(&format!("deploy:{}", bytecode)) {
          return Err(ProviderError::Revert { reason: reason.clone() });
        }
        let nonce = state.nonces.get(&from).copied().unwrap_or(0);
        let address = match salt {
          Some(salt) => derive_address(&[b"create2", from.as_bytes(), salt.as_bytes(), bytecode.as_bytes()]),
          None => derive_address(&[b"create", from.as_bytes(), &nonce.to_le_bytes()]),
        };
        if state.contracts.contains_key(&address) {
          return Err(ProviderError::Revert {
            reason: format!("contract already deployed at {}", address),
          });
        }
        state.contracts.insert(
          address.clone(),
          DeployedContract {
            address: address.clone(),
            bytecode: bytecode.clone(),
            args: args.clone(),
            deployer: from.clone(),
          },
        );
        (Some(address), Vec::new(), bytecode.len())
      }
      TxPayload::Invoke { method, args } => {
        if let Some(reason) = state.reverts.get(method) {
          return Err(ProviderError::Revert { reason: reason.clone() });
        }
        for inner in strict_inner_methods(args) {
          if let Some(reason) = state.reverts.get(&inner) {
            return Err(ProviderError::Revert { reason: reason.clone() });
          }
        }
        let to = request.to.clone().unwrap_or_default().to_lowercase();
        let logs = state
          .events
          .get(method)
          .map(|events| {
            events
              .iter()
              .map(|(event, args)| Log {
                address: to.clone(),
                event: event.clone(),
                args: args.clone(),
              })
              .collect()
          })
          .unwrap_or_default();
        (None, logs, Value::from(args.clone()).to_string().len())
      }
    };

    *state.nonces.entry(from.clone()).or_insert(0) += 1;
    state.block_number += 1;
    state.transactions.push(request.clone());

    let block_number = state.block_number;
    let serialized = serde_json::to_vec(request).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
    let tx_hash = format!("0x{}", digest_hex(&[&serialized, &block_number.to_le_bytes()]));

    debug!(tx = %tx_hash, block = block_number, what = %request.describe(), "memory chain accepted transaction");

    Ok(Receipt {
      tx_hash,
      block_number,
      gas_used: BASE_GAS + 16 * payload_len as u64,
      contract_address,
      logs,
    })
  }
}
