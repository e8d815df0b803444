//! Batching several contract calls into one transaction.
//!
//! Batches target the canonical Multicall3 deployment and its
//! `aggregate3Value` entry point. Each call carries its own `allowFailure`
//! flag: when set, that call may revert without reverting the batch.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::provider::TxRequest;

/// Multicall3 address, identical on every chain it is deployed to.
pub const MULTICALL3_ADDRESS: &str = "0xca11bde05977b3631167028862be2a173976ca11";

const AGGREGATE_METHOD: &str = "aggregate3Value";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallData {
  pub method: String,
  #[serde(default)]
  pub args: Vec<Value>,
}

/// One call inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
  pub target: String,
  pub call: CallData,
  /// Wei as a decimal string.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub value: Option<String>,
  #[serde(default)]
  pub allow_failure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MulticallError {
  #[error("cannot aggregate an empty batch")]
  EmptyBatch,

  #[error("invalid value {value:?} for call to {target}: expected a decimal wei amount")]
  InvalidValue { target: String, value: String },

  #[error("batch value overflows")]
  ValueOverflow,
}

fn parse_wei(entry: &BatchEntry) -> Result<u128, MulticallError> {
  match &entry.value {
    None => Ok(0),
    Some(v) => v.parse::<u128>().map_err(|_| MulticallError::InvalidValue {
      target: entry.target.clone(),
      value: v.clone(),
    }),
  }
}

/// Aggregate `entries` into one transaction, honouring each entry's
/// `allow_failure` flag.
pub fn aggregate(entries: &[BatchEntry], from: Option<String>) -> Result<TxRequest, MulticallError> {
  if entries.is_empty() {
    return Err(MulticallError::EmptyBatch);
  }

  let mut total: u128 = 0;
  let mut calls = Vec::with_capacity(entries.len());
  for entry in entries {
    let wei = parse_wei(entry)?;
    total = total.checked_add(wei).ok_or(MulticallError::ValueOverflow)?;
    calls.push(json!({
      "target": entry.target,
      "allowFailure": entry.allow_failure,
      "value": wei.to_string(),
      "callData": entry.call,
    }));
  }

  let value = (total > 0).then(|| total.to_string());
  Ok(
    TxRequest::invoke(MULTICALL3_ADDRESS, AGGREGATE_METHOD, vec![Value::Array(calls)])
      .with_from(from)
      .with_value(value),
  )
}

/// Aggregate `entries` so that any failing call reverts the whole batch.
pub fn aggregate_strict(entries: &[BatchEntry], from: Option<String>) -> Result<TxRequest, MulticallError> {
  let strict: Vec<BatchEntry> = entries
    .iter()
    .cloned()
    .map(|entry| BatchEntry {
      allow_failure: false,
      ..entry
    })
    .collect();
  aggregate(&strict, from)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::provider::TxPayload;

  fn entry(target: &str, method: &str, value: Option<&str>, allow_failure: bool) -> BatchEntry {
    BatchEntry {
      target: target.into(),
      call: CallData {
        method: method.into(),
        args: vec![json!(1)],
      },
      value: value.map(str::to_string),
      allow_failure,
    }
  }

  #[test]
  fn aggregate_sums_values_and_keeps_flags() {
    let tx = aggregate(
      &[entry("0x01", "a", Some("5"), true), entry("0x02", "b", None, false)],
      Some("0xme".into()),
    )
    .unwrap();

    assert_eq!(tx.to.as_deref(), Some(MULTICALL3_ADDRESS));
    assert_eq!(tx.from.as_deref(), Some("0xme"));
    assert_eq!(tx.value.as_deref(), Some("5"));

    let TxPayload::Invoke { method, args } = &tx.payload else {
      panic!("expected invoke payload");
    };
    assert_eq!(method, "aggregate3Value");
    assert_eq!(
      args[0],
      json!([
        { "target": "0x01", "allowFailure": true, "value": "5", "callData": { "method": "a", "args": [1] } },
        { "target": "0x02", "allowFailure": false, "value": "0", "callData": { "method": "b", "args": [1] } },
      ])
    );
  }

  #[test]
  fn strict_variant_clears_flags() {
    let tx = aggregate_strict(&[entry("0x01", "a", None, true)], None).unwrap();
    let TxPayload::Invoke { args, .. } = &tx.payload else {
      panic!("expected invoke payload");
    };
    assert_eq!(args[0][0]["allowFailure"], json!(false));
    assert_eq!(tx.value, None);
  }

  #[test]
  fn rejects_empty_and_bad_values() {
    assert_eq!(aggregate(&[], None).unwrap_err(), MulticallError::EmptyBatch);
    assert!(matches!(
      aggregate(&[entry("0x01", "a", Some("1 eth"), false)], None),
      Err(MulticallError::InvalidValue { .. })
    ));
    let max = u128::MAX.to_string();
    assert_eq!(
      aggregate(
        &[entry("0x01", "a", Some(&max), false), entry("0x02", "b", Some("1"), false)],
        None
      )
      .unwrap_err(),
      MulticallError::ValueOverflow
    );
  }
}
