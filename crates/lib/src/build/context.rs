//! Values visible to templates during one build.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use crate::bundle::{ChainArtifacts, PackageInfo};

/// Accumulated outputs plus build-wide values.
///
/// Owned by the engine for the duration of a build. Each execution wave
/// works on a snapshot; outputs are merged back once the wave completes.
#[derive(Debug, Clone)]
pub struct BuildContext {
  pub chain_id: u64,
  pub timestamp: u64,
  pub package: PackageInfo,
  pub settings: BTreeMap<String, String>,
  pub artifacts: ChainArtifacts,
}

impl BuildContext {
  pub fn new(chain_id: u64, timestamp: u64, package: PackageInfo, settings: BTreeMap<String, String>) -> Self {
    Self {
      chain_id,
      timestamp,
      package,
      settings,
      artifacts: ChainArtifacts::default(),
    }
  }

  /// JSON tree templates are evaluated against.
  pub fn scope(&self) -> Value {
    let mut root = match artifacts_scope(&self.artifacts) {
      Value::Object(map) => map,
      _ => Map::new(),
    };
    root.insert("chainId".into(), json!(self.chain_id));
    root.insert("timestamp".into(), json!(self.timestamp));
    root.insert(
      "package".into(),
      json!({
        "name": self.package.name,
        "version": self.package.version,
        "preset": self.package.preset,
      }),
    );
    root.insert("settings".into(), json!(self.settings));
    Value::Object(root)
  }
}

/// Render artifacts so imported packages expose their namespaces directly:
/// `imports.<label>.contracts.<Name>.address`.
pub fn artifacts_scope(artifacts: &ChainArtifacts) -> Value {
  let mut imports = Map::new();
  for (label, import) in &artifacts.imports {
    let mut entry = match artifacts_scope(&import.artifacts) {
      Value::Object(map) => map,
      _ => Map::new(),
    };
    entry.insert("url".into(), json!(import.url));
    entry.insert("contentHash".into(), json!(import.content_hash));
    entry.insert("package".into(), json!(import.package));
    imports.insert(label.clone(), Value::Object(entry));
  }

  json!({
    "contracts": artifacts.contracts,
    "txns": artifacts.txns,
    "imports": imports,
    "extras": artifacts.extras,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bundle::{ContractData, ImportData};
  use crate::util::hash::hash_bytes;

  fn contract(name: &str, address: &str) -> ContractData {
    ContractData {
      address: address.into(),
      abi: json!([]),
      contract_name: name.into(),
      constructor_args: vec![],
      deploy_txn_hash: None,
      deployed_on: format!("contract.{}", name),
    }
  }

  #[test]
  fn scope_exposes_builtins_and_namespaces() {
    let mut ctx = BuildContext::new(
      10,
      1_700_000_000,
      PackageInfo {
        name: "pkg".into(),
        version: "1.0.0".into(),
        preset: "main".into(),
      },
      BTreeMap::from([("owner".to_string(), "0xowner".to_string())]),
    );
    ctx.artifacts.contracts.insert("Token".into(), contract("Token", "0x01"));

    let scope = ctx.scope();
    assert_eq!(scope["chainId"], json!(10));
    assert_eq!(scope["package"]["version"], json!("1.0.0"));
    assert_eq!(scope["settings"]["owner"], json!("0xowner"));
    assert_eq!(scope["contracts"]["Token"]["address"], json!("0x01"));
    assert_eq!(scope["contracts"]["Token"]["contractName"], json!("Token"));
  }

  #[test]
  fn imports_are_flattened() {
    let mut inner = ChainArtifacts::default();
    inner.contracts.insert("Registry".into(), contract("Registry", "0x02"));

    let mut artifacts = ChainArtifacts::default();
    artifacts.imports.insert(
      "dep".into(),
      ImportData {
        url: "memory#abc".into(),
        content_hash: hash_bytes(b"dep"),
        package: "dep:1.0.0@main/10".into(),
        artifacts: inner,
      },
    );

    let scope = artifacts_scope(&artifacts);
    assert_eq!(scope["imports"]["dep"]["contracts"]["Registry"]["address"], json!("0x02"));
    assert_eq!(scope["imports"]["dep"]["package"], json!("dep:1.0.0@main/10"));
  }
}
