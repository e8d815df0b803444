use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::definition::SerializedDefinition;
use crate::reference::{PackageReference, ReferenceError};
use crate::util::hash::{ContentHash, FieldHasher, HashError, Hashable};

/// A deployed contract as seen by downstream steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractData {
  pub address: String,
  #[serde(default)]
  pub abi: Value,
  pub contract_name: String,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub constructor_args: Vec<Value>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deploy_txn_hash: Option<String>,
  /// Key of the step that produced this contract.
  #[serde(default)]
  pub deployed_on: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
  #[serde(default)]
  pub args: Vec<Value>,
}

/// A mined transaction produced by an `invoke` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionData {
  pub hash: String,
  pub block_number: u64,
  pub gas_used: u64,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub events: BTreeMap<String, Vec<EventData>>,
  #[serde(default)]
  pub deployed_on: String,
}

/// Outputs of another package pulled in by an `import` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportData {
  /// Rendered storage pointer the bundle was fetched from.
  pub url: String,
  pub content_hash: ContentHash,
  /// Normalized reference of the imported package.
  pub package: String,
  #[serde(default)]
  pub artifacts: ChainArtifacts,
}

/// Outputs produced by steps, grouped by namespace.
///
/// Each namespace is keyed by an output name that exactly one step may
/// produce, so artifacts from independent steps merge without conflicts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainArtifacts {
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub contracts: BTreeMap<String, ContractData>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub txns: BTreeMap<String, TransactionData>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub imports: BTreeMap<String, ImportData>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub extras: BTreeMap<String, Value>,
}

impl ChainArtifacts {
  pub fn is_empty(&self) -> bool {
    self.contracts.is_empty() && self.txns.is_empty() && self.imports.is_empty() && self.extras.is_empty()
  }

  pub fn merge(&mut self, other: ChainArtifacts) {
    self.contracts.extend(other.contracts);
    self.txns.extend(other.txns);
    self.imports.extend(other.imports);
    self.extras.extend(other.extras);
  }

  /// Nesting depth of imported sub-bundles; 0 when nothing is imported.
  pub fn import_depth(&self) -> usize {
    self
      .imports
      .values()
      .map(|import| 1 + import.artifacts.import_depth())
      .max()
      .unwrap_or(0)
  }

  /// Look up a contract by name, or by `import.Name` / `import.sub.Name`
  /// through imported packages.
  pub fn find_contract(&self, path: &str) -> Option<&ContractData> {
    match path.split_once('.') {
      None => self.contracts.get(path),
      Some((import, rest)) => self.imports.get(import)?.artifacts.find_contract(rest),
    }
  }

  /// Content hashes of every imported bundle, at any depth.
  pub fn import_hashes(&self) -> Vec<ContentHash> {
    let mut hashes = Vec::new();
    for import in self.imports.values() {
      hashes.push(import.content_hash.clone());
      hashes.extend(import.artifacts.import_hashes());
    }
    hashes
  }

  /// Output paths this set of artifacts occupies (`contracts.Token`, ...).
  pub fn output_paths(&self) -> Vec<String> {
    let mut paths = Vec::new();
    paths.extend(self.contracts.keys().map(|k| format!("contracts.{}", k)));
    paths.extend(self.txns.keys().map(|k| format!("txns.{}", k)));
    paths.extend(self.imports.keys().map(|k| format!("imports.{}", k)));
    paths.extend(self.extras.keys().map(|k| format!("extras.{}", k)));
    paths
  }
}

/// Recorded result of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepState {
  pub node_key: String,
  /// Hash of the resolved config plus handler-specific inputs.
  pub config_hash: ContentHash,
  /// Hash over the state hashes of every dependency.
  pub context_hash: ContentHash,
  /// Combination of kind, config hash and context hash.
  pub fingerprint: ContentHash,
  #[serde(default)]
  pub artifacts: ChainArtifacts,
  /// Incremented each time the step re-executes.
  pub version: u64,
}

impl StepState {
  /// Hash fed into dependents' context hashes.
  pub fn state_hash(&self) -> Result<ContentHash, HashError> {
    let artifacts = self.artifacts.compute_hash()?;
    Ok(
      FieldHasher::new()
        .field("fingerprint", self.fingerprint.as_str())
        .field("artifacts", artifacts.as_str())
        .finish(),
    )
  }
}

impl Hashable for ChainArtifacts {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageInfo {
  pub name: String,
  pub version: String,
  pub preset: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleStatus {
  Complete,
  Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMeta {
  pub chain_id: u64,
  /// Unix seconds.
  pub timestamp: u64,
  pub generator: String,
  pub package: PackageInfo,
  pub status: BundleStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub failed_node: Option<String>,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub misc: BTreeMap<String, Value>,
}

/// The unit stored, published and archived: definition, per-step state and
/// metadata of one build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentBundle {
  pub definition: SerializedDefinition,
  pub state: BTreeMap<String, StepState>,
  pub meta: BundleMeta,
}

impl Hashable for DeploymentBundle {}

impl DeploymentBundle {
  /// Canonical serialized form.
  pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(self)
  }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
    serde_json::from_slice(bytes)
  }

  pub fn content_hash(&self) -> Result<ContentHash, HashError> {
    self.compute_hash()
  }

  pub fn is_complete(&self) -> bool {
    self.meta.status == BundleStatus::Complete
  }

  pub fn reference(&self) -> Result<PackageReference, ReferenceError> {
    PackageReference::new(
      &self.meta.package.name,
      &self.meta.package.version,
      &self.meta.package.preset,
      self.meta.chain_id,
    )
  }

  /// Every step's artifacts merged into one view.
  pub fn artifacts(&self) -> ChainArtifacts {
    let mut merged = ChainArtifacts::default();
    for state in self.state.values() {
      merged.merge(state.artifacts.clone());
    }
    merged
  }
}
