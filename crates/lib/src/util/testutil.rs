//! Test fixtures shared across modules.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::action::{ExecutionEnv, MemoryArtifacts};
use crate::build::BuildContext;
use crate::bundle::{
  BundleMeta, BundleStatus, ChainArtifacts, ContractData, DeploymentBundle, ImportData, PackageInfo, StepState,
};
use crate::consts::GENERATOR;
use crate::definition::{ActionNode, PackageMeta, SerializedDefinition, SerializedNode};
use crate::provider::MemoryChain;
use crate::registry::{MemoryRegistry, PackageLoader, RegistryResolver};
use crate::storage::Storage;
use crate::util::hash::{ContentHash, hash_bytes};
use crate::util::retry::RetryPolicy;

pub const TEST_TIMESTAMP: u64 = 1_700_000_000;

/// Context for chain 13370, package `test:1.0.0@main`.
pub fn build_ctx() -> BuildContext {
  BuildContext::new(
    13370,
    TEST_TIMESTAMP,
    PackageInfo {
      name: "test".into(),
      version: "1.0.0".into(),
      preset: "main".into(),
    },
    BTreeMap::new(),
  )
}

pub fn exec_env(chain: Arc<MemoryChain>, artifacts: MemoryArtifacts) -> ExecutionEnv {
  ExecutionEnv::new(chain, Arc::new(artifacts))
}

/// Node with no dependencies, split from a `kind.label` key.
pub fn node(key: &str, config: Value) -> ActionNode {
  let (kind, label) = key.split_once('.').unwrap_or((key, ""));
  ActionNode {
    key: key.to_string(),
    kind: kind.to_string(),
    label: label.to_string(),
    config,
    explicit_depends: Default::default(),
    depends_on: Default::default(),
  }
}

/// A `run` step executing `script` through `/bin/sh`.
#[cfg(unix)]
pub fn shell_step(key: &str, script: &str, outputs: &[&str]) -> ActionNode {
  node(key, json!({ "exec": "/bin/sh", "args": ["-c", script], "outputs": outputs }))
}

pub fn contract_data(name: &str, address: &str) -> ContractData {
  ContractData {
    address: address.to_string(),
    abi: json!([]),
    contract_name: name.to_string(),
    constructor_args: Vec::new(),
    deploy_txn_hash: None,
    deployed_on: format!("contract.{}", name),
  }
}

fn nested_imports(depth: usize) -> ChainArtifacts {
  let mut artifacts = ChainArtifacts::default();
  if depth > 0 {
    artifacts.imports.insert(
      format!("level{}", depth),
      ImportData {
        url: format!("memory://default#{}", hash_bytes(format!("level{}", depth).as_bytes())),
        content_hash: hash_bytes(format!("level{}", depth).as_bytes()),
        package: format!("level{}:latest@main/13370", depth),
        artifacts: nested_imports(depth - 1),
      },
    );
  }
  artifacts
}

/// Complete `name:latest@main/13370` bundle with one `contract.Root` step
/// whose artifacts nest `depth` levels of imports.
pub fn nested_bundle(name: &str, depth: usize) -> DeploymentBundle {
  let mut artifacts = nested_imports(depth);
  artifacts.contracts.insert(
    "Root".into(),
    contract_data("Root", "0x00000000000000000000000000000000000000f0"),
  );

  let state = StepState {
    node_key: "contract.Root".into(),
    config_hash: hash_bytes(b"config"),
    context_hash: hash_bytes(b"context"),
    fingerprint: hash_bytes(b"fingerprint"),
    artifacts,
    version: 1,
  };

  DeploymentBundle {
    definition: SerializedDefinition {
      package: PackageMeta {
        name: name.to_string(),
        version: "latest".into(),
        preset: "main".into(),
        description: None,
        keywords: Vec::new(),
      },
      settings: BTreeMap::new(),
      nodes: vec![SerializedNode {
        key: "contract.Root".into(),
        config: json!({}),
        depends: Vec::new(),
      }],
    },
    state: BTreeMap::from([("contract.Root".to_string(), state)]),
    meta: BundleMeta {
      chain_id: 13370,
      timestamp: TEST_TIMESTAMP,
      generator: GENERATOR.to_string(),
      package: PackageInfo {
        name: name.to_string(),
        version: "latest".into(),
        preset: "main".into(),
      },
      status: BundleStatus::Complete,
      failed_node: None,
      misc: BTreeMap::new(),
    },
  }
}

/// Loader over in-memory storage and an in-memory registry.
pub fn package_loader() -> Arc<PackageLoader> {
  let resolver = RegistryResolver::new()
    .with_registry(Arc::new(MemoryRegistry::new()))
    .with_retry(RetryPolicy::none());
  Arc::new(PackageLoader::new(resolver, Storage::in_memory()))
}

/// Store and publish a bundle under its own reference.
pub async fn publish_bundle(loader: &PackageLoader, bundle: &DeploymentBundle) -> ContentHash {
  let (pointer, _) = loader.publish(bundle, "tester").await.unwrap();
  pointer.content_hash
}
