//! `contract.<Name>`: deploy a compiled artifact.
//!
//! ```toml
//! [contract.Token]
//! artifact = "Token"          # defaults to the label
//! args = ["<%= settings.owner %>", 1000]
//! salt = "v1"                 # optional deterministic deployment
//! ```

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::action::{
  ActionError, ActionHandler, ExecutionEnv, ValidationIssue, extend_fingerprint, parse_config, render_string,
  render_wei, resolved_config_hash, shape_issues, wei_issue,
};
use crate::build::BuildContext;
use crate::bundle::{ChainArtifacts, ContractData};
use crate::definition::ActionNode;
use crate::provider::{TxPayload, TxRequest, is_address};
use crate::template;
use crate::util::hash::ContentHash;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContractConfig {
  #[serde(default)]
  artifact: Option<String>,
  #[serde(default)]
  args: Vec<Value>,
  #[serde(default)]
  salt: Option<String>,
  #[serde(default)]
  value: Option<Value>,
  #[serde(default)]
  from: Option<String>,
  /// Artifacts whose ABIs are appended to this contract's ABI.
  #[serde(default)]
  abi_of: Vec<String>,
}

impl ContractConfig {
  fn artifact_name<'a>(&'a self, label: &'a str) -> &'a str {
    self.artifact.as_deref().unwrap_or(label)
  }
}

pub struct ContractAction;

#[async_trait]
impl ActionHandler for ContractAction {
  fn validate(&self, config: &Value) -> Vec<ValidationIssue> {
    let (parsed, mut issues) = shape_issues::<ContractConfig>(config);
    let Some(cfg) = parsed else {
      return issues;
    };

    if matches!(cfg.artifact.as_deref(), Some("")) {
      issues.push(ValidationIssue::new("artifact", "must not be empty"));
    }
    if let Some(from) = &cfg.from
      && !template::has_template(from)
      && !is_address(from)
    {
      issues.push(ValidationIssue::new("from", format!("{:?} is not an address", from)));
    }
    if matches!(cfg.salt.as_deref(), Some("")) {
      issues.push(ValidationIssue::new("salt", "must not be empty"));
    }
    issues.extend(wei_issue(cfg.value.as_ref()));
    issues
  }

  fn outputs(&self, label: &str, _config: &Value) -> Vec<String> {
    vec![format!("contracts.{}", label)]
  }

  async fn compute_state_fingerprint(
    &self,
    node: &ActionNode,
    ctx: &BuildContext,
    env: &ExecutionEnv,
  ) -> Result<ContentHash, ActionError> {
    let cfg: ContractConfig = parse_config(&node.config)?;
    let config_hash = resolved_config_hash(&node.config, ctx)?;

    let artifact = env.artifacts.artifact(cfg.artifact_name(&node.label))?;
    let bytecode_hash = artifact.bytecode_hash();

    let mut abi_names: BTreeSet<&str> = BTreeSet::new();
    abi_names.extend(cfg.abi_of.iter().map(String::as_str));
    let mut abi_hashes = Vec::new();
    for name in abi_names {
      let extra = env.artifacts.artifact(name)?;
      abi_hashes.push(format!("{}={}", name, serde_json::to_string(&extra.abi)?));
    }
    let abi_hashes = abi_hashes.join("\n");

    Ok(extend_fingerprint(
      &config_hash,
      &[("bytecode", bytecode_hash.as_str()), ("abi_of", &abi_hashes)],
    ))
  }

  async fn execute(
    &self,
    node: &ActionNode,
    ctx: &BuildContext,
    env: &ExecutionEnv,
  ) -> Result<ChainArtifacts, ActionError> {
    let cfg: ContractConfig = parse_config(&node.config)?;
    let scope = ctx.scope();

    let artifact = env.artifacts.artifact(cfg.artifact_name(&node.label))?;
    let args = match template::render_value(&Value::Array(cfg.args.clone()), &scope)? {
      Value::Array(args) => args,
      other => vec![other],
    };
    let salt = cfg.salt.as_deref().map(|s| render_string(s, &scope, "salt")).transpose()?;
    let from = match cfg.from.as_deref() {
      Some(from) => Some(render_string(from, &scope, "from")?),
      None => env.signer.clone(),
    };
    let value = render_wei(cfg.value.as_ref(), &scope)?;

    let mut abi = match &artifact.abi {
      Value::Array(items) => items.clone(),
      Value::Null => Vec::new(),
      other => vec![other.clone()],
    };
    for name in &cfg.abi_of {
      if let Value::Array(items) = env.artifacts.artifact(name)?.abi {
        abi.extend(items);
      }
    }

    let request = TxRequest {
      from,
      to: None,
      payload: TxPayload::Deploy {
        bytecode: artifact.bytecode.clone(),
        args: args.clone(),
        salt,
      },
      value,
    };
    let receipt = env.provider.send_transaction(&request).await?;
    let address = receipt.contract_address.ok_or(ActionError::NoContractAddress)?;

    info!(step = %node.key, contract = %artifact.contract_name, address = %address, tx = %receipt.tx_hash, "contract deployed");

    let mut artifacts = ChainArtifacts::default();
    artifacts.contracts.insert(
      node.label.clone(),
      ContractData {
        address,
        abi: Value::Array(abi),
        contract_name: artifact.contract_name,
        constructor_args: args,
        deploy_txn_hash: Some(receipt.tx_hash),
        deployed_on: node.key.clone(),
      },
    );
    Ok(artifacts)
  }
}
