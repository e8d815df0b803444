//! `invoke.<label>`: call a method on one or more deployed contracts.
//!
//! ```toml
//! [invoke.setup]
//! target = ["Token"]                  # names, `import.Name` paths or addresses
//! func = "initialize"
//! args = ["<%= contracts.Vault.address %>"]
//!
//! [invoke.setup.factory.Pool]          # contracts created by the call
//! event = "PoolCreated"
//! arg = 0
//!
//! [invoke.setup.extra.poolId]          # event values exposed under extras
//! event = "PoolCreated"
//! arg = 1
//! ```
//!
//! Several targets are batched into one strict multicall transaction.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::action::{
  ActionError, ActionHandler, ExecutionEnv, ValidationIssue, extend_fingerprint, parse_config, render_string,
  render_wei, resolved_config_hash, shape_issues, template_dependencies, wei_issue,
};
use crate::build::BuildContext;
use crate::bundle::{ChainArtifacts, ContractData, EventData, TransactionData};
use crate::definition::{ActionNode, validate_label, validate_step_path};
use crate::multicall::{self, BatchEntry, CallData};
use crate::provider::{Log, TxRequest, is_address};
use crate::template;
use crate::util::hash::ContentHash;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Targets {
  One(String),
  Many(Vec<String>),
}

impl Targets {
  fn as_slice(&self) -> &[String] {
    match self {
      Targets::One(t) => std::slice::from_ref(t),
      Targets::Many(ts) => ts,
    }
  }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FactoryConfig {
  event: String,
  #[serde(default)]
  arg: usize,
  #[serde(default)]
  artifact: Option<String>,
  #[serde(default)]
  abi_of: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExtraConfig {
  event: String,
  #[serde(default)]
  arg: usize,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InvokeConfig {
  target: Targets,
  func: String,
  #[serde(default)]
  args: Vec<Value>,
  #[serde(default)]
  value: Option<Value>,
  #[serde(default)]
  from: Option<String>,
  #[serde(default)]
  factory: BTreeMap<String, FactoryConfig>,
  #[serde(default)]
  extra: BTreeMap<String, ExtraConfig>,
}

/// How a `target` entry is resolved.
enum TargetRef<'a> {
  Address(&'a str),
  Template(&'a str),
  Contract(&'a str),
}

fn classify(target: &str) -> TargetRef<'_> {
  if template::has_template(target) {
    TargetRef::Template(target)
  } else if is_address(target) {
    TargetRef::Address(target)
  } else {
    TargetRef::Contract(target)
  }
}

/// Output path a contract target depends on.
fn target_dependency(path: &str) -> String {
  match path.split_once('.') {
    Some((import, _)) => format!("imports.{}", import),
    None => format!("contracts.{}", path),
  }
}

fn resolve_target(target: &str, ctx: &BuildContext, scope: &Value) -> Result<String, ActionError> {
  match classify(target) {
    TargetRef::Address(address) => Ok(address.to_string()),
    TargetRef::Template(t) => render_string(t, scope, "target"),
    TargetRef::Contract(path) => ctx
      .artifacts
      .find_contract(path)
      .map(|c| c.address.clone())
      .ok_or_else(|| ActionError::MissingContract(path.to_string())),
  }
}

fn event_arg(logs: &[Log], event: &str, index: usize) -> Result<Value, ActionError> {
  let log = logs
    .iter()
    .find(|log| log.event == event)
    .ok_or_else(|| ActionError::MissingEvent { event: event.to_string() })?;
  log.args.get(index).cloned().ok_or_else(|| ActionError::MissingEventArg {
    event: event.to_string(),
    index,
  })
}

pub struct InvokeAction;

#[async_trait]
impl ActionHandler for InvokeAction {
  fn validate(&self, config: &Value) -> Vec<ValidationIssue> {
    let (parsed, mut issues) = shape_issues::<InvokeConfig>(config);
    let Some(cfg) = parsed else {
      return issues;
    };

    if cfg.target.as_slice().is_empty() {
      issues.push(ValidationIssue::new("target", "at least one target is required"));
    }
    for target in cfg.target.as_slice() {
      if let TargetRef::Contract(path) = classify(target) {
        let valid = if path.contains('.') {
          validate_step_path(path).is_ok()
        } else {
          validate_label(path).is_ok()
        };
        if !valid {
          issues.push(ValidationIssue::new(
            "target",
            format!("{:?} is neither an address, a contract name nor a step path", target),
          ));
        }
      }
    }
    if cfg.func.is_empty() {
      issues.push(ValidationIssue::new("func", "must not be empty"));
    }
    if let Some(from) = &cfg.from
      && !template::has_template(from)
      && !is_address(from)
    {
      issues.push(ValidationIssue::new("from", format!("{:?} is not an address", from)));
    }
    for name in cfg.factory.keys() {
      if validate_label(name).is_err() {
        issues.push(ValidationIssue::new(format!("factory.{}", name), "invalid contract name"));
      }
      if cfg.extra.contains_key(name) {
        issues.push(ValidationIssue::new(
          format!("factory.{}", name),
          "name is also used by an extra",
        ));
      }
    }
    for name in cfg.extra.keys() {
      if validate_label(name).is_err() {
        issues.push(ValidationIssue::new(format!("extra.{}", name), "invalid extra name"));
      }
    }
    issues.extend(wei_issue(cfg.value.as_ref()));
    issues
  }

  fn compute_dependencies(&self, config: &Value) -> BTreeSet<String> {
    let mut deps = template_dependencies(config);
    if let Some(targets) = config.get("target") {
      let targets: Vec<&str> = match targets {
        Value::String(s) => vec![s.as_str()],
        Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
      };
      for target in targets {
        if let TargetRef::Contract(path) = classify(target) {
          deps.insert(target_dependency(path));
        }
      }
    }
    deps
  }

  fn outputs(&self, label: &str, config: &Value) -> Vec<String> {
    let mut outputs = vec![format!("txns.{}", label)];
    let keys = |field: &str| -> Vec<String> {
      config
        .get(field)
        .and_then(Value::as_object)
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default()
    };
    outputs.extend(keys("factory").into_iter().map(|n| format!("contracts.{}", n)));
    outputs.extend(keys("extra").into_iter().map(|n| format!("extras.{}", n)));
    outputs
  }

  async fn compute_state_fingerprint(
    &self,
    node: &ActionNode,
    ctx: &BuildContext,
    env: &ExecutionEnv,
  ) -> Result<ContentHash, ActionError> {
    let cfg: InvokeConfig = parse_config(&node.config)?;
    let scope = ctx.scope();
    let config_hash = resolved_config_hash(&node.config, ctx)?;

    let targets = cfg
      .target
      .as_slice()
      .iter()
      .map(|t| resolve_target(t, ctx, &scope))
      .collect::<Result<Vec<_>, _>>()?
      .join(",");

    let mut factory_abis = Vec::new();
    for (name, factory) in &cfg.factory {
      if let Ok(artifact) = env.artifacts.artifact(factory.artifact.as_deref().unwrap_or(name)) {
        factory_abis.push(format!("{}={}", name, serde_json::to_string(&artifact.abi)?));
      }
    }

    Ok(extend_fingerprint(
      &config_hash,
      &[("targets", &targets), ("factory_abis", &factory_abis.join("\n"))],
    ))
  }

  async fn execute(
    &self,
    node: &ActionNode,
    ctx: &BuildContext,
    env: &ExecutionEnv,
  ) -> Result<ChainArtifacts, ActionError> {
    let cfg: InvokeConfig = parse_config(&node.config)?;
    let scope = ctx.scope();

    let targets = cfg
      .target
      .as_slice()
      .iter()
      .map(|t| resolve_target(t, ctx, &scope))
      .collect::<Result<Vec<_>, _>>()?;
    let args = match template::render_value(&Value::Array(cfg.args.clone()), &scope)? {
      Value::Array(args) => args,
      other => vec![other],
    };
    let from = match cfg.from.as_deref() {
      Some(from) => Some(render_string(from, &scope, "from")?),
      None => env.signer.clone(),
    };
    let value = render_wei(cfg.value.as_ref(), &scope)?;

    let request = match targets.as_slice() {
      [single] => TxRequest::invoke(single.clone(), cfg.func.clone(), args)
        .with_from(from)
        .with_value(value),
      many => {
        let entries: Vec<BatchEntry> = many
          .iter()
          .map(|target| BatchEntry {
            target: target.clone(),
            call: CallData {
              method: cfg.func.clone(),
              args: args.clone(),
            },
            value: value.clone(),
            allow_failure: false,
          })
          .collect();
        multicall::aggregate_strict(&entries, from)?
      }
    };

    let receipt = env.provider.send_transaction(&request).await?;
    info!(step = %node.key, tx = %receipt.tx_hash, targets = targets.len(), method = %cfg.func, "transaction mined");

    let mut events: BTreeMap<String, Vec<EventData>> = BTreeMap::new();
    for log in &receipt.logs {
      events.entry(log.event.clone()).or_default().push(EventData {
        args: log.args.clone(),
      });
    }

    let mut artifacts = ChainArtifacts::default();

    for (name, factory) in &cfg.factory {
      let address = match event_arg(&receipt.logs, &factory.event, factory.arg)? {
        Value::String(s) => s,
        other => {
          return Err(ActionError::InvalidConfig(format!(
            "factory {}: event argument {} is not an address: {}",
            name, factory.arg, other
          )));
        }
      };

      let artifact_name = factory.artifact.as_deref().unwrap_or(name);
      let mut abi = match env.artifacts.artifact(artifact_name) {
        Ok(artifact) => artifact.abi,
        Err(_) if factory.artifact.is_none() => Value::Array(Vec::new()),
        Err(err) => return Err(err.into()),
      };
      for extra in &factory.abi_of {
        if let (Value::Array(items), Value::Array(more)) = (&mut abi, env.artifacts.artifact(extra)?.abi) {
          items.extend(more);
        }
      }

      info!(step = %node.key, contract = %name, address = %address, "factory contract registered");
      artifacts.contracts.insert(
        name.clone(),
        ContractData {
          address,
          abi,
          contract_name: artifact_name.to_string(),
          constructor_args: Vec::new(),
          deploy_txn_hash: Some(receipt.tx_hash.clone()),
          deployed_on: node.key.clone(),
        },
      );
    }

    for (name, extra) in &cfg.extra {
      let value = event_arg(&receipt.logs, &extra.event, extra.arg)?;
      artifacts.extras.insert(name.clone(), value);
    }

    artifacts.txns.insert(
      node.label.clone(),
      TransactionData {
        hash: receipt.tx_hash,
        block_number: receipt.block_number,
        gas_used: receipt.gas_used,
        events,
        deployed_on: node.key.clone(),
      },
    );
    Ok(artifacts)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::action::MemoryArtifacts;
  use crate::multicall::MULTICALL3_ADDRESS;
  use crate::provider::{MemoryChain, TxPayload};
  use crate::util::testutil::{build_ctx, contract_data, exec_env, node};
  use serde_json::json;
  use std::sync::Arc;

  #[test]
  fn dependencies_include_targets() {
    let config = json!({
      "target": ["Token", "dep.Registry", "0x0000000000000000000000000000000000000001"],
      "func": "init",
      "args": ["<%= contracts.Vault.address %>"],
    });
    let deps: Vec<_> = InvokeAction.compute_dependencies(&config).into_iter().collect();
    assert_eq!(deps, vec!["contracts.Token", "contracts.Vault", "imports.dep"]);
  }

  #[test]
  fn outputs_cover_factories_and_extras() {
    let config = json!({
      "target": "Factory",
      "func": "create",
      "factory": { "Pool": { "event": "Created" } },
      "extra": { "poolId": { "event": "Created", "arg": 1 } },
    });
    assert_eq!(
      InvokeAction.outputs("make", &config),
      vec!["txns.make", "contracts.Pool", "extras.poolId"]
    );
  }

  #[test]
  fn validate_rejects_bad_targets() {
    let issues = InvokeAction.validate(&json!({ "target": ["bad..path"], "func": "" }));
    let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
    assert_eq!(fields, vec!["target", "func"]);

    let issues = InvokeAction.validate(&json!({ "func": "x" }));
    assert_eq!(issues.len(), 1);
    assert!(issues[0].message.contains("target"));
  }

  #[tokio::test]
  async fn single_target_invokes_directly() {
    let chain = Arc::new(MemoryChain::new(13370));
    let env = exec_env(chain.clone(), MemoryArtifacts::new());
    let mut ctx = build_ctx();
    ctx.artifacts.contracts.insert("Token".into(), contract_data("Token", "0x00000000000000000000000000000000000000aa"));

    let step = node("invoke.mint", json!({ "target": "Token", "func": "mint", "args": [5] }));
    let artifacts = InvokeAction.execute(&step, &ctx, &env).await.unwrap();

    let tx = &chain.transactions()[0];
    assert_eq!(tx.to.as_deref(), Some("0x00000000000000000000000000000000000000aa"));
    assert_eq!(artifacts.txns["mint"].deployed_on, "invoke.mint");
  }

  #[tokio::test]
  async fn several_targets_are_batched() {
    let chain = Arc::new(MemoryChain::new(13370));
    let env = exec_env(chain.clone(), MemoryArtifacts::new());
    let mut ctx = build_ctx();
    ctx.artifacts.contracts.insert("A".into(), contract_data("A", "0x000000000000000000000000000000000000000a"));
    ctx.artifacts.contracts.insert("B".into(), contract_data("B", "0x000000000000000000000000000000000000000b"));

    let step = node("invoke.pause", json!({ "target": ["A", "B"], "func": "pause" }));
    InvokeAction.execute(&step, &ctx, &env).await.unwrap();

    let tx = &chain.transactions()[0];
    assert_eq!(tx.to.as_deref(), Some(MULTICALL3_ADDRESS));
    let TxPayload::Invoke { method, args } = &tx.payload else {
      panic!("expected invoke");
    };
    assert_eq!(method, "aggregate3Value");
    assert_eq!(args[0].as_array().unwrap().len(), 2);
  }

  #[tokio::test]
  async fn factory_and_extra_read_events() {
    let chain = Arc::new(MemoryChain::new(13370));
    chain.emit_on("create", "Created", vec![json!("0x00000000000000000000000000000000000000cc"), json!(42)]);
    let env = exec_env(chain.clone(), MemoryArtifacts::new().with("Pool", "0x60"));
    let mut ctx = build_ctx();
    ctx.artifacts.contracts.insert("Factory".into(), contract_data("Factory", "0x00000000000000000000000000000000000000ff"));

    let step = node(
      "invoke.make",
      json!({
        "target": "Factory",
        "func": "create",
        "factory": { "Pool": { "event": "Created", "arg": 0 } },
        "extra": { "poolId": { "event": "Created", "arg": 1 } },
      }),
    );
    let artifacts = InvokeAction.execute(&step, &ctx, &env).await.unwrap();

    assert_eq!(artifacts.contracts["Pool"].address, "0x00000000000000000000000000000000000000cc");
    assert_eq!(artifacts.extras["poolId"], json!(42));
    assert_eq!(artifacts.txns["make"].events["Created"].len(), 1);
  }

  #[tokio::test]
  async fn missing_target_contract_fails() {
    let env = exec_env(Arc::new(MemoryChain::new(13370)), MemoryArtifacts::new());
    let step = node("invoke.x", json!({ "target": "Ghost", "func": "f" }));
    let err = InvokeAction.execute(&step, &build_ctx(), &env).await.unwrap_err();
    assert!(matches!(err, ActionError::MissingContract(name) if name == "Ghost"));
  }

  #[tokio::test]
  async fn missing_event_fails() {
    let env = exec_env(Arc::new(MemoryChain::new(13370)), MemoryArtifacts::new());
    let step = node(
      "invoke.x",
      json!({
        "target": "0x00000000000000000000000000000000000000ff",
        "func": "f",
        "extra": { "id": { "event": "Nope" } },
      }),
    );
    let err = InvokeAction.execute(&step, &build_ctx(), &env).await.unwrap_err();
    assert!(matches!(err, ActionError::MissingEvent { .. }));
  }
}
