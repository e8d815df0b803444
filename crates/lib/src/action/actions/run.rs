//! `run.<label>`: run an external command that reports artifacts on stdout.
//!
//! The command runs with a cleared environment. Only `PATH`, a fixed locale,
//! the build context as JSON in `CHAINBUILD_CONTEXT`, and the step's own
//! `env` table are visible to it. Its stdout must be empty or a JSON
//! `ChainArtifacts` document that only touches the declared `outputs`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;
use tracing::{debug, info};

use crate::action::{
  ActionError, ActionHandler, ExecutionEnv, ValidationIssue, extend_fingerprint, parse_config, render_string,
  resolved_config_hash, shape_issues,
};
use crate::build::BuildContext;
use crate::bundle::ChainArtifacts;
use crate::consts::RUN_CONTEXT_ENV;
use crate::definition::{ActionNode, validate_label};
use crate::util::hash::{ContentHash, hash_file};

const NAMESPACES: [&str; 4] = ["contracts", "txns", "imports", "extras"];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RunConfig {
  exec: String,
  #[serde(default)]
  args: Vec<String>,
  #[serde(default)]
  env: BTreeMap<String, String>,
  /// Files, relative to the working directory, whose contents feed the
  /// fingerprint.
  #[serde(default)]
  modified: Vec<String>,
  #[serde(default)]
  outputs: Vec<String>,
}

fn output_issue(output: &str) -> Option<String> {
  let Some((namespace, name)) = output.split_once('.') else {
    return Some(format!("{:?} must look like <namespace>.<name>", output));
  };
  if !NAMESPACES.contains(&namespace) {
    return Some(format!("unknown namespace {:?}", namespace));
  }
  validate_label(name).err().map(|e| format!("{:?}: {}", output, e))
}

pub struct RunAction;

#[async_trait]
impl ActionHandler for RunAction {
  fn validate(&self, config: &Value) -> Vec<ValidationIssue> {
    let (parsed, mut issues) = shape_issues::<RunConfig>(config);
    let Some(cfg) = parsed else {
      return issues;
    };

    if cfg.exec.trim().is_empty() {
      issues.push(ValidationIssue::new("exec", "must not be empty"));
    }
    if cfg.env.contains_key(RUN_CONTEXT_ENV) {
      issues.push(ValidationIssue::new(
        "env",
        format!("{} is set by the builder", RUN_CONTEXT_ENV),
      ));
    }
    for path in &cfg.modified {
      if path.is_empty() {
        issues.push(ValidationIssue::new("modified", "paths must not be empty"));
      }
    }
    for output in &cfg.outputs {
      if let Some(message) = output_issue(output) {
        issues.push(ValidationIssue::new("outputs", message));
      }
    }
    issues
  }

  fn outputs(&self, _label: &str, config: &Value) -> Vec<String> {
    config
      .get("outputs")
      .and_then(Value::as_array)
      .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
      .unwrap_or_default()
  }

  async fn compute_state_fingerprint(
    &self,
    node: &ActionNode,
    ctx: &BuildContext,
    env: &ExecutionEnv,
  ) -> Result<ContentHash, ActionError> {
    let cfg: RunConfig = parse_config(&node.config)?;
    let config_hash = resolved_config_hash(&node.config, ctx)?;

    let mut modified = cfg.modified.clone();
    modified.sort();
    modified.dedup();
    let mut files = Vec::with_capacity(modified.len());
    for path in &modified {
      let hash = hash_file(&env.workdir.join(path))?;
      files.push(format!("{}={}", path, hash));
    }

    Ok(extend_fingerprint(&config_hash, &[("modified", &files.join("\n"))]))
  }

  async fn execute(
    &self,
    node: &ActionNode,
    ctx: &BuildContext,
    env: &ExecutionEnv,
  ) -> Result<ChainArtifacts, ActionError> {
    let cfg: RunConfig = parse_config(&node.config)?;
    let scope = ctx.scope();

    let program = render_string(&cfg.exec, &scope, "exec")?;
    let args = cfg
      .args
      .iter()
      .map(|arg| render_string(arg, &scope, "args"))
      .collect::<Result<Vec<_>, _>>()?;
    let context_json = serde_json::to_string(&scope)?;

    info!(step = %node.key, cmd = %program, "running command");

    let mut command = Command::new(&program);
    command
      .args(&args)
      .current_dir(&env.workdir)
      .env_clear()
      .env("LANG", "C")
      .env("LC_ALL", "C")
      .env(RUN_CONTEXT_ENV, context_json);
    if let Some(path) = std::env::var_os("PATH") {
      command.env("PATH", path);
    }
    for (key, value) in &cfg.env {
      command.env(key, render_string(value, &scope, "env")?);
    }

    debug!(step = %node.key, args = ?args, workdir = ?env.workdir, "spawning process");
    let output = command.output().await?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !stderr.is_empty() {
      debug!(step = %node.key, stderr = %stderr, "command stderr");
    }

    if !output.status.success() {
      return Err(ActionError::CommandFailed {
        cmd: program,
        code: output.status.code(),
        stderr,
      });
    }

    if stdout.is_empty() {
      return Ok(ChainArtifacts::default());
    }

    let mut artifacts: ChainArtifacts = serde_json::from_str(&stdout).map_err(|e| ActionError::CommandOutput {
      cmd: program.clone(),
      message: e.to_string(),
    })?;

    if let Some(output) = artifacts
      .output_paths()
      .into_iter()
      .find(|path| !cfg.outputs.contains(path))
    {
      return Err(ActionError::UndeclaredOutput { cmd: program, output });
    }

    for contract in artifacts.contracts.values_mut() {
      contract.deployed_on = node.key.clone();
    }
    for txn in artifacts.txns.values_mut() {
      txn.deployed_on = node.key.clone();
    }
    Ok(artifacts)
  }
}
