//! Step handlers.
//!
//! Every step kind is implemented by an [`ActionHandler`] registered in an
//! [`ActionRegistry`] under its kind name. The built-in kinds live in
//! [`actions`]:
//!
//! - `contract` - deploy a compiled contract
//! - `invoke` - call methods on deployed contracts, optionally batched
//! - `import` - pull another package's outputs from a registry
//! - `run` - run an external command that reports artifacts as JSON
//! - `var` - compute named values from templates
//!
//! Handlers never see raw step documents outside their own config, and only
//! touch the chain through the [`ExecutionEnv`] they are given.

pub mod actions;
mod artifacts;
mod types;

pub use artifacts::{ArtifactError, ArtifactSource, ContractArtifact, DirArtifacts, MemoryArtifacts};
pub use types::*;

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::build::BuildContext;
use crate::bundle::ChainArtifacts;
use crate::definition::ActionNode;
use crate::provider::Provider;
use crate::registry::PackageLoader;
use crate::template;
use crate::util::hash::{ContentHash, FieldHasher, Hashable};

/// External collaborators available to handlers during a build.
#[derive(Clone)]
pub struct ExecutionEnv {
  pub provider: Arc<dyn Provider>,
  pub artifacts: Arc<dyn ArtifactSource>,
  /// Needed by `import` steps.
  pub packages: Option<Arc<PackageLoader>>,
  /// Default sender for transactions.
  pub signer: Option<String>,
  /// Working directory for `run` steps and their `modified` files.
  pub workdir: PathBuf,
}

impl ExecutionEnv {
  pub fn new(provider: Arc<dyn Provider>, artifacts: Arc<dyn ArtifactSource>) -> Self {
    Self {
      provider,
      artifacts,
      packages: None,
      signer: None,
      workdir: PathBuf::from("."),
    }
  }

  pub fn with_packages(mut self, packages: Arc<PackageLoader>) -> Self {
    self.packages = Some(packages);
    self
  }

  pub fn with_signer(mut self, signer: Option<String>) -> Self {
    self.signer = signer;
    self
  }

  pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
    self.workdir = workdir.into();
    self
  }
}

/// The capability contract every step kind implements.
#[async_trait]
pub trait ActionHandler: Send + Sync {
  /// Schema-check a raw config. Problems are returned, never raised, so a
  /// definition can report every issue at once.
  fn validate(&self, config: &Value) -> Vec<ValidationIssue>;

  /// Output paths this step reads (`contracts.Token`, `imports.dep`,
  /// `settings.owner`, ...).
  fn compute_dependencies(&self, config: &Value) -> BTreeSet<String> {
    template_dependencies(config)
  }

  /// Output paths this step produces.
  fn outputs(&self, label: &str, config: &Value) -> Vec<String>;

  /// Hash of everything the step's effect depends on besides its
  /// dependencies' state.
  async fn compute_state_fingerprint(
    &self,
    node: &ActionNode,
    ctx: &BuildContext,
    _env: &ExecutionEnv,
  ) -> Result<ContentHash, ActionError> {
    resolved_config_hash(&node.config, ctx)
  }

  /// Perform the step's effect.
  async fn execute(
    &self,
    node: &ActionNode,
    ctx: &BuildContext,
    env: &ExecutionEnv,
  ) -> Result<ChainArtifacts, ActionError>;
}

/// Kind name to handler table.
#[derive(Clone, Default)]
pub struct ActionRegistry {
  handlers: BTreeMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Registry with every built-in kind.
  pub fn builtin() -> Self {
    let table: [(ActionKind, Arc<dyn ActionHandler>); 5] = [
      (ActionKind::Contract, Arc::new(actions::ContractAction)),
      (ActionKind::Invoke, Arc::new(actions::InvokeAction)),
      (ActionKind::Import, Arc::new(actions::ImportAction)),
      (ActionKind::Run, Arc::new(actions::RunAction)),
      (ActionKind::Var, Arc::new(actions::VarAction)),
    ];

    let handlers = table
      .into_iter()
      .map(|(kind, handler)| (kind.as_str().to_string(), handler))
      .collect();
    Self { handlers }
  }

  pub fn register(&mut self, kind: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Result<(), ActionRegistryError> {
    let kind = kind.into();
    if self.handlers.contains_key(&kind) {
      return Err(ActionRegistryError::DuplicateActionKind(kind));
    }
    self.handlers.insert(kind, handler);
    Ok(())
  }

  pub fn get(&self, kind: &str) -> Option<&Arc<dyn ActionHandler>> {
    self.handlers.get(kind)
  }

  pub fn contains(&self, kind: &str) -> bool {
    self.handlers.contains_key(kind)
  }

  pub fn kinds(&self) -> impl Iterator<Item = &str> {
    self.handlers.keys().map(String::as_str)
  }
}

/// Template references anywhere in a config. Malformed templates are
/// skipped here; `validate` reports them.
pub fn template_dependencies(config: &Value) -> BTreeSet<String> {
  let mut refs = BTreeSet::new();
  let _ = template::collect_references(config, &mut refs);
  refs
}

/// Hash of a config after template resolution.
pub fn resolved_config_hash(config: &Value, ctx: &BuildContext) -> Result<ContentHash, ActionError> {
  let resolved = template::render_value(config, &ctx.scope())?;
  Ok(resolved.compute_hash()?)
}

/// Combine a resolved config hash with handler-specific inputs.
pub fn extend_fingerprint(config_hash: &ContentHash, extras: &[(&str, &str)]) -> ContentHash {
  extras
    .iter()
    .fold(FieldHasher::new().field("config", config_hash.as_str()), |h, (label, value)| {
      h.field(label, value)
    })
    .finish()
}

/// Deserialize a typed config.
pub(crate) fn parse_config<T: DeserializeOwned>(config: &Value) -> Result<T, ActionError> {
  serde_json::from_value(config.clone()).map_err(|e| ActionError::InvalidConfig(e.to_string()))
}

/// Schema issues for a typed config, plus malformed templates.
pub(crate) fn shape_issues<T: DeserializeOwned>(config: &Value) -> (Option<T>, Vec<ValidationIssue>) {
  let mut issues = Vec::new();
  if let Err(err) = template::collect_references(config, &mut BTreeSet::new()) {
    issues.push(ValidationIssue::new("", err.to_string()));
  }
  match serde_json::from_value::<T>(config.clone()) {
    Ok(parsed) => (Some(parsed), issues),
    Err(err) => {
      issues.push(ValidationIssue::new("", err.to_string()));
      (None, issues)
    }
  }
}

/// Render a value and require a string result.
pub(crate) fn render_string(value: &str, ctx_scope: &Value, field: &str) -> Result<String, ActionError> {
  match template::render(value, ctx_scope)? {
    Value::String(s) => Ok(s),
    Value::Number(n) => Ok(n.to_string()),
    other => Err(ActionError::InvalidConfig(format!(
      "{} must render to a string, got {}",
      field, other
    ))),
  }
}

/// Render an optional wei amount to a decimal string.
pub(crate) fn render_wei(value: Option<&Value>, ctx_scope: &Value) -> Result<Option<String>, ActionError> {
  let Some(value) = value else {
    return Ok(None);
  };
  let rendered = template::render_value(value, ctx_scope)?;
  let wei = match &rendered {
    Value::String(s) => s.clone(),
    Value::Number(n) if n.is_u64() => n.to_string(),
    other => {
      return Err(ActionError::InvalidConfig(format!("value must be a wei amount, got {}", other)));
    }
  };
  if wei.is_empty() || !wei.bytes().all(|b| b.is_ascii_digit()) {
    return Err(ActionError::InvalidConfig(format!(
      "value must be a decimal wei amount, got {:?}",
      wei
    )));
  }
  Ok(Some(wei))
}

/// Issue for a literal (non-template) wei amount that is not decimal.
pub(crate) fn wei_issue(value: Option<&Value>) -> Option<ValidationIssue> {
  match value? {
    Value::String(s) if template::has_template(s) => None,
    Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => None,
    Value::Number(n) if n.is_u64() => None,
    other => Some(ValidationIssue::new("value", format!("must be a decimal wei amount, got {}", other))),
  }
}
