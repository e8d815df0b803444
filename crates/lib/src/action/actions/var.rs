//! `var.<label>`: named values computed from templates.
//!
//! ```toml
//! [var.addresses]
//! vault = "<%= contracts.Vault.address %>"
//! fee = 30
//! ```
//!
//! Each entry becomes `extras.<name>`.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::action::{ActionError, ActionHandler, ExecutionEnv, ValidationIssue, shape_issues};
use crate::build::BuildContext;
use crate::bundle::ChainArtifacts;
use crate::definition::{ActionNode, validate_label};
use crate::template;

type VarConfig = serde_json::Map<String, Value>;

pub struct VarAction;

#[async_trait]
impl ActionHandler for VarAction {
  fn validate(&self, config: &Value) -> Vec<ValidationIssue> {
    let (parsed, mut issues) = shape_issues::<VarConfig>(config);
    let Some(vars) = parsed else {
      return issues;
    };
    if vars.is_empty() {
      issues.push(ValidationIssue::new("", "at least one variable is required"));
    }
    for name in vars.keys() {
      if let Err(reason) = validate_label(name) {
        issues.push(ValidationIssue::new(name.as_str(), reason.to_string()));
      }
    }
    issues
  }

  fn outputs(&self, _label: &str, config: &Value) -> Vec<String> {
    config
      .as_object()
      .map(|vars| vars.keys().map(|name| format!("extras.{}", name)).collect())
      .unwrap_or_default()
  }

  async fn execute(
    &self,
    node: &ActionNode,
    ctx: &BuildContext,
    _env: &ExecutionEnv,
  ) -> Result<ChainArtifacts, ActionError> {
    let Value::Object(vars) = template::render_value(&node.config, &ctx.scope())? else {
      return Err(ActionError::InvalidConfig("var config must be a table".into()));
    };

    let mut artifacts = ChainArtifacts::default();
    for (name, value) in vars {
      debug!(step = %node.key, name = %name, "variable computed");
      artifacts.extras.insert(name, value);
    }
    Ok(artifacts)
  }
}
