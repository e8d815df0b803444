//! Dry-run of a build: which steps would execute and which would be reused.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use super::engine::{Prepared, context_hash, node_fingerprint, prepare};
use super::types::{BuildError, BuildRequest};
use crate::action::{ActionRegistry, ExecutionEnv};
use crate::bundle::StepState;
use crate::definition::ChainDefinition;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum PlanReason {
  /// No prior state for this step.
  New,
  /// The step's own inputs changed.
  FingerprintChanged,
  /// A dependency will execute, so this step's inputs are not known yet.
  DependencyChanged(String),
  /// The fingerprint could not be computed, e.g. an import that does not
  /// resolve yet. The build will try and likely fail here.
  Unresolved(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanAction {
  Reuse { version: u64 },
  Execute(PlanReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedNode {
  pub key: String,
  #[serde(flatten)]
  pub action: PlanAction,
}

/// Steps in execution order with their predicted outcome.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildPlan {
  pub nodes: Vec<PlannedNode>,
}

impl BuildPlan {
  pub fn to_execute(&self) -> impl Iterator<Item = &PlannedNode> {
    self.nodes.iter().filter(|n| matches!(n.action, PlanAction::Execute(_)))
  }

  pub fn reused(&self) -> impl Iterator<Item = &PlannedNode> {
    self.nodes.iter().filter(|n| matches!(n.action, PlanAction::Reuse { .. }))
  }

  /// Whether a build would change nothing.
  pub fn is_noop(&self) -> bool {
    self.to_execute().next().is_none()
  }
}

/// Predict what [`build`](super::build) would do, without sending anything
/// to the chain.
///
/// Fingerprints are computed only for steps whose dependencies are all
/// reused; anything downstream of an executing step is reported as
/// [`PlanReason::DependencyChanged`].
pub async fn plan_build(
  definition: &ChainDefinition,
  registry: &ActionRegistry,
  env: &ExecutionEnv,
  request: &BuildRequest,
) -> Result<BuildPlan, BuildError> {
  let Prepared {
    handlers,
    prior,
    mut ctx,
  } = prepare(definition, registry, request)?;

  let mut reused: BTreeMap<String, StepState> = BTreeMap::new();
  let mut plan = BuildPlan::default();

  for key in definition.topological_order() {
    let (Some(node), Some(handler)) = (definition.node(key), handlers.get(key)) else {
      continue;
    };

    let action = if let Some(dep) = node.depends_on.iter().find(|dep| !reused.contains_key(*dep)) {
      PlanAction::Execute(PlanReason::DependencyChanged(dep.clone()))
    } else {
      match prior.and_then(|p| p.state.get(key)) {
        None => PlanAction::Execute(PlanReason::New),
        Some(prior_state) => {
          let fingerprint = match context_hash(node, &reused) {
            Ok(context) => handler
              .compute_state_fingerprint(node, &ctx, env)
              .await
              .map(|config| node_fingerprint(&node.kind, &config, &context)),
            Err(err) => Err(err),
          };
          match fingerprint {
            Ok(fingerprint) if fingerprint == prior_state.fingerprint => {
              ctx.artifacts.merge(prior_state.artifacts.clone());
              reused.insert(key.clone(), prior_state.clone());
              PlanAction::Reuse {
                version: prior_state.version,
              }
            }
            Ok(_) => PlanAction::Execute(PlanReason::FingerprintChanged),
            Err(err) => PlanAction::Execute(PlanReason::Unresolved(err.to_string())),
          }
        }
      }
    };

    debug!(node = %key, action = ?action, "planned step");
    plan.nodes.push(PlannedNode {
      key: key.clone(),
      action,
    });
  }

  Ok(plan)
}
