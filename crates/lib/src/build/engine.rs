//! Incremental build execution.
//!
//! Steps run wave by wave in the definition's dependency order, with up to
//! `parallelism` steps of one wave in flight. Every step is fingerprinted
//! first; a step whose fingerprint matches its state in the prior bundle is
//! reused without executing. A failed step stops later waves from being
//! scheduled, while the rest of its own wave finishes and is recorded.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::context::BuildContext;
use super::types::{BuildError, BuildOutcome, BuildPhase, BuildReport, BuildRequest, NodeFailure, NodeStatus};
use crate::action::{ActionError, ActionHandler, ActionRegistry, ExecutionEnv, ValidationIssue};
use crate::bundle::{BundleMeta, BundleStatus, DeploymentBundle, PackageInfo, StepState};
use crate::consts::GENERATOR;
use crate::definition::{ActionNode, ChainDefinition, DefinitionError};
use crate::util::hash::{ContentHash, FieldHasher};

/// State shared by [`build`] and [`plan_build`](super::plan_build) once the
/// request has been checked against the definition.
pub(super) struct Prepared<'a> {
  pub handlers: BTreeMap<String, Arc<dyn ActionHandler>>,
  pub prior: Option<&'a DeploymentBundle>,
  pub ctx: BuildContext,
}

pub(super) fn prepare<'a>(
  definition: &ChainDefinition,
  registry: &ActionRegistry,
  request: &'a BuildRequest,
) -> Result<Prepared<'a>, BuildError> {
  let mut issues = Vec::new();
  let mut handlers = BTreeMap::new();
  for node in definition.nodes() {
    match registry.get(&node.kind) {
      Some(handler) => {
        handlers.insert(node.key.clone(), handler.clone());
      }
      None => issues.push(ValidationIssue::new("", format!("unknown action kind '{}'", node.kind)).at(&node.key)),
    }
  }
  if !issues.is_empty() {
    return Err(DefinitionError::Validation(issues).into());
  }

  let settings = resolve_settings(definition, &request.settings)?;
  let package = definition.package();
  let prior = request.prior.as_ref().filter(|prior| {
    let usable = prior.meta.chain_id == request.chain_id
      && prior.meta.package.name == package.name
      && prior.meta.package.preset == package.preset;
    if !usable {
      warn!(
        prior = %prior.meta.package.name,
        prior_chain = prior.meta.chain_id,
        chain = request.chain_id,
        "prior bundle is for another package or chain, ignoring it"
      );
    }
    usable
  });

  let timestamp = request
    .options
    .timestamp
    .or(prior.map(|p| p.meta.timestamp))
    .unwrap_or_else(unix_now);

  let ctx = BuildContext::new(
    request.chain_id,
    timestamp,
    PackageInfo {
      name: package.name.clone(),
      version: package.version.clone(),
      preset: package.preset.clone(),
    },
    settings,
  );

  Ok(Prepared { handlers, prior, ctx })
}

/// Declared defaults overlaid with the request's overrides.
fn resolve_settings(
  definition: &ChainDefinition,
  overrides: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>, BuildError> {
  if let Some(unknown) = overrides.keys().find(|name| !definition.settings().contains_key(*name)) {
    return Err(BuildError::UnknownSetting(unknown.clone()));
  }

  definition
    .settings()
    .iter()
    .map(|(name, def)| {
      overrides
        .get(name)
        .or(def.default.as_ref())
        .map(|value| (name.clone(), value.clone()))
        .ok_or_else(|| BuildError::MissingSetting(name.clone()))
    })
    .collect()
}

fn unix_now() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_secs())
    .unwrap_or(0)
}

/// Hash over the sorted `(dependency key, dependency state hash)` pairs.
pub(super) fn context_hash(node: &ActionNode, states: &BTreeMap<String, StepState>) -> Result<ContentHash, ActionError> {
  let mut hasher = FieldHasher::new();
  for dep in &node.depends_on {
    let state = states
      .get(dep)
      .ok_or_else(|| ActionError::MissingDependencyState(dep.clone()))?;
    hasher = hasher.field(dep, state.state_hash()?.as_str());
  }
  Ok(hasher.finish())
}

pub(super) fn node_fingerprint(kind: &str, config_hash: &ContentHash, context_hash: &ContentHash) -> ContentHash {
  FieldHasher::new()
    .field("kind", kind)
    .field("config", config_hash.as_str())
    .field("context", context_hash.as_str())
    .finish()
}

enum NodeRun {
  Reused(StepState),
  Executed(StepState),
}

/// One step, with everything it needs to run detached from the engine.
struct NodeTask {
  node: ActionNode,
  handler: Arc<dyn ActionHandler>,
  ctx: Arc<BuildContext>,
  env: ExecutionEnv,
  prior: Option<StepState>,
  context_hash: Result<ContentHash, ActionError>,
}

impl NodeTask {
  async fn run(self) -> Result<NodeRun, ActionError> {
    let NodeTask {
      node,
      handler,
      ctx,
      env,
      prior,
      context_hash,
    } = self;

    let context_hash = context_hash?;
    let config_hash = handler.compute_state_fingerprint(&node, &ctx, &env).await?;
    let fingerprint = node_fingerprint(&node.kind, &config_hash, &context_hash);

    if let Some(prior) = &prior
      && prior.fingerprint == fingerprint
    {
      return Ok(NodeRun::Reused(prior.clone()));
    }

    debug!(node = %node.key, fingerprint = %fingerprint.short(), "executing step");
    let artifacts = handler.execute(&node, &ctx, &env).await?;

    Ok(NodeRun::Executed(StepState {
      node_key: node.key.clone(),
      config_hash,
      context_hash,
      fingerprint,
      artifacts,
      version: prior.map_or(1, |p| p.version + 1),
    }))
  }
}

/// Build `definition`, reusing every step of `request.prior` whose
/// fingerprint is unchanged.
///
/// Step failures do not make this return an error: the outcome then carries
/// a partial bundle and the failures in its report. Errors are reserved for
/// problems found before any step runs.
pub async fn build(
  definition: &ChainDefinition,
  registry: &ActionRegistry,
  env: &ExecutionEnv,
  request: &BuildRequest,
) -> Result<BuildOutcome, BuildError> {
  let mut phase = BuildPhase::Planning;
  debug!(phase = ?phase, package = %definition.package().name, "preparing build");
  let Prepared {
    handlers,
    prior,
    mut ctx,
  } = prepare(definition, registry, request)?;

  let waves = definition.execution_waves();
  info!(
    package = %definition.package().name,
    chain = request.chain_id,
    nodes = definition.len(),
    waves = waves.len(),
    incremental = prior.is_some(),
    "starting build"
  );

  let mut statuses: BTreeMap<String, NodeStatus> = definition
    .nodes()
    .map(|node| (node.key.clone(), NodeStatus::Pending))
    .collect();
  let mut states: BTreeMap<String, StepState> = BTreeMap::new();
  let mut failures: Vec<NodeFailure> = Vec::new();
  let semaphore = Arc::new(Semaphore::new(request.options.parallelism.max(1)));

  phase = BuildPhase::Running;
  for (wave_idx, wave) in waves.iter().enumerate() {
    if !failures.is_empty() {
      break;
    }
    debug!(phase = ?phase, wave = wave_idx, nodes = wave.len(), "executing wave");

    let snapshot = Arc::new(ctx.clone());
    let mut join_set = JoinSet::new();

    for key in wave {
      let (Some(node), Some(handler)) = (definition.node(key), handlers.get(key)) else {
        continue;
      };
      statuses.insert(key.clone(), NodeStatus::Executing);

      let task = NodeTask {
        node: node.clone(),
        handler: handler.clone(),
        ctx: snapshot.clone(),
        env: env.clone(),
        prior: prior.and_then(|p| p.state.get(key)).cloned(),
        context_hash: context_hash(node, &states),
      };
      let semaphore = semaphore.clone();

      join_set.spawn(async move {
        let _permit = semaphore.acquire_owned().await.ok();
        let key = task.node.key.clone();
        (key, task.run().await)
      });
    }

    let mut results = BTreeMap::new();
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((key, result)) => {
          results.insert(key, result);
        }
        Err(err) => error!(error = %err, "step task panicked"),
      }
    }

    // Results are applied in key order so the context is independent of
    // completion order.
    for key in wave {
      let result = results
        .remove(key)
        .unwrap_or_else(|| Err(ActionError::TaskAborted(key.clone())));

      match result {
        Ok(NodeRun::Reused(state)) => {
          debug!(node = %key, version = state.version, "step unchanged, reusing prior state");
          statuses.insert(key.clone(), NodeStatus::Skipped);
          ctx.artifacts.merge(state.artifacts.clone());
          states.insert(key.clone(), state);
        }
        Ok(NodeRun::Executed(state)) => {
          info!(node = %key, version = state.version, "step executed");
          statuses.insert(key.clone(), NodeStatus::Done);
          ctx.artifacts.merge(state.artifacts.clone());
          states.insert(key.clone(), state);
        }
        Err(error) => {
          error!(node = %key, error = %error, "step failed");
          statuses.insert(key.clone(), NodeStatus::Failed);
          failures.push(NodeFailure {
            node: key.clone(),
            error,
          });
        }
      }
    }
  }

  // Steps that failed or were never reached keep their last good state.
  if let Some(prior) = prior {
    for (key, status) in &statuses {
      if matches!(status, NodeStatus::Pending | NodeStatus::Failed)
        && let Some(state) = prior.state.get(key)
      {
        states.insert(key.clone(), state.clone());
      }
    }
  }

  let executed = statuses.values().filter(|s| **s == NodeStatus::Done).count();

  phase = if failures.is_empty() {
    BuildPhase::Complete
  } else {
    BuildPhase::PartialFailure
  };

  let bundle = DeploymentBundle {
    definition: definition.serialize(),
    state: states,
    meta: BundleMeta {
      chain_id: request.chain_id,
      // The value templates resolved against, so the next build sees it again.
      timestamp: ctx.timestamp,
      generator: GENERATOR.to_string(),
      package: ctx.package.clone(),
      status: if failures.is_empty() {
        BundleStatus::Complete
      } else {
        BundleStatus::Partial
      },
      failed_node: failures.first().map(|f| f.node.clone()),
      misc: BTreeMap::new(),
    },
  };

  info!(
    phase = ?phase,
    executed,
    reused = statuses.values().filter(|s| **s == NodeStatus::Skipped).count(),
    failed = failures.len(),
    "build finished"
  );

  Ok(BuildOutcome {
    bundle,
    report: BuildReport {
      phase,
      nodes: statuses,
      failures,
    },
  })
}
