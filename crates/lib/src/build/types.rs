//! Types for running builds.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::action::ActionError;
use crate::bundle::DeploymentBundle;
use crate::definition::DefinitionError;

/// Lifecycle of one step within a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
  /// Not reached yet. Steps still pending when a build stops keep their
  /// prior state.
  Pending,
  /// Fingerprint matched the prior state; reused without executing.
  Skipped,
  Executing,
  Done,
  Failed,
}

/// Lifecycle of a whole build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
  Planning,
  Running,
  Complete,
  PartialFailure,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
  /// Maximum steps executing at once.
  pub parallelism: usize,
  /// Fixed build timestamp (unix seconds) instead of the current time.
  pub timestamp: Option<u64>,
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self {
      parallelism: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4),
      timestamp: None,
    }
  }
}

/// Everything a build needs besides the definition and the handlers.
#[derive(Debug, Clone)]
pub struct BuildRequest {
  pub chain_id: u64,
  /// Setting overrides. Every name must be declared by the definition.
  pub settings: BTreeMap<String, String>,
  /// The last build of this package, if any. Matching steps are reused.
  pub prior: Option<DeploymentBundle>,
  pub options: BuildOptions,
}

impl BuildRequest {
  pub fn new(chain_id: u64) -> Self {
    Self {
      chain_id,
      settings: BTreeMap::new(),
      prior: None,
      options: BuildOptions::default(),
    }
  }

  pub fn with_setting(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.settings.insert(name.into(), value.into());
    self
  }

  pub fn with_prior(mut self, prior: Option<DeploymentBundle>) -> Self {
    self.prior = prior;
    self
  }

  pub fn with_options(mut self, options: BuildOptions) -> Self {
    self.options = options;
    self
  }
}

#[derive(Debug)]
pub struct NodeFailure {
  pub node: String,
  pub error: ActionError,
}

/// What happened to each step.
#[derive(Debug)]
pub struct BuildReport {
  pub phase: BuildPhase,
  pub nodes: BTreeMap<String, NodeStatus>,
  /// Failed steps in key order. Several steps of one wave may fail together.
  pub failures: Vec<NodeFailure>,
}

impl BuildReport {
  pub fn executed(&self) -> impl Iterator<Item = &str> {
    self.with_status(NodeStatus::Done)
  }

  pub fn skipped(&self) -> impl Iterator<Item = &str> {
    self.with_status(NodeStatus::Skipped)
  }

  pub fn with_status(&self, status: NodeStatus) -> impl Iterator<Item = &str> {
    self
      .nodes
      .iter()
      .filter(move |(_, s)| **s == status)
      .map(|(key, _)| key.as_str())
  }

  pub fn is_complete(&self) -> bool {
    self.phase == BuildPhase::Complete
  }
}

/// A finished build. Returned for partial failures too: the bundle then
/// holds every state computed before the failure.
#[derive(Debug)]
pub struct BuildOutcome {
  pub bundle: DeploymentBundle,
  pub report: BuildReport,
}

/// Problems found before any step runs.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Definition(#[from] DefinitionError),

  #[error("unknown setting '{0}'")]
  UnknownSetting(String),

  #[error("setting '{0}' has no default and no value was given")]
  MissingSetting(String),
}
