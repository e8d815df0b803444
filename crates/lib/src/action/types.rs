use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::artifacts::ArtifactError;
use crate::multicall::MulticallError;
use crate::provider::ProviderError;
use crate::registry::LoadError;
use crate::template::TemplateError;
use crate::util::hash::FileHashError;

/// The built-in step kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
  Contract,
  Invoke,
  Import,
  Run,
  Var,
}

impl ActionKind {
  pub const ALL: [ActionKind; 5] = [
    ActionKind::Contract,
    ActionKind::Invoke,
    ActionKind::Import,
    ActionKind::Run,
    ActionKind::Var,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      ActionKind::Contract => "contract",
      ActionKind::Invoke => "invoke",
      ActionKind::Import => "import",
      ActionKind::Run => "run",
      ActionKind::Var => "var",
    }
  }
}

impl fmt::Display for ActionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ActionKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ActionKind::ALL
      .into_iter()
      .find(|kind| kind.as_str() == s)
      .ok_or_else(|| format!("unknown action kind: {}", s))
  }
}

/// A field-level problem found while validating a definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
  /// Step key, or empty for document-level issues.
  pub node: String,
  pub field: String,
  pub message: String,
}

impl ValidationIssue {
  pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      node: String::new(),
      field: field.into(),
      message: message.into(),
    }
  }

  pub fn at(mut self, node: impl Into<String>) -> Self {
    self.node = node.into();
    self
  }
}

impl fmt::Display for ValidationIssue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (self.node.is_empty(), self.field.is_empty()) {
      (true, true) => write!(f, "{}", self.message),
      (true, false) => write!(f, "{}: {}", self.field, self.message),
      (false, true) => write!(f, "{}: {}", self.node, self.message),
      (false, false) => write!(f, "{}.{}: {}", self.node, self.field, self.message),
    }
  }
}

#[derive(Debug, Error)]
pub enum ActionRegistryError {
  #[error("action kind '{0}' is already registered")]
  DuplicateActionKind(String),
}

/// Failures while fingerprinting or executing a step.
#[derive(Debug, Error)]
pub enum ActionError {
  #[error("invalid config: {0}")]
  InvalidConfig(String),

  #[error(transparent)]
  Template(#[from] TemplateError),

  #[error(transparent)]
  Provider(#[from] ProviderError),

  #[error(transparent)]
  Artifact(#[from] ArtifactError),

  #[error(transparent)]
  Multicall(#[from] MulticallError),

  #[error(transparent)]
  Package(#[from] LoadError),

  #[error("contract '{0}' is not available in the build context")]
  MissingContract(String),

  #[error("transaction emitted no '{event}' event")]
  MissingEvent { event: String },

  #[error("event '{event}' has no argument {index}")]
  MissingEventArg { event: String, index: usize },

  #[error("dependency '{0}' has no recorded state")]
  MissingDependencyState(String),

  #[error("provider returned no contract address for deployment")]
  NoContractAddress,

  #[error("no package loader configured; cannot import {0}")]
  NoPackageLoader(String),

  #[error("importing {package} would nest bundles {depth} levels deep")]
  ImportTooDeep { package: String, depth: usize },

  #[error("command '{cmd}' failed with exit code {code:?}: {stderr}")]
  CommandFailed {
    cmd: String,
    code: Option<i32>,
    stderr: String,
  },

  #[error("command '{cmd}' produced invalid output: {message}")]
  CommandOutput { cmd: String, message: String },

  #[error("command '{cmd}' produced undeclared output '{output}'")]
  UndeclaredOutput { cmd: String, output: String },

  #[error("step task aborted: {0}")]
  TaskAborted(String),

  #[error(transparent)]
  FileHash(#[from] FileHashError),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error("serialization failed: {0}")]
  Serialize(#[from] serde_json::Error),
}
