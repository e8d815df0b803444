use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::action::ValidationIssue;

/// One step of a chain definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionNode {
  /// `kind.label`
  pub key: String,
  pub kind: String,
  pub label: String,
  pub config: Value,
  /// Dependencies written in the document's `depends` field.
  pub explicit_depends: BTreeSet<String>,
  /// Explicit plus computed dependencies.
  pub depends_on: BTreeSet<String>,
}

/// A setting declared by the definition, overridable per build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingDef {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub default: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMeta {
  pub name: String,
  pub version: String,
  pub preset: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
  pub key: String,
  pub config: Value,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends: Vec<String>,
}

/// Definition as stored inside a bundle. Computed dependencies are not
/// stored; they are derived again when the definition is rebuilt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedDefinition {
  pub package: PackageMeta,
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub settings: BTreeMap<String, SettingDef>,
  #[serde(default)]
  pub nodes: Vec<SerializedNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
  #[error("cyclic dependency: {}", cycle.join(" -> "))]
  CyclicDependency { cycle: Vec<String> },

  #[error("duplicate step key: {0}")]
  DuplicateNodeKey(String),

  #[error("{node}: reference '{reference}' does not match any step output")]
  UnresolvedReference { node: String, reference: String },

  #[error("{node}: depends on unknown step '{dependency}'")]
  UnknownDependency { node: String, dependency: String },

  #[error("output '{output}' is produced by both {first} and {second}")]
  DuplicateOutput {
    output: String,
    first: String,
    second: String,
  },
}

#[derive(Debug, Error)]
pub enum DefinitionError {
  #[error("failed to read definition {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse definition: {0}")]
  Parse(String),

  #[error("{}", format_issues(.0))]
  Validation(Vec<ValidationIssue>),

  #[error(transparent)]
  Graph(#[from] GraphError),
}

fn format_issues(issues: &[ValidationIssue]) -> String {
  let mut out = format!("definition has {} validation issue(s):", issues.len());
  for issue in issues {
    out.push_str("\n  - ");
    out.push_str(&issue.to_string());
  }
  out
}
