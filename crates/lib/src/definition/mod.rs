//! Chain definitions.
//!
//! A definition document is a TOML (or JSON) table whose top-level keys are
//! package metadata, a `setting` table, and one table per action kind:
//!
//! ```toml
//! name = "token-suite"
//! version = "1.0.0"
//!
//! [setting.owner]
//! default = "0x0000000000000000000000000000000000000001"
//!
//! [contract.Token]
//! args = ["<%= settings.owner %>"]
//!
//! [invoke.mint]
//! target = ["Token"]
//! func = "mint"
//! depends = ["var.amounts"]
//! ```
//!
//! Parsing validates every step through its handler and reports all issues
//! at once. Dependencies are the union of the explicit `depends` lists and
//! the references each handler finds in its config; every reference is
//! mapped to the one step producing that output.

mod dag;
mod types;

pub use dag::DependencyGraph;
pub use types::*;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::action::{ActionRegistry, ValidationIssue};
use crate::consts::{DEFAULT_PRESET, DEFAULT_VERSION};
use crate::reference::{validate_name, validate_preset, validate_version};

/// Template roots that are always available and need no producing step.
const BUILTIN_ROOTS: [&str; 3] = ["chainId", "timestamp", "package"];

const METADATA_KEYS: [&str; 5] = ["name", "version", "preset", "description", "keywords"];

const SETTING_KEY: &str = "setting";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
  #[error("invalid step name {name:?}: {reason}")]
  InvalidStepName { name: String, reason: String },

  #[error("invalid step path {path:?}: {reason}")]
  InvalidStepPath { path: String, reason: String },
}

/// `[a-z0-9_-]+`, ASCII case-insensitive.
pub fn validate_label(label: &str) -> Result<(), String> {
  if label.is_empty() {
    return Err("label is empty".to_string());
  }
  if !label
    .bytes()
    .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
  {
    return Err(format!("label {:?} may only contain letters, digits, '_' and '-'", label));
  }
  Ok(())
}

/// Split and check a `kind.label` step key.
pub fn validate_step_name(name: &str) -> Result<(&str, &str), NameError> {
  let invalid = |reason: String| NameError::InvalidStepName {
    name: name.to_string(),
    reason,
  };
  let (kind, label) = name
    .split_once('.')
    .ok_or_else(|| invalid("expected <kind>.<label>".to_string()))?;
  if kind.is_empty() || !kind.bytes().all(|b| b.is_ascii_lowercase()) {
    return Err(invalid(format!("kind {:?} must be lowercase letters", kind)));
  }
  if label.contains('.') {
    return Err(invalid("label must not contain '.'".to_string()));
  }
  validate_label(label).map_err(invalid)?;
  Ok((kind, label))
}

/// Split and check a dotted step path such as `dep.Registry`.
pub fn validate_step_path(path: &str) -> Result<Vec<&str>, NameError> {
  let parts: Vec<&str> = path.split('.').collect();
  if parts.len() < 2 {
    return Err(NameError::InvalidStepPath {
      path: path.to_string(),
      reason: "expected at least two segments".to_string(),
    });
  }
  for part in &parts {
    validate_label(part).map_err(|reason| NameError::InvalidStepPath {
      path: path.to_string(),
      reason,
    })?;
  }
  Ok(parts)
}

/// A validated, dependency-resolved chain definition.
#[derive(Debug, Clone)]
pub struct ChainDefinition {
  package: PackageMeta,
  settings: BTreeMap<String, SettingDef>,
  nodes: BTreeMap<String, ActionNode>,
  /// Output path to producing step key.
  outputs: BTreeMap<String, String>,
  graph: DependencyGraph,
}

impl ChainDefinition {
  /// Read a definition file. `.json` files are parsed as JSON, anything
  /// else as TOML.
  pub fn load(path: &Path, registry: &ActionRegistry) -> Result<Self, DefinitionError> {
    let content = std::fs::read_to_string(path).map_err(|source| DefinitionError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    debug!(path = %path.display(), "loading definition");
    match path.extension().and_then(|e| e.to_str()) {
      Some("json") => Self::from_json_str(&content, registry),
      _ => Self::from_toml_str(&content, registry),
    }
  }

  pub fn from_toml_str(input: &str, registry: &ActionRegistry) -> Result<Self, DefinitionError> {
    let table: toml::Table = toml::from_str(input).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    Self::from_document(toml_to_json(toml::Value::Table(table))?, registry)
  }

  /// Parse a JSON document. Unlike a plain `serde_json::Value`, repeated
  /// keys in the top two levels are errors rather than last-one-wins.
  pub fn from_json_str(input: &str, registry: &ActionRegistry) -> Result<Self, DefinitionError> {
    let Entries(sections) =
      serde_json::from_str::<Entries<Section>>(input).map_err(|e| DefinitionError::Parse(e.to_string()))?;

    let mut document = Map::new();
    for (kind, section) in sections {
      if document.contains_key(&kind) {
        return Err(DefinitionError::Parse(format!("duplicate key {:?}", kind)));
      }
      let value = match section {
        Section::Value(value) => value,
        Section::Table(entries) => {
          let mut table = Map::new();
          for (label, value) in entries {
            if table.contains_key(&label) {
              if METADATA_KEYS.contains(&kind.as_str()) || kind == SETTING_KEY {
                return Err(DefinitionError::Parse(format!("duplicate key {:?} in {:?}", label, kind)));
              }
              return Err(GraphError::DuplicateNodeKey(format!("{}.{}", kind, label)).into());
            }
            table.insert(label, value);
          }
          Value::Object(table)
        }
      };
      document.insert(kind, value);
    }
    Self::from_document(Value::Object(document), registry)
  }

  /// Build from a parsed document.
  pub fn from_document(document: Value, registry: &ActionRegistry) -> Result<Self, DefinitionError> {
    let Value::Object(document) = document else {
      return Err(DefinitionError::Parse("definition must be a table".to_string()));
    };

    let mut issues = Vec::new();
    let package = read_metadata(&document, &mut issues);
    let settings = match document.get(SETTING_KEY) {
      Some(value) => read_settings(value, &mut issues),
      None => BTreeMap::new(),
    };

    let mut nodes = Vec::new();
    for (kind, steps) in &document {
      if METADATA_KEYS.contains(&kind.as_str()) || kind == SETTING_KEY {
        continue;
      }
      if !registry.contains(kind) {
        issues.push(ValidationIssue::new(kind.as_str(), format!("unknown action kind {:?}", kind)));
        continue;
      }
      let Value::Object(steps) = steps else {
        issues.push(ValidationIssue::new(kind.as_str(), "must be a table of steps"));
        continue;
      };
      for (label, config) in steps {
        let key = format!("{}.{}", kind, label);
        match split_depends(config) {
          Ok((config, depends)) => nodes.push(SerializedNode { key, config, depends }),
          Err(issue) => issues.push(issue.at(key)),
        }
      }
    }

    Self::assemble(package, settings, nodes, issues, registry)
  }

  /// Rebuild a definition stored in a bundle.
  pub fn from_serialized(serialized: &SerializedDefinition, registry: &ActionRegistry) -> Result<Self, DefinitionError> {
    let mut issues = Vec::new();
    check_metadata(&serialized.package, &mut issues);
    Self::assemble(
      serialized.package.clone(),
      serialized.settings.clone(),
      serialized.nodes.clone(),
      issues,
      registry,
    )
  }

  /// The storable form. Only explicit dependencies are kept.
  pub fn serialize(&self) -> SerializedDefinition {
    SerializedDefinition {
      package: self.package.clone(),
      settings: self.settings.clone(),
      nodes: self
        .nodes
        .values()
        .map(|node| SerializedNode {
          key: node.key.clone(),
          config: node.config.clone(),
          depends: node.explicit_depends.iter().cloned().collect(),
        })
        .collect(),
    }
  }

  fn assemble(
    package: PackageMeta,
    settings: BTreeMap<String, SettingDef>,
    raw: Vec<SerializedNode>,
    mut issues: Vec<ValidationIssue>,
    registry: &ActionRegistry,
  ) -> Result<Self, DefinitionError> {
    let mut nodes = BTreeMap::new();
    let mut duplicate = None;

    for SerializedNode { key, config, depends } in raw {
      let (kind, label) = match validate_step_name(&key) {
        Ok((kind, label)) => (kind.to_string(), label.to_string()),
        Err(err) => {
          issues.push(ValidationIssue::new("", err.to_string()).at(key.as_str()));
          continue;
        }
      };
      let Some(handler) = registry.get(&kind) else {
        issues.push(ValidationIssue::new("", format!("unknown action kind {:?}", kind)).at(key.as_str()));
        continue;
      };

      issues.extend(handler.validate(&config).into_iter().map(|issue| issue.at(key.as_str())));
      for dep in &depends {
        if let Err(err) = validate_step_name(dep) {
          issues.push(ValidationIssue::new("depends", err.to_string()).at(key.as_str()));
        }
      }

      let node = ActionNode {
        key: key.clone(),
        kind,
        label,
        config,
        explicit_depends: depends.into_iter().collect(),
        depends_on: BTreeSet::new(),
      };
      if nodes.insert(key.clone(), node).is_some() && duplicate.is_none() {
        duplicate = Some(key);
      }
    }

    if !issues.is_empty() {
      return Err(DefinitionError::Validation(issues));
    }
    if let Some(key) = duplicate {
      return Err(GraphError::DuplicateNodeKey(key).into());
    }

    let mut outputs: BTreeMap<String, String> = BTreeMap::new();
    for node in nodes.values() {
      let Some(handler) = registry.get(&node.kind) else {
        continue;
      };
      for output in handler.outputs(&node.label, &node.config) {
        if let Some(first) = outputs.get(&output) {
          return Err(
            GraphError::DuplicateOutput {
              output,
              first: first.clone(),
              second: node.key.clone(),
            }
            .into(),
          );
        }
        outputs.insert(output, node.key.clone());
      }
    }

    let mut definition = Self {
      package,
      settings,
      nodes,
      outputs,
      graph: DependencyGraph::build(&BTreeMap::new())?,
    };
    definition.merge_computed_dependencies(registry)?;
    Ok(definition)
  }

  /// Recompute every node's `depends_on` as its explicit dependencies plus
  /// the producers of the outputs its config references, then rebuild the
  /// graph. Running it again yields the same dependencies.
  pub fn merge_computed_dependencies(&mut self, registry: &ActionRegistry) -> Result<(), GraphError> {
    let mut dependencies: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for node in self.nodes.values() {
      let mut deps = node.explicit_depends.clone();
      if let Some(handler) = registry.get(&node.kind) {
        for reference in handler.compute_dependencies(&node.config) {
          deps.extend(self.producers_of(&node.key, &reference)?);
        }
      }
      dependencies.insert(node.key.clone(), deps);
    }

    let graph = DependencyGraph::build(&dependencies)?;
    for (key, deps) in dependencies {
      if let Some(node) = self.nodes.get_mut(&key) {
        node.depends_on = deps;
      }
    }
    self.graph = graph;
    Ok(())
  }

  /// Step keys producing a referenced output path.
  fn producers_of(&self, node: &str, reference: &str) -> Result<Vec<String>, GraphError> {
    let unresolved = || GraphError::UnresolvedReference {
      node: node.to_string(),
      reference: reference.to_string(),
    };

    let (root, name) = match reference.split_once('.') {
      Some((root, name)) => (root, Some(name)),
      None => (reference, None),
    };

    if BUILTIN_ROOTS.contains(&root) {
      return Ok(Vec::new());
    }
    if root == "settings" {
      return match name {
        Some(name) if !self.settings.contains_key(name) => Err(unresolved()),
        _ => Ok(Vec::new()),
      };
    }

    match name {
      Some(_) => self
        .outputs
        .get(reference)
        .map(|producer| vec![producer.clone()])
        .ok_or_else(unresolved),
      // A whole namespace depends on every producer in it.
      None => {
        let prefix = format!("{}.", root);
        let producers: Vec<String> = self
          .outputs
          .iter()
          .filter(|(output, _)| output.starts_with(&prefix))
          .map(|(_, producer)| producer.clone())
          .collect();
        if producers.is_empty() && !matches!(root, "contracts" | "txns" | "imports" | "extras") {
          return Err(unresolved());
        }
        Ok(producers)
      }
    }
  }

  pub fn package(&self) -> &PackageMeta {
    &self.package
  }

  pub fn settings(&self) -> &BTreeMap<String, SettingDef> {
    &self.settings
  }

  pub fn node(&self, key: &str) -> Option<&ActionNode> {
    self.nodes.get(key)
  }

  pub fn nodes(&self) -> impl Iterator<Item = &ActionNode> {
    self.nodes.values()
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Output path to producing step.
  pub fn outputs(&self) -> &BTreeMap<String, String> {
    &self.outputs
  }

  pub fn producer_of(&self, output: &str) -> Option<&str> {
    self.outputs.get(output).map(String::as_str)
  }

  pub fn topological_order(&self) -> &[String] {
    self.graph.order()
  }

  pub fn execution_waves(&self) -> &[Vec<String>] {
    self.graph.waves()
  }

  pub fn dependents(&self, key: &str) -> Vec<String> {
    self.graph.dependents(key)
  }

  /// `keys` plus everything that transitively depends on them.
  pub fn reachable_from<'a>(&self, keys: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    self.graph.reachable_from(keys)
  }
}

fn read_metadata(document: &Map<String, Value>, issues: &mut Vec<ValidationIssue>) -> PackageMeta {
  let mut string_field = |field: &str| -> Option<String> {
    match document.get(field)? {
      Value::String(s) => Some(s.clone()),
      other => {
        issues.push(ValidationIssue::new(field, format!("must be a string, got {}", other)));
        None
      }
    }
  };

  let name = string_field("name");
  let version = string_field("version");
  let preset = string_field("preset");
  let description = string_field("description");

  let keywords = match document.get("keywords") {
    None => Vec::new(),
    Some(Value::Array(items)) if items.iter().all(Value::is_string) => {
      items.iter().filter_map(Value::as_str).map(str::to_string).collect()
    }
    Some(_) => {
      issues.push(ValidationIssue::new("keywords", "must be an array of strings"));
      Vec::new()
    }
  };

  if !document.contains_key("name") {
    issues.push(ValidationIssue::new("name", "is required"));
  }

  let package = PackageMeta {
    name: name.unwrap_or_default(),
    version: version.unwrap_or_else(|| DEFAULT_VERSION.to_string()),
    preset: preset.unwrap_or_else(|| DEFAULT_PRESET.to_string()),
    description,
    keywords,
  };
  if document.get("name").is_some_and(Value::is_string) {
    check_metadata(&package, issues);
  } else {
    check_version_preset(&package, issues);
  }
  package
}

fn check_metadata(package: &PackageMeta, issues: &mut Vec<ValidationIssue>) {
  if let Err(reason) = validate_name(&package.name) {
    issues.push(ValidationIssue::new("name", reason));
  }
  check_version_preset(package, issues);
}

fn check_version_preset(package: &PackageMeta, issues: &mut Vec<ValidationIssue>) {
  if let Err(reason) = validate_version(&package.version) {
    issues.push(ValidationIssue::new("version", reason));
  }
  if let Err(reason) = validate_preset(&package.preset) {
    issues.push(ValidationIssue::new("preset", reason));
  }
}

fn read_settings(value: &Value, issues: &mut Vec<ValidationIssue>) -> BTreeMap<String, SettingDef> {
  let mut settings = BTreeMap::new();
  let Value::Object(table) = value else {
    issues.push(ValidationIssue::new(SETTING_KEY, "must be a table"));
    return settings;
  };

  for (name, def) in table {
    let field = format!("{}.{}", SETTING_KEY, name);
    if let Err(reason) = validate_label(name) {
      issues.push(ValidationIssue::new(field.as_str(), reason));
      continue;
    }
    let Value::Object(def) = def else {
      issues.push(ValidationIssue::new(field.as_str(), "must be a table"));
      continue;
    };

    let mut setting = SettingDef::default();
    for (key, value) in def {
      match (key.as_str(), value) {
        ("default", Value::String(s)) => setting.default = Some(s.clone()),
        ("default", Value::Number(n)) => setting.default = Some(n.to_string()),
        ("default", Value::Bool(b)) => setting.default = Some(b.to_string()),
        ("description", Value::String(s)) => setting.description = Some(s.clone()),
        ("default" | "description", other) => {
          issues.push(ValidationIssue::new(
            format!("{}.{}", field, key),
            format!("must be a scalar, got {}", other),
          ));
        }
        (unknown, _) => {
          issues.push(ValidationIssue::new(format!("{}.{}", field, unknown), "unknown field"));
        }
      }
    }
    settings.insert(name.clone(), setting);
  }
  settings
}

/// Separate a step's `depends` list from the handler config.
fn split_depends(config: &Value) -> Result<(Value, Vec<String>), ValidationIssue> {
  let Value::Object(table) = config else {
    return Err(ValidationIssue::new("", "step must be a table"));
  };
  let mut table = table.clone();
  let depends = match table.remove("depends") {
    None => Vec::new(),
    Some(Value::String(dep)) => vec![dep],
    Some(Value::Array(items)) if items.iter().all(Value::is_string) => {
      items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect()
    }
    Some(_) => return Err(ValidationIssue::new("depends", "must be a step key or a list of step keys")),
  };
  Ok((Value::Object(table), depends))
}

/// Map entries in document order, duplicates included.
struct Entries<V>(Vec<(String, V)>);

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Entries<V> {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct EntriesVisitor<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for EntriesVisitor<V> {
      type Value = Entries<V>;

      fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a table")
      }

      fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::new();
        while let Some(entry) = map.next_entry::<String, V>()? {
          entries.push(entry);
        }
        Ok(Entries(entries))
      }
    }

    deserializer.deserialize_map(EntriesVisitor(PhantomData))
  }
}

/// A top-level JSON value: tables keep their raw entries.
enum Section {
  Table(Vec<(String, Value)>),
  Value(Value),
}

impl<'de> Deserialize<'de> for Section {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    struct SectionVisitor;

    impl<'de> Visitor<'de> for SectionVisitor {
      type Value = Section;

      fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("any JSON value")
      }

      fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Section, A::Error> {
        let mut entries = Vec::new();
        while let Some(entry) = map.next_entry::<String, Value>()? {
          entries.push(entry);
        }
        Ok(Section::Table(entries))
      }

      fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Section, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Value>()? {
          items.push(item);
        }
        Ok(Section::Value(Value::Array(items)))
      }

      fn visit_bool<E: de::Error>(self, v: bool) -> Result<Section, E> {
        Ok(Section::Value(Value::Bool(v)))
      }

      fn visit_i64<E: de::Error>(self, v: i64) -> Result<Section, E> {
        Ok(Section::Value(Value::from(v)))
      }

      fn visit_u64<E: de::Error>(self, v: u64) -> Result<Section, E> {
        Ok(Section::Value(Value::from(v)))
      }

      fn visit_f64<E: de::Error>(self, v: f64) -> Result<Section, E> {
        Ok(Section::Value(
          serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number),
        ))
      }

      fn visit_str<E: de::Error>(self, v: &str) -> Result<Section, E> {
        Ok(Section::Value(Value::String(v.to_string())))
      }

      fn visit_string<E: de::Error>(self, v: String) -> Result<Section, E> {
        Ok(Section::Value(Value::String(v)))
      }

      fn visit_unit<E: de::Error>(self) -> Result<Section, E> {
        Ok(Section::Value(Value::Null))
      }
    }

    deserializer.deserialize_any(SectionVisitor)
  }
}

fn toml_to_json(value: toml::Value) -> Result<Value, DefinitionError> {
  Ok(match value {
    toml::Value::String(s) => Value::String(s),
    toml::Value::Integer(i) => Value::from(i),
    toml::Value::Float(f) => serde_json::Number::from_f64(f)
      .map(Value::Number)
      .ok_or_else(|| DefinitionError::Parse(format!("unsupported float value {}", f)))?,
    toml::Value::Boolean(b) => Value::Bool(b),
    toml::Value::Datetime(dt) => Value::String(dt.to_string()),
    toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect::<Result<_, _>>()?),
    toml::Value::Table(table) => Value::Object(
      table
        .into_iter()
        .map(|(k, v)| Ok((k, toml_to_json(v)?)))
        .collect::<Result<_, DefinitionError>>()?,
    ),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(input: &str) -> Result<ChainDefinition, DefinitionError> {
    ChainDefinition::from_toml_str(input, &ActionRegistry::builtin())
  }

  fn issues(err: DefinitionError) -> Vec<String> {
    match err {
      DefinitionError::Validation(issues) => issues.iter().map(ToString::to_string).collect(),
      other => panic!("expected validation error, got {other}"),
    }
  }

  const SUITE: &str = r#"
name = "suite"
version = "1.0.0"
keywords = ["defi"]

[setting.owner]
default = "0x0000000000000000000000000000000000000001"

[setting.supply]
default = 1000

[contract.Token]
args = ["<%= settings.owner %>", "<%= settings.supply %>"]

[contract.Vault]
args = ["<%= contracts.Token.address %>"]

[invoke.setup]
target = ["Vault"]
func = "initialize"

[var.summary]
vault = "<%= contracts.Vault.address %>"
depends = ["invoke.setup"]
"#;

  #[test]
  fn parses_metadata_settings_and_steps() {
    let def = parse(SUITE).unwrap();
    assert_eq!(def.package().name, "suite");
    assert_eq!(def.package().preset, "main");
    assert_eq!(def.package().keywords, vec!["defi"]);
    assert_eq!(def.settings()["supply"].default.as_deref(), Some("1000"));
    assert_eq!(def.len(), 4);
    assert_eq!(def.producer_of("txns.setup"), Some("invoke.setup"));
  }

  #[test]
  fn merges_computed_and_explicit_dependencies() {
    let def = parse(SUITE).unwrap();
    let deps = |key: &str| def.node(key).unwrap().depends_on.iter().cloned().collect::<Vec<_>>();
    assert_eq!(deps("contract.Token"), Vec::<String>::new());
    assert_eq!(deps("contract.Vault"), vec!["contract.Token"]);
    assert_eq!(deps("invoke.setup"), vec!["contract.Vault"]);
    assert_eq!(deps("var.summary"), vec!["contract.Vault", "invoke.setup"]);

    let explicit: Vec<_> = def.node("var.summary").unwrap().explicit_depends.iter().cloned().collect();
    assert_eq!(explicit, vec!["invoke.setup"]);
  }

  #[test]
  fn merge_is_idempotent() {
    let mut def = parse(SUITE).unwrap();
    let before: Vec<_> = def.nodes().map(|n| n.depends_on.clone()).collect();
    def.merge_computed_dependencies(&ActionRegistry::builtin()).unwrap();
    def.merge_computed_dependencies(&ActionRegistry::builtin()).unwrap();
    let after: Vec<_> = def.nodes().map(|n| n.depends_on.clone()).collect();
    assert_eq!(before, after);
  }

  #[test]
  fn order_is_deterministic() {
    let a = parse(SUITE).unwrap();
    let b = parse(SUITE).unwrap();
    assert_eq!(a.topological_order(), b.topological_order());
    assert_eq!(
      a.topological_order(),
      ["contract.Token", "contract.Vault", "invoke.setup", "var.summary"]
    );
    assert_eq!(
      a.execution_waves(),
      [
        vec!["contract.Token".to_string()],
        vec!["contract.Vault".to_string()],
        vec!["invoke.setup".to_string()],
        vec!["var.summary".to_string()],
      ]
    );
  }

  #[test]
  fn independent_steps_share_a_wave() {
    let def = parse(
      r#"
name = "fan"
[contract.B]
[contract.A]
[var.both]
a = "<%= contracts.A.address %>"
b = "<%= contracts.B.address %>"
"#,
    )
    .unwrap();
    assert_eq!(def.execution_waves()[0], vec!["contract.A", "contract.B"]);
    assert_eq!(def.execution_waves()[1], vec!["var.both"]);
  }

  #[test]
  fn cycles_are_named() {
    let err = parse(
      r#"
name = "loop"
[var.a]
x = "<%= extras.y %>"
[var.b]
y = "<%= extras.x %>"
"#,
    )
    .unwrap_err();
    match err {
      DefinitionError::Graph(GraphError::CyclicDependency { cycle }) => {
        assert_eq!(cycle, vec!["var.a", "var.b", "var.a"]);
      }
      other => panic!("expected cycle, got {other}"),
    }
  }

  #[test]
  fn validation_issues_are_aggregated() {
    let err = parse(
      r#"
name = "Bad Name"
[contract.Token]
artifact = ""
[deploy.x]
[invoke.go]
func = "f"
depends = ["nope"]
"#,
    )
    .unwrap_err();
    let issues = issues(err);
    assert_eq!(issues.len(), 5, "{issues:#?}");
    assert!(issues.iter().any(|i| i.starts_with("name:")));
    assert!(issues.iter().any(|i| i.contains("unknown action kind")));
    assert!(issues.iter().any(|i| i.starts_with("contract.Token.artifact")));
    assert!(issues.iter().any(|i| i.starts_with("invoke.go.depends")));
    assert!(issues.iter().any(|i| i.starts_with("invoke.go:") && i.contains("target")));
  }

  #[test]
  fn missing_name_is_reported() {
    let issues = issues(parse("[contract.Token]\n").unwrap_err());
    assert_eq!(issues, vec!["name: is required"]);
  }

  #[test]
  fn duplicate_outputs_are_rejected() {
    let err = parse(
      r#"
name = "dup"
[contract.Pool]
[invoke.make]
target = "0x0000000000000000000000000000000000000001"
func = "create"
factory.Pool = { event = "Created" }
"#,
    )
    .unwrap_err();
    assert!(matches!(
      err,
      DefinitionError::Graph(GraphError::DuplicateOutput { ref output, ref first, ref second })
        if output == "contracts.Pool" && first == "contract.Pool" && second == "invoke.make"
    ));
  }

  #[test]
  fn unresolved_references() {
    let err = parse("name = \"x\"\n[var.a]\nv = \"<%= contracts.Ghost.address %>\"\n").unwrap_err();
    assert!(matches!(err, DefinitionError::Graph(GraphError::UnresolvedReference { .. })));

    let err = parse("name = \"x\"\n[var.a]\nv = \"<%= settings.undeclared %>\"\n").unwrap_err();
    assert!(matches!(err, DefinitionError::Graph(GraphError::UnresolvedReference { ref reference, .. }) if reference == "settings.undeclared"));

    let def = parse("name = \"x\"\n[var.a]\nv = \"<%= chainId %>-<%= package.name %>\"\n").unwrap();
    assert!(def.node("var.a").unwrap().depends_on.is_empty());
  }

  #[test]
  fn unknown_explicit_dependency() {
    let err = parse("name = \"x\"\n[var.a]\nv = 1\ndepends = [\"var.ghost\"]\n").unwrap_err();
    assert!(matches!(err, DefinitionError::Graph(GraphError::UnknownDependency { .. })));
  }

  #[test]
  fn serialized_round_trip() {
    let registry = ActionRegistry::builtin();
    let def = parse(SUITE).unwrap();
    let serialized = def.serialize();
    assert!(serialized.nodes.iter().all(|n| n.config.get("depends").is_none()));

    let rebuilt = ChainDefinition::from_serialized(&serialized, &registry).unwrap();
    assert_eq!(rebuilt.serialize(), serialized);
    assert_eq!(rebuilt.topological_order(), def.topological_order());
  }

  #[test]
  fn duplicate_keys_only_arise_in_serialized_form() {
    let mut serialized = parse(SUITE).unwrap().serialize();
    serialized.nodes.push(serialized.nodes[0].clone());
    let err = ChainDefinition::from_serialized(&serialized, &ActionRegistry::builtin()).unwrap_err();
    assert!(matches!(err, DefinitionError::Graph(GraphError::DuplicateNodeKey(k)) if k == "contract.Token"));
  }

  #[test]
  fn json_documents_are_accepted() {
    let def = ChainDefinition::from_json_str(
      r#"{ "name": "j", "var": { "x": { "a": 1 } } }"#,
      &ActionRegistry::builtin(),
    )
    .unwrap();
    assert_eq!(def.topological_order(), ["var.x"]);
  }

  #[test]
  fn json_repeated_keys_are_rejected() {
    let registry = ActionRegistry::builtin();
    let err = ChainDefinition::from_json_str(r#"{"name":"x","var":{"a":{"p":1},"a":{"p":2}}}"#, &registry).unwrap_err();
    assert!(matches!(err, DefinitionError::Graph(GraphError::DuplicateNodeKey(k)) if k == "var.a"));

    let err = ChainDefinition::from_json_str(r#"{"name":"x","name":"y","var":{"a":{"p":1}}}"#, &registry).unwrap_err();
    assert!(matches!(err, DefinitionError::Parse(msg) if msg.contains("\"name\"")));

    let err = ChainDefinition::from_json_str("[1, 2]", &registry).unwrap_err();
    assert!(matches!(err, DefinitionError::Parse(_)));
  }

  #[test]
  fn step_names() {
    assert_eq!(validate_step_name("contract.Token").unwrap(), ("contract", "Token"));
    assert!(validate_step_name("contract").is_err());
    assert!(validate_step_name("contract.a.b").is_err());
    assert!(validate_step_name("Contract.x").is_err());
    assert!(validate_step_name("var.has space").is_err());

    assert_eq!(validate_step_path("dep.Registry").unwrap(), vec!["dep", "Registry"]);
    assert!(matches!(validate_step_path("dep"), Err(NameError::InvalidStepPath { .. })));
    assert!(validate_step_path("dep..x").is_err());
  }

  #[test]
  fn reachable_covers_transitive_dependents() {
    let def = parse(SUITE).unwrap();
    let reachable: Vec<_> = def.reachable_from(["contract.Vault"]).into_iter().collect();
    assert_eq!(reachable, vec!["contract.Vault", "invoke.setup", "var.summary"]);
    assert_eq!(def.dependents("contract.Token"), vec!["contract.Vault"]);
  }
}
