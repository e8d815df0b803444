//! Compiled contract artifacts consumed by `contract` steps.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::util::hash::{ContentHash, hash_bytes};

/// ABI and creation bytecode of one contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractArtifact {
  pub contract_name: String,
  pub abi: Value,
  pub bytecode: String,
}

impl ContractArtifact {
  pub fn bytecode_hash(&self) -> ContentHash {
    hash_bytes(self.bytecode.as_bytes())
  }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
  #[error("artifact '{0}' not found")]
  NotFound(String),

  #[error("failed to read artifact {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid artifact {path}: {message}")]
  Invalid { path: PathBuf, message: String },
}

/// Where `contract` steps find compiled artifacts.
pub trait ArtifactSource: Send + Sync {
  fn artifact(&self, name: &str) -> Result<ContractArtifact, ArtifactError>;
}

/// Artifacts read from a compiler output directory.
///
/// Looks for `<root>/<Name>.json` and the Foundry layout
/// `<root>/<Name>.sol/<Name>.json`. Bytecode may be a plain hex string
/// (Hardhat) or an object with an `object` field (Foundry).
pub struct DirArtifacts {
  root: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BytecodeField {
  Plain(String),
  Object { object: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
  #[serde(default)]
  contract_name: Option<String>,
  #[serde(default)]
  abi: Value,
  bytecode: BytecodeField,
}

impl DirArtifacts {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn candidates(&self, name: &str) -> [PathBuf; 2] {
    [
      self.root.join(format!("{}.json", name)),
      self.root.join(format!("{}.sol", name)).join(format!("{}.json", name)),
    ]
  }
}

impl ArtifactSource for DirArtifacts {
  fn artifact(&self, name: &str) -> Result<ContractArtifact, ArtifactError> {
    let Some(path) = self.candidates(name).into_iter().find(|p| p.is_file()) else {
      return Err(ArtifactError::NotFound(name.to_string()));
    };

    let content = std::fs::read(&path).map_err(|source| ArtifactError::Read {
      path: path.clone(),
      source,
    })?;
    let file: ArtifactFile = serde_json::from_slice(&content).map_err(|e| ArtifactError::Invalid {
      path: path.clone(),
      message: e.to_string(),
    })?;

    let bytecode = match file.bytecode {
      BytecodeField::Plain(s) | BytecodeField::Object { object: s } => s,
    };
    if bytecode.is_empty() || bytecode == "0x" {
      return Err(ArtifactError::Invalid {
        path,
        message: "empty bytecode (abstract contract or interface?)".into(),
      });
    }

    Ok(ContractArtifact {
      contract_name: file.contract_name.unwrap_or_else(|| name.to_string()),
      abi: file.abi,
      bytecode,
    })
  }
}

/// In-memory artifacts, keyed by name.
#[derive(Default)]
pub struct MemoryArtifacts {
  artifacts: BTreeMap<String, ContractArtifact>,
}

impl MemoryArtifacts {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, name: &str, abi: Value, bytecode: &str) {
    self.artifacts.insert(
      name.to_string(),
      ContractArtifact {
        contract_name: name.to_string(),
        abi,
        bytecode: bytecode.to_string(),
      },
    );
  }

  pub fn with(mut self, name: &str, bytecode: &str) -> Self {
    self.insert(name, Value::Array(Vec::new()), bytecode);
    self
  }
}

impl ArtifactSource for MemoryArtifacts {
  fn artifact(&self, name: &str) -> Result<ContractArtifact, ArtifactError> {
    self
      .artifacts
      .get(name)
      .cloned()
      .ok_or_else(|| ArtifactError::NotFound(name.to_string()))
  }
}
