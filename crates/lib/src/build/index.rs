//! Record of the latest local build of each package.
//!
//! # Storage Layout
//!
//! ```text
//! {data_dir}/builds.json    # BuildIndex: reference -> latest bundle
//! ```
//!
//! The CLI reads the entry for a reference to find the prior bundle of an
//! incremental build, and writes it back once the build finishes.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::bundle::BundleStatus;
use crate::reference::PackageReference;
use crate::util::hash::ContentHash;

pub const BUILD_INDEX_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum BuildIndexError {
  #[error("failed to read build index {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write build index {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse build index: {0}")]
  Parse(#[source] serde_json::Error),

  #[error("failed to serialize build index: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("unsupported build index version: {0}")]
  UnsupportedVersion(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
  pub content_hash: ContentHash,
  pub status: BundleStatus,
  /// Unix seconds of the bundle's metadata.
  pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildIndexData {
  pub version: u32,
  #[serde(default)]
  pub builds: BTreeMap<String, BuildRecord>,
}

impl Default for BuildIndexData {
  fn default() -> Self {
    Self {
      version: BUILD_INDEX_VERSION,
      builds: BTreeMap::new(),
    }
  }
}

/// The index file on disk.
#[derive(Debug, Clone)]
pub struct BuildIndex {
  path: PathBuf,
}

impl BuildIndex {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Returns an empty index if the file doesn't exist.
  pub fn load(&self) -> Result<BuildIndexData, BuildIndexError> {
    let content = match fs::read_to_string(&self.path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BuildIndexData::default()),
      Err(source) => {
        return Err(BuildIndexError::Read {
          path: self.path.clone(),
          source,
        });
      }
    };

    let data: BuildIndexData = serde_json::from_str(&content).map_err(BuildIndexError::Parse)?;
    if data.version != BUILD_INDEX_VERSION {
      return Err(BuildIndexError::UnsupportedVersion(data.version));
    }
    Ok(data)
  }

  pub fn get(&self, reference: &PackageReference) -> Result<Option<BuildRecord>, BuildIndexError> {
    Ok(self.load()?.builds.remove(&reference.to_string()))
  }

  /// Record `record` as the latest build of `reference`.
  pub fn record(&self, reference: &PackageReference, record: BuildRecord) -> Result<(), BuildIndexError> {
    let mut data = self.load()?;
    data.builds.insert(reference.to_string(), record);
    self.save(&data)
  }

  /// Hashes of every recorded bundle.
  pub fn hashes(&self) -> Result<Vec<ContentHash>, BuildIndexError> {
    Ok(self.load()?.builds.into_values().map(|r| r.content_hash).collect())
  }

  /// Write atomically: temp file, then rename.
  fn save(&self, data: &BuildIndexData) -> Result<(), BuildIndexError> {
    let write_err = |source| BuildIndexError::Write {
      path: self.path.clone(),
      source,
    };
    if let Some(parent) = self.path.parent() {
      fs::create_dir_all(parent).map_err(write_err)?;
    }

    let temp_path = self.path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(data).map_err(BuildIndexError::Serialize)?;
    fs::write(&temp_path, content).map_err(write_err)?;
    fs::rename(&temp_path, &self.path).map_err(write_err)?;
    debug!(path = %self.path.display(), builds = data.builds.len(), "build index saved");
    Ok(())
  }
}
