//! Registry kept in a JSON file.
//!
//! The file holds a [`RegistryState`]. Every publish rewrites it through a
//! temporary file and a rename. Callers that publish from several processes
//! hold the data directory's build lock.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use super::{PublishOutcome, REGISTRY_FILE_VERSION, Registry, RegistryError, RegistryState};
use crate::reference::PackageReference;
use crate::storage::StoragePointer;

#[derive(Debug, Clone)]
pub struct LocalRegistry {
  path: PathBuf,
}

impl LocalRegistry {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Current contents; empty when the file does not exist yet.
  pub fn load(&self) -> Result<RegistryState, RegistryError> {
    let content = match fs::read_to_string(&self.path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RegistryState::default()),
      Err(source) => {
        return Err(RegistryError::Io {
          path: self.path.clone(),
          source,
        });
      }
    };

    let state: RegistryState = serde_json::from_str(&content).map_err(|e| RegistryError::Parse {
      path: self.path.clone(),
      message: e.to_string(),
    })?;
    if state.version != REGISTRY_FILE_VERSION {
      return Err(RegistryError::UnsupportedVersion(state.version));
    }
    Ok(state)
  }

  fn save(&self, state: &RegistryState) -> Result<(), RegistryError> {
    let io_err = |source| RegistryError::Io {
      path: self.path.clone(),
      source,
    };
    if let Some(parent) = self.path.parent() {
      fs::create_dir_all(parent).map_err(io_err)?;
    }

    let temp_path = self.path.with_extension("json.tmp");
    let content = serde_json::to_string_pretty(state).map_err(|e| RegistryError::Parse {
      path: self.path.clone(),
      message: e.to_string(),
    })?;
    fs::write(&temp_path, content).map_err(io_err)?;
    fs::rename(&temp_path, &self.path).map_err(io_err)?;
    debug!(path = %self.path.display(), entries = state.entries.len(), "registry saved");
    Ok(())
  }
}

#[async_trait]
impl Registry for LocalRegistry {
  fn name(&self) -> String {
    format!("local:{}", self.path.display())
  }

  async fn resolve(&self, reference: &PackageReference) -> Result<StoragePointer, RegistryError> {
    self.load()?.resolve(reference)
  }

  async fn publish(
    &self,
    reference: &PackageReference,
    pointer: &StoragePointer,
    publisher: &str,
  ) -> Result<PublishOutcome, RegistryError> {
    let mut state = self.load()?;
    let outcome = state.publish(reference, pointer, publisher)?;
    if outcome == PublishOutcome::Published {
      self.save(&state)?;
      info!(package = %reference, hash = %pointer.content_hash.short(), "published to local registry");
    }
    Ok(outcome)
  }

  async fn owner(&self, name: &str) -> Result<Option<String>, RegistryError> {
    Ok(self.load()?.owners.get(name).cloned())
  }
}
