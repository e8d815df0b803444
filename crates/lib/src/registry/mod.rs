//! Package registries.
//!
//! A registry maps `(name, version, chainId)` to the storage pointer of a
//! published bundle. Presets belong to the bundle, not the registry key.
//! Only the owner of a package name may publish under it, the first
//! publisher becoming the owner. Every version except `latest` is immutable
//! once published; republishing the same content is a no-op.

mod loader;
mod local;
mod onchain;
mod resolver;

pub use loader::{LoadError, PackageLoader};
pub use local::LocalRegistry;
pub use onchain::OnChainRegistry;
pub use resolver::RegistryResolver;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::provider::ProviderError;
use crate::reference::PackageReference;
use crate::storage::StoragePointer;
use crate::util::retry::Transient;

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("package {0} not found")]
  PackageNotFound(String),

  #[error("{publisher} may not publish {package}: owned by {owner}")]
  Unauthorized {
    package: String,
    owner: String,
    publisher: String,
  },

  #[error("{reference} is already published as {existing}; refusing to replace it with {attempted}")]
  PointerConflict {
    reference: String,
    existing: StoragePointer,
    attempted: StoragePointer,
  },

  #[error("registry {registry} unavailable: {message}")]
  Unavailable { registry: String, message: String },

  #[error("registry {registry} returned an invalid entry for {reference}: {value:?}")]
  InvalidEntry {
    registry: String,
    reference: String,
    value: String,
  },

  #[error("registry call failed: {0}")]
  Provider(ProviderError),

  #[error("failed to access registry file {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse registry file {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("unsupported registry file version {0}")]
  UnsupportedVersion(u32),
}

impl Transient for RegistryError {
  fn is_transient(&self) -> bool {
    matches!(self, RegistryError::Unavailable { .. })
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishOutcome {
  /// The pointer was written.
  Published,
  /// The registry already held this content.
  Unchanged,
}

#[async_trait]
pub trait Registry: Send + Sync {
  /// Human-readable identity, used in logs and errors.
  fn name(&self) -> String;

  async fn resolve(&self, reference: &PackageReference) -> Result<StoragePointer, RegistryError>;

  async fn publish(
    &self,
    reference: &PackageReference,
    pointer: &StoragePointer,
    publisher: &str,
  ) -> Result<PublishOutcome, RegistryError>;

  /// Current owner of a package name, if anyone has published it.
  async fn owner(&self, name: &str) -> Result<Option<String>, RegistryError>;
}

pub const REGISTRY_FILE_VERSION: u32 = 1;

/// A published pointer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
  pub pointer: StoragePointer,
  pub publisher: String,
}

/// Registry contents shared by the file-backed and in-memory registries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryState {
  pub version: u32,
  /// Package name to owner.
  #[serde(default)]
  pub owners: BTreeMap<String, String>,
  /// `name:version/chainId` to entry.
  #[serde(default)]
  pub entries: BTreeMap<String, RegistryEntry>,
}

impl Default for RegistryState {
  fn default() -> Self {
    Self {
      version: REGISTRY_FILE_VERSION,
      owners: BTreeMap::new(),
      entries: BTreeMap::new(),
    }
  }
}

impl RegistryState {
  pub fn resolve(&self, reference: &PackageReference) -> Result<StoragePointer, RegistryError> {
    self
      .entries
      .get(&reference.registry_key())
      .map(|entry| entry.pointer.clone())
      .ok_or_else(|| RegistryError::PackageNotFound(reference.registry_key()))
  }

  /// Apply the ownership and immutability rules, then record the pointer.
  pub fn publish(
    &mut self,
    reference: &PackageReference,
    pointer: &StoragePointer,
    publisher: &str,
  ) -> Result<PublishOutcome, RegistryError> {
    check_publish(
      reference,
      pointer,
      publisher,
      self.owners.get(&reference.name).map(String::as_str),
      self.entries.get(&reference.registry_key()).map(|e| &e.pointer),
    )?;

    let key = reference.registry_key();
    if self
      .entries
      .get(&key)
      .is_some_and(|e| e.pointer.content_hash == pointer.content_hash)
    {
      return Ok(PublishOutcome::Unchanged);
    }

    self
      .owners
      .entry(reference.name.clone())
      .or_insert_with(|| publisher.to_string());
    self.entries.insert(
      key,
      RegistryEntry {
        pointer: pointer.clone(),
        publisher: publisher.to_string(),
      },
    );
    Ok(PublishOutcome::Published)
  }

  /// Every content hash some entry points at.
  pub fn pointers(&self) -> impl Iterator<Item = &StoragePointer> {
    self.entries.values().map(|e| &e.pointer)
  }
}

/// Ownership and immutability checks shared by every registry.
pub(crate) fn check_publish(
  reference: &PackageReference,
  pointer: &StoragePointer,
  publisher: &str,
  owner: Option<&str>,
  existing: Option<&StoragePointer>,
) -> Result<(), RegistryError> {
  if let Some(owner) = owner
    && !owner.eq_ignore_ascii_case(publisher)
  {
    return Err(RegistryError::Unauthorized {
      package: reference.name.clone(),
      owner: owner.to_string(),
      publisher: publisher.to_string(),
    });
  }
  if let Some(existing) = existing
    && !reference.is_mutable()
    && existing.content_hash != pointer.content_hash
  {
    return Err(RegistryError::PointerConflict {
      reference: reference.registry_key(),
      existing: existing.clone(),
      attempted: pointer.clone(),
    });
  }
  Ok(())
}

/// Registry held in process memory.
#[derive(Default)]
pub struct MemoryRegistry {
  state: Mutex<RegistryState>,
}

impl MemoryRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn state(&self) -> std::sync::MutexGuard<'_, RegistryState> {
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

#[async_trait]
impl Registry for MemoryRegistry {
  fn name(&self) -> String {
    "memory".to_string()
  }

  async fn resolve(&self, reference: &PackageReference) -> Result<StoragePointer, RegistryError> {
    self.state().resolve(reference)
  }

  async fn publish(
    &self,
    reference: &PackageReference,
    pointer: &StoragePointer,
    publisher: &str,
  ) -> Result<PublishOutcome, RegistryError> {
    self.state().publish(reference, pointer, publisher)
  }

  async fn owner(&self, name: &str) -> Result<Option<String>, RegistryError> {
    Ok(self.state().owners.get(name).cloned())
  }
}
