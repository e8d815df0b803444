//! Content-addressed storage.
//!
//! Objects are opaque byte strings addressed by the SHA-256 of their
//! content. A [`Storage`] writes to a primary backend, fans writes out to
//! optional mirrors, and reads from the primary followed by an ordered list
//! of read-only backends.
//!
//! Backends:
//!
//! - [`LocalStore`] - sharded files under a directory
//! - [`MemoryStore`] - in-process map, for tests and simulations
//! - [`HttpStore`] - `PUT`/`GET`/`HEAD {base}/{hash}` over HTTP

mod http;
mod local;
mod memory;

pub use http::HttpStore;
pub use local::{LocalStore, ObjectInfo};
pub use memory::MemoryStore;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::bundle::DeploymentBundle;
use crate::util::hash::ContentHash;
use crate::util::retry::{RetryPolicy, Transient};

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("object {0} not found")]
  NotFound(ContentHash),

  #[error("storage {locator} unavailable: {message}")]
  StorageUnavailable { locator: String, message: String },

  #[error("object {expected} is corrupt (content hashes to {actual})")]
  Corrupt { expected: ContentHash, actual: ContentHash },

  #[error("storage I/O error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to encode object: {0}")]
  Encode(#[from] serde_json::Error),

  #[error("invalid storage pointer {0:?}")]
  InvalidPointer(String),
}

impl Transient for StorageError {
  fn is_transient(&self) -> bool {
    matches!(self, StorageError::StorageUnavailable { .. })
  }
}

/// Where an object lives: the backend it was written to plus its hash.
///
/// Rendered as `<locator>#<hash>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoragePointer {
  pub locator: String,
  pub content_hash: ContentHash,
}

impl StoragePointer {
  pub fn new(locator: impl Into<String>, content_hash: ContentHash) -> Self {
    Self {
      locator: locator.into(),
      content_hash,
    }
  }
}

impl fmt::Display for StoragePointer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}#{}", self.locator, self.content_hash)
  }
}

impl FromStr for StoragePointer {
  type Err = StorageError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let invalid = || StorageError::InvalidPointer(s.to_string());
    let (locator, hash) = s.rsplit_once('#').ok_or_else(invalid)?;
    let content_hash = hash.parse().map_err(|_| invalid())?;
    Ok(Self::new(locator, content_hash))
  }
}

impl TryFrom<String> for StoragePointer {
  type Error = StorageError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<StoragePointer> for String {
  fn from(pointer: StoragePointer) -> Self {
    pointer.to_string()
  }
}

/// One place objects can be written to and read from.
#[async_trait]
pub trait StorageBackend: Send + Sync {
  /// Stable identifier of this backend, used in pointers.
  fn locator(&self) -> String;

  /// Store `bytes`, returning their hash. Storing the same bytes twice is a
  /// no-op.
  async fn put(&self, bytes: &[u8]) -> Result<ContentHash, StorageError>;

  async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, StorageError>;

  async fn has(&self, hash: &ContentHash) -> Result<bool, StorageError>;
}

/// Composite storage: primary, write mirrors and read fallbacks.
#[derive(Clone)]
pub struct Storage {
  primary: Arc<dyn StorageBackend>,
  mirrors: Vec<Arc<dyn StorageBackend>>,
  readers: Vec<Arc<dyn StorageBackend>>,
  retry: RetryPolicy,
}

impl Storage {
  pub fn new(primary: Arc<dyn StorageBackend>) -> Self {
    Self {
      primary,
      mirrors: Vec::new(),
      readers: Vec::new(),
      retry: RetryPolicy::default(),
    }
  }

  /// In-memory storage with no retries.
  pub fn in_memory() -> Self {
    Self::new(Arc::new(MemoryStore::new())).with_retry(RetryPolicy::none())
  }

  /// Also write every object here. Mirror failures are logged, not raised.
  pub fn with_mirror(mut self, mirror: Arc<dyn StorageBackend>) -> Self {
    self.mirrors.push(mirror);
    self
  }

  /// Read from here when the primary does not have an object.
  pub fn with_reader(mut self, reader: Arc<dyn StorageBackend>) -> Self {
    self.readers.push(reader);
    self
  }

  pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
    self.retry = retry;
    self
  }

  pub fn primary(&self) -> &Arc<dyn StorageBackend> {
    &self.primary
  }

  /// Write to the primary, then to every mirror.
  pub async fn put(&self, bytes: &[u8]) -> Result<StoragePointer, StorageError> {
    let hash = self.retry.run("storage put", || self.primary.put(bytes)).await?;

    for mirror in &self.mirrors {
      if let Err(err) = self.retry.run("mirror put", || mirror.put(bytes)).await {
        warn!(mirror = %mirror.locator(), hash = %hash.short(), error = %err, "mirror write failed");
      }
    }

    debug!(hash = %hash.short(), size = bytes.len(), "object stored");
    Ok(StoragePointer::new(self.primary.locator(), hash))
  }

  /// Read an object from the first backend that has it.
  pub async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, StorageError> {
    self.get_from(self.read_order(None), hash).await
  }

  /// Read the object a pointer names, trying its own backend first.
  pub async fn get_pointer(&self, pointer: &StoragePointer) -> Result<Vec<u8>, StorageError> {
    self
      .get_from(self.read_order(Some(&pointer.locator)), &pointer.content_hash)
      .await
  }

  pub async fn has(&self, hash: &ContentHash) -> Result<bool, StorageError> {
    let mut unavailable = None;
    for backend in self.read_order(None) {
      match self.retry.run("storage has", || backend.has(hash)).await {
        Ok(true) => return Ok(true),
        Ok(false) => {}
        Err(err) => unavailable = Some(err),
      }
    }
    match unavailable {
      Some(err) => Err(err),
      None => Ok(false),
    }
  }

  pub async fn put_bundle(&self, bundle: &DeploymentBundle) -> Result<StoragePointer, StorageError> {
    self.put(&bundle.to_bytes()?).await
  }

  pub async fn get_bundle(&self, hash: &ContentHash) -> Result<DeploymentBundle, StorageError> {
    let bytes = self.get(hash).await?;
    Ok(DeploymentBundle::from_bytes(&bytes)?)
  }

  fn read_order(&self, preferred: Option<&str>) -> Vec<&Arc<dyn StorageBackend>> {
    let mut order: Vec<&Arc<dyn StorageBackend>> = std::iter::once(&self.primary).chain(&self.readers).collect();
    if let Some(locator) = preferred
      && let Some(pos) = order.iter().position(|b| b.locator() == locator)
    {
      let backend = order.remove(pos);
      order.insert(0, backend);
    }
    order
  }

  async fn get_from(&self, backends: Vec<&Arc<dyn StorageBackend>>, hash: &ContentHash) -> Result<Vec<u8>, StorageError> {
    let mut last_error = None;
    for backend in backends {
      match self.retry.run("storage get", || backend.get(hash)).await {
        Ok(bytes) => return Ok(bytes),
        Err(StorageError::NotFound(_)) => continue,
        Err(err) => {
          warn!(backend = %backend.locator(), hash = %hash.short(), error = %err, "storage read failed, trying next");
          last_error = Some(err);
        }
      }
    }
    Err(last_error.unwrap_or_else(|| StorageError::NotFound(hash.clone())))
  }
}

/// Verify that `bytes` hash to `expected`.
pub(crate) fn verify(expected: &ContentHash, bytes: &[u8]) -> Result<(), StorageError> {
  let actual = crate::util::hash::hash_bytes(bytes);
  if &actual != expected {
    return Err(StorageError::Corrupt {
      expected: expected.clone(),
      actual,
    });
  }
  Ok(())
}
