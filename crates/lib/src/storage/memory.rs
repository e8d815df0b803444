use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{StorageBackend, StorageError};
use crate::util::hash::{ContentHash, hash_bytes};

/// Objects held in process memory.
pub struct MemoryStore {
  name: String,
  objects: Mutex<BTreeMap<ContentHash, Vec<u8>>>,
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::named("default")
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// A store whose locator is `memory://<name>`.
  pub fn named(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      objects: Mutex::new(BTreeMap::new()),
    }
  }

  pub fn len(&self) -> usize {
    self.objects().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  fn objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<ContentHash, Vec<u8>>> {
    self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

#[async_trait]
impl StorageBackend for MemoryStore {
  fn locator(&self) -> String {
    format!("memory://{}", self.name)
  }

  async fn put(&self, bytes: &[u8]) -> Result<ContentHash, StorageError> {
    let hash = hash_bytes(bytes);
    self.objects().entry(hash.clone()).or_insert_with(|| bytes.to_vec());
    Ok(hash)
  }

  async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, StorageError> {
    self
      .objects()
      .get(hash)
      .cloned()
      .ok_or_else(|| StorageError::NotFound(hash.clone()))
  }

  async fn has(&self, hash: &ContentHash) -> Result<bool, StorageError> {
    Ok(self.objects().contains_key(hash))
  }
}
