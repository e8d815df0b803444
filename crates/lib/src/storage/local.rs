//! Objects stored as files.
//!
//! # Layout
//!
//! ```text
//! {root}/objects/
//! └── <first two hex chars>/
//!     └── <hash>
//! ```
//!
//! Writes go to a temporary file in the shard directory and are renamed into
//! place, so a reader never sees a partial object. Reads re-hash the content.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::{StorageBackend, StorageError, verify};
use crate::util::hash::{ContentHash, hash_bytes};

const OBJECTS_DIR: &str = "objects";

/// One stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
  pub hash: ContentHash,
  pub size: u64,
}

#[derive(Debug, Clone)]
pub struct LocalStore {
  root: PathBuf,
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StorageError + '_ {
  move |source| StorageError::Io {
    path: path.to_path_buf(),
    source,
  }
}

impl LocalStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn object_path(&self, hash: &ContentHash) -> PathBuf {
    self.root.join(OBJECTS_DIR).join(&hash.as_str()[..2]).join(hash.as_str())
  }

  /// Every object in the store, sorted by hash. Stray files are ignored.
  pub fn list(&self) -> Result<Vec<ObjectInfo>, StorageError> {
    let objects_dir = self.root.join(OBJECTS_DIR);
    if !objects_dir.exists() {
      return Ok(Vec::new());
    }

    let mut objects = Vec::new();
    for entry in WalkDir::new(&objects_dir).min_depth(2).max_depth(2) {
      let entry = entry.map_err(|e| StorageError::Io {
        path: objects_dir.clone(),
        source: e.into(),
      })?;
      if !entry.file_type().is_file() {
        continue;
      }
      let Some(hash) = entry.file_name().to_str().and_then(|n| n.parse::<ContentHash>().ok()) else {
        continue;
      };
      let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
      objects.push(ObjectInfo { hash, size });
    }
    objects.sort_by(|a, b| a.hash.cmp(&b.hash));
    Ok(objects)
  }

  /// Delete one object. Returns whether it existed.
  pub fn remove(&self, hash: &ContentHash) -> Result<bool, StorageError> {
    let path = self.object_path(hash);
    match fs::remove_file(&path) {
      Ok(()) => Ok(true),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
      Err(e) => Err(io_error(&path)(e)),
    }
  }

  /// Delete every object not in `keep`. Returns the objects removed (or
  /// that would be removed, with `dry_run`).
  pub fn collect_garbage(&self, keep: &BTreeSet<ContentHash>, dry_run: bool) -> Result<Vec<ObjectInfo>, StorageError> {
    let garbage: Vec<ObjectInfo> = self
      .list()?
      .into_iter()
      .filter(|object| !keep.contains(&object.hash))
      .collect();

    if !dry_run {
      for object in &garbage {
        self.remove(&object.hash)?;
        debug!(hash = %object.hash.short(), "object removed");
      }
      if !garbage.is_empty() {
        info!(removed = garbage.len(), "local store collected");
      }
    }
    Ok(garbage)
  }
}

#[async_trait]
impl StorageBackend for LocalStore {
  fn locator(&self) -> String {
    format!("file://{}", self.root.display())
  }

  async fn put(&self, bytes: &[u8]) -> Result<ContentHash, StorageError> {
    let hash = hash_bytes(bytes);
    let path = self.object_path(&hash);
    if path.exists() {
      return Ok(hash);
    }

    let shard = path.parent().unwrap_or(&self.root);
    fs::create_dir_all(shard).map_err(io_error(shard))?;

    let mut temp = tempfile::NamedTempFile::new_in(shard).map_err(io_error(shard))?;
    temp.write_all(bytes).map_err(io_error(temp.path()))?;
    temp.as_file().sync_all().map_err(io_error(&path))?;
    temp.persist(&path).map_err(|e| io_error(&path)(e.error))?;

    debug!(hash = %hash.short(), path = %path.display(), "object written");
    Ok(hash)
  }

  async fn get(&self, hash: &ContentHash) -> Result<Vec<u8>, StorageError> {
    let path = self.object_path(hash);
    let bytes = match tokio::fs::read(&path).await {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(StorageError::NotFound(hash.clone())),
      Err(e) => return Err(io_error(&path)(e)),
    };
    verify(hash, &bytes)?;
    Ok(bytes)
  }

  async fn has(&self, hash: &ContentHash) -> Result<bool, StorageError> {
    Ok(tokio::fs::try_exists(self.object_path(hash)).await.unwrap_or(false))
  }
}
