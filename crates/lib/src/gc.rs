//! Garbage collection of the local object store.
//!
//! An object is live when the local registry points at it, when the build
//! index records it, or when a live bundle imported it (at any depth).
//! Everything else in the local stores is deleted.

use std::collections::BTreeSet;
use std::fs;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::build::index::{BuildIndex, BuildIndexError};
use crate::bundle::DeploymentBundle;
use crate::config::BuilderConfig;
use crate::registry::{LocalRegistry, RegistryError};
use crate::storage::{LocalStore, StorageError};
use crate::util::hash::ContentHash;

#[derive(Debug, Error)]
pub enum GcError {
  #[error("failed to read registry: {0}")]
  Registry(#[from] RegistryError),

  #[error("failed to read build index: {0}")]
  Index(#[from] BuildIndexError),

  #[error(transparent)]
  Storage(#[from] StorageError),
}

#[derive(Debug, Default, Serialize)]
pub struct GcStats {
  pub roots: usize,
  pub live: usize,
  pub objects_scanned: usize,
  pub objects_deleted: usize,
  pub bytes_freed: u64,
}

#[derive(Debug, Serialize)]
pub struct GcResult {
  pub stats: GcStats,
  pub deleted: Vec<ContentHash>,
}

/// Registry pointers and build index entries.
fn collect_roots(config: &BuilderConfig) -> Result<BTreeSet<ContentHash>, GcError> {
  let mut roots: BTreeSet<ContentHash> = LocalRegistry::new(config.registry_path())
    .load()?
    .pointers()
    .map(|pointer| pointer.content_hash.clone())
    .collect();
  roots.extend(BuildIndex::new(config.build_index_path()).hashes()?);
  Ok(roots)
}

/// Roots plus every bundle they import.
fn collect_live(roots: &BTreeSet<ContentHash>, stores: &[LocalStore]) -> BTreeSet<ContentHash> {
  let mut live = roots.clone();
  for hash in roots {
    let Some(path) = stores.iter().map(|s| s.object_path(hash)).find(|p| p.is_file()) else {
      debug!(hash = %hash.short(), "root not in a local store");
      continue;
    };
    match fs::read(&path).map_err(|e| e.to_string()).and_then(|bytes| {
      DeploymentBundle::from_bytes(&bytes).map_err(|e| e.to_string())
    }) {
      Ok(bundle) => live.extend(bundle.artifacts().import_hashes()),
      Err(error) => warn!(hash = %hash.short(), error = %error, "skipping unreadable root bundle"),
    }
  }
  live
}

/// Delete unreachable objects from every local store. With `dry_run`,
/// report what would be deleted without deleting.
pub fn collect_garbage(config: &BuilderConfig, dry_run: bool) -> Result<GcResult, GcError> {
  let stores: Vec<LocalStore> = config.local_store_dirs().into_iter().map(LocalStore::new).collect();
  let roots = collect_roots(config)?;
  let live = collect_live(&roots, &stores);

  let mut stats = GcStats {
    roots: roots.len(),
    live: live.len(),
    ..GcStats::default()
  };
  let mut deleted = Vec::new();

  for store in &stores {
    stats.objects_scanned += store.list()?.len();
    for object in store.collect_garbage(&live, dry_run)? {
      stats.objects_deleted += 1;
      stats.bytes_freed += object.size;
      deleted.push(object.hash);
    }
  }

  info!(
    roots = stats.roots,
    scanned = stats.objects_scanned,
    deleted = stats.objects_deleted,
    bytes = stats.bytes_freed,
    dry_run,
    "garbage collection finished"
  );
  Ok(GcResult { stats, deleted })
}
