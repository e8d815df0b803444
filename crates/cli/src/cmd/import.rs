//! Implementation of the `chainbuild import` command.
//!
//! Restores an archive into the local store. With `--record` the bundle also
//! becomes the latest build of its package, so the next `build` continues
//! from it.

use std::path::Path;

use anyhow::{Context, Result};

use chainbuild_lib::archive;
use chainbuild_lib::build::index::{BuildIndex, BuildRecord};
use chainbuild_lib::config::BuilderConfig;
use chainbuild_lib::store_lock::{BuildLock, LockMode};

use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success};

pub async fn cmd_import(config: &BuilderConfig, file: &Path, record: bool, output: OutputFormat) -> Result<()> {
  let _lock =
    BuildLock::acquire(&config.data_dir(), LockMode::Exclusive, "import").context("Failed to acquire build lock")?;

  let bytes = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
  let bundle = archive::import(&bytes).with_context(|| format!("Failed to import {}", file.display()))?;
  let reference = bundle.reference().context("Archive names an invalid package")?;

  let storage = config.storage().context("Failed to set up storage")?;
  let pointer = storage.put_bundle(&bundle).await.context("Failed to store bundle")?;

  if record {
    BuildIndex::new(config.build_index_path())
      .record(
        &reference,
        BuildRecord {
          content_hash: pointer.content_hash.clone(),
          status: bundle.meta.status,
          timestamp: bundle.meta.timestamp,
        },
      )
      .context("Failed to record build")?;
  }

  if output.is_json() {
    print_json(&serde_json::json!({
      "package": reference.to_string(),
      "pointer": pointer,
      "recorded": record,
    }))?;
  } else {
    print_success(&format!("Imported {}", reference));
    print_stat("Bundle", pointer.content_hash.as_str());
    print_stat("Stored at", &pointer.locator);
    if record {
      print_info("Recorded as the latest build");
    }
  }
  Ok(())
}
