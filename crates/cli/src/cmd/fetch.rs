//! Implementation of the `chainbuild fetch` command.
//!
//! Resolves a published package through the configured registries and copies
//! its bundle into the primary store, optionally writing it to a file too.

use std::path::Path;

use anyhow::{Context, Result};

use chainbuild_lib::archive;
use chainbuild_lib::config::BuilderConfig;
use chainbuild_lib::reference::PackageReference;
use chainbuild_lib::store_lock::{BuildLock, LockMode};

use super::rpc_provider;
use crate::output::{OutputFormat, print_json, print_stat, print_success};

pub async fn cmd_fetch(
  config: &BuilderConfig,
  target: &str,
  out: Option<&Path>,
  as_archive: bool,
  output: OutputFormat,
) -> Result<()> {
  let _lock =
    BuildLock::acquire(&config.data_dir(), LockMode::Exclusive, "fetch").context("Failed to acquire build lock")?;

  let reference = PackageReference::parse_with_chain_id(target, config.chain_id())
    .with_context(|| format!("Invalid reference {:?}", target))?;
  let loader = config
    .package_loader(rpc_provider(config)?)
    .context("Failed to set up registry and storage")?;

  let (source, bundle) = loader
    .load(&reference)
    .await
    .with_context(|| format!("Failed to fetch {}", reference))?;
  let local = loader
    .storage()
    .put_bundle(&bundle)
    .await
    .context("Failed to store bundle")?;

  if let Some(path) = out {
    let bytes = if as_archive {
      archive::export(&bundle).context("Failed to encode archive")?
    } else {
      bundle.to_bytes().context("Failed to encode bundle")?
    };
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))?;
  }

  if output.is_json() {
    print_json(&serde_json::json!({
      "package": reference.to_string(),
      "source": source,
      "stored": local,
      "file": out,
    }))?;
  } else {
    print_success(&format!("Fetched {}", reference));
    print_stat("Source", &source.to_string());
    print_stat("Stored at", &local.to_string());
    if let Some(path) = out {
      print_stat("Written to", &path.display().to_string());
    }
  }
  Ok(())
}
