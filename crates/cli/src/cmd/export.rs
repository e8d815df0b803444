//! Implementation of the `chainbuild export` command.

use std::path::Path;

use anyhow::{Context, Result};

use chainbuild_lib::archive;
use chainbuild_lib::config::BuilderConfig;
use chainbuild_lib::store_lock::{BuildLock, LockMode};

use super::load_bundle;
use crate::output::{OutputFormat, format_bytes, print_json, print_stat, print_success};

/// Write the bundle named by `target` to `file` as a portable archive.
pub async fn cmd_export(
  config: &BuilderConfig,
  target: &str,
  file: &Path,
  chain_id: Option<u64>,
  output: OutputFormat,
) -> Result<()> {
  let _lock =
    BuildLock::acquire(&config.data_dir(), LockMode::Shared, "export").context("Failed to acquire build lock")?;

  let bundle = load_bundle(config, target, chain_id).await?;
  let bytes = archive::export(&bundle).context("Failed to encode archive")?;
  std::fs::write(file, &bytes).with_context(|| format!("Failed to write {}", file.display()))?;

  let hash = bundle.content_hash().context("Failed to hash bundle")?;
  if output.is_json() {
    print_json(&serde_json::json!({
      "file": file,
      "contentHash": hash,
      "bytes": bytes.len(),
    }))?;
  } else {
    print_success(&format!("Exported to {}", file.display()));
    print_stat("Bundle", hash.as_str());
    print_stat("Size", &format_bytes(bytes.len() as u64));
  }
  Ok(())
}
