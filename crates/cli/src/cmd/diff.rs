//! Diff command implementation.
//!
//! Compares two bundles step by step and lists moved contract addresses.

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use serde_json::json;

use chainbuild_lib::bundle::{BundleDiff, diff_bundles};
use chainbuild_lib::config::BuilderConfig;
use chainbuild_lib::store_lock::{BuildLock, LockMode};

use super::load_bundle;
use crate::output::{OutputFormat, print_json, symbols};

pub async fn cmd_diff(
  config: &BuilderConfig,
  old: &str,
  new: &str,
  chain_id: Option<u64>,
  verbose: bool,
  output: OutputFormat,
) -> Result<()> {
  let _lock =
    BuildLock::acquire(&config.data_dir(), LockMode::Shared, "diff").context("Failed to acquire build lock")?;

  let old_bundle = load_bundle(config, old, chain_id).await?;
  let new_bundle = load_bundle(config, new, chain_id).await?;
  let diff = diff_bundles(&old_bundle, &new_bundle);

  if output.is_json() {
    return print_json(&json!({ "old": old, "new": new, "diff": diff }));
  }

  println!("Comparing {} {} {}", old, symbols::ARROW, new);
  println!();
  print_human_diff(&diff, verbose);
  Ok(())
}

fn print_human_diff(diff: &BundleDiff, verbose: bool) {
  if diff.is_empty() {
    if diff.meta_changed {
      println!("No step changes (metadata differs).");
    } else {
      println!("No changes.");
    }
    return;
  }

  print_keys(&diff.added, symbols::ADD, "added");
  print_keys(&diff.changed, symbols::MODIFY, "changed");
  print_keys(&diff.removed, symbols::REMOVE, "removed");
  if !diff.unchanged.is_empty() {
    if verbose {
      for key in &diff.unchanged {
        println!("  {} {}", symbols::SKIP, key);
      }
    } else {
      println!("  {} {} unchanged", symbols::SKIP, diff.unchanged.len());
    }
  }

  if !diff.addresses.is_empty() {
    println!();
    println!("Addresses:");
    for change in &diff.addresses {
      let old = change.old.as_deref().unwrap_or("(none)");
      let new = change.new.as_deref().unwrap_or("(none)");
      println!(
        "  {} {} {} {}",
        change.contract,
        old.if_supports_color(Stream::Stdout, |s| s.red()),
        symbols::ARROW,
        new.if_supports_color(Stream::Stdout, |s| s.green())
      );
    }
  }
}

fn print_keys(keys: &[String], symbol: &str, label: &str) {
  for key in keys {
    let colored = match label {
      "added" => symbol.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
      "removed" => symbol.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
      _ => symbol.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    };
    println!(
      "  {} {} {}",
      colored,
      key,
      format!("({})", label).if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }
}
