//! Inspect command implementation.
//!
//! Shows a bundle's metadata, steps and deployed contracts.

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use serde_json::json;

use chainbuild_lib::bundle::{BundleStatus, DeploymentBundle};
use chainbuild_lib::config::BuilderConfig;
use chainbuild_lib::store_lock::{BuildLock, LockMode};

use super::load_bundle;
use crate::output::{OutputFormat, format_timestamp, print_json, print_stat, print_success, print_warning, symbols};

pub async fn cmd_inspect(
  config: &BuilderConfig,
  target: &str,
  chain_id: Option<u64>,
  verbose: bool,
  output: OutputFormat,
) -> Result<()> {
  let _lock =
    BuildLock::acquire(&config.data_dir(), LockMode::Shared, "inspect").context("Failed to acquire build lock")?;

  let bundle = load_bundle(config, target, chain_id).await?;
  let hash = bundle.content_hash().context("Failed to hash bundle")?;

  if output.is_json() {
    return print_json(&json!({ "contentHash": hash, "bundle": bundle }));
  }

  let reference = bundle
    .reference()
    .map(|r| r.to_string())
    .unwrap_or_else(|_| bundle.meta.package.name.clone());
  match bundle.meta.status {
    BundleStatus::Complete => print_success(&reference),
    BundleStatus::Partial => print_warning(&format!(
      "{} (partial, failed at {})",
      reference,
      bundle.meta.failed_node.as_deref().unwrap_or("unknown step")
    )),
  }
  print_stat("Bundle", hash.as_str());
  print_stat("Chain", &bundle.meta.chain_id.to_string());
  print_stat("Built", &format_timestamp(bundle.meta.timestamp));
  print_stat("Generator", &bundle.meta.generator);
  print_stat("Steps", &bundle.state.len().to_string());

  print_steps(&bundle, verbose);
  print_contracts(&bundle);
  Ok(())
}

fn print_steps(bundle: &DeploymentBundle, verbose: bool) {
  if bundle.definition.nodes.is_empty() {
    return;
  }
  println!();
  println!("Steps:");
  for node in &bundle.definition.nodes {
    match bundle.state.get(&node.key) {
      Some(state) if verbose => println!(
        "  {} {} v{} {}",
        symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
        node.key,
        state.version,
        state.fingerprint.short().if_supports_color(Stream::Stdout, |s| s.dimmed())
      ),
      Some(state) => println!(
        "  {} {} v{}",
        symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
        node.key,
        state.version
      ),
      None => println!(
        "  {} {} {}",
        symbols::INFO.if_supports_color(Stream::Stdout, |s| s.dimmed()),
        node.key,
        "(not built)".if_supports_color(Stream::Stdout, |s| s.dimmed())
      ),
    }
  }
}

fn print_contracts(bundle: &DeploymentBundle) {
  let artifacts = bundle.artifacts();
  if !artifacts.contracts.is_empty() {
    println!();
    println!("Contracts:");
    for (name, contract) in &artifacts.contracts {
      println!("  {} {}", name, contract.address.if_supports_color(Stream::Stdout, |s| s.cyan()));
    }
  }

  if !artifacts.imports.is_empty() {
    println!();
    println!("Imports:");
    for (label, import) in &artifacts.imports {
      println!(
        "  {} {} {}",
        label,
        symbols::ARROW,
        import.package.if_supports_color(Stream::Stdout, |s| s.cyan())
      );
      for (name, contract) in &import.artifacts.contracts {
        println!("    {}.{} {}", label, name, contract.address);
      }
    }
  }
}
