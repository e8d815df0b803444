//! Implementation of the `chainbuild publish` command.

use anyhow::{Context, Result, bail};
use clap::Args;

use chainbuild_lib::config::BuilderConfig;
use chainbuild_lib::reference::PackageReference;
use chainbuild_lib::registry::PublishOutcome;
use chainbuild_lib::store_lock::{BuildLock, LockMode};

use super::{load_bundle, rpc_provider};
use crate::output::{OutputFormat, print_info, print_json, print_stat, print_success};

#[derive(Args, Debug)]
pub struct PublishArgs {
  /// Package reference of a recorded build, or a bundle/archive file
  pub target: String,

  /// Publish under another reference (e.g. `token:latest`)
  #[arg(long = "as", value_name = "REFERENCE")]
  pub alias: Option<String>,

  /// Publisher identity checked against the package owner
  #[arg(long, default_value = "local")]
  pub publisher: String,

  /// Chain id for references without a `/chainId` suffix
  #[arg(long)]
  pub chain_id: Option<u64>,

  /// Publish a partial build
  #[arg(long)]
  pub allow_partial: bool,
}

pub async fn cmd_publish(config: &BuilderConfig, args: &PublishArgs, output: OutputFormat) -> Result<()> {
  let _lock =
    BuildLock::acquire(&config.data_dir(), LockMode::Exclusive, "publish").context("Failed to acquire build lock")?;

  let bundle = load_bundle(config, &args.target, args.chain_id).await?;
  if !bundle.is_complete() && !args.allow_partial {
    bail!(
      "Refusing to publish a partial build (failed at {}). Pass --allow-partial to publish it anyway",
      bundle.meta.failed_node.as_deref().unwrap_or("unknown step")
    );
  }

  let reference = match &args.alias {
    Some(alias) => PackageReference::parse_with_chain_id(alias, bundle.meta.chain_id)
      .with_context(|| format!("Invalid reference {:?}", alias))?,
    None => bundle.reference().context("Bundle names an invalid package")?,
  };
  if reference.chain_id != bundle.meta.chain_id {
    bail!(
      "Bundle was built for chain {}, cannot publish it as {}",
      bundle.meta.chain_id,
      reference
    );
  }

  let loader = config
    .package_loader(rpc_provider(config)?)
    .context("Failed to set up registry and storage")?;
  let (pointer, outcome) = loader
    .publish_as(&bundle, &reference, &args.publisher)
    .await
    .with_context(|| format!("Failed to publish {}", reference))?;

  if output.is_json() {
    print_json(&serde_json::json!({
      "package": reference.to_string(),
      "pointer": pointer,
      "outcome": outcome,
    }))?;
  } else {
    match outcome {
      PublishOutcome::Published => print_success(&format!("Published {}", reference)),
      PublishOutcome::Unchanged => print_info(&format!("{} already points at this bundle", reference)),
    }
    print_stat("Pointer", &pointer.to_string());
  }
  Ok(())
}
