//! Implementation of the `chainbuild build` command.
//!
//! Builds a chain definition against the configured provider (or a simulated
//! chain), reusing every step whose fingerprint matches the last recorded
//! build of the same package. The resulting bundle is stored and recorded in
//! the build index, partial or not.

use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::json;

use chainbuild_lib::build::index::{BuildIndex, BuildRecord};
use chainbuild_lib::build::{BuildOutcome, build};
use chainbuild_lib::config::BuilderConfig;
use chainbuild_lib::store_lock::{BuildLock, LockMode};

use super::{ChainMode, DefinitionArgs, Session};
use crate::output::{
  OutputFormat, format_duration, format_timestamp, print_error, print_info, print_json, print_node, print_stat,
  print_success, print_warning,
};

#[derive(Args, Debug)]
pub struct BuildArgs {
  #[command(flatten)]
  pub definition: DefinitionArgs,

  /// Run against an in-memory simulated chain
  #[arg(long)]
  pub simulate: bool,

  /// Ignore the last recorded build and execute every step
  #[arg(long)]
  pub fresh: bool,

  /// Maximum steps executing at once
  #[arg(short = 'j', long)]
  pub parallelism: Option<usize>,

  /// Fixed build timestamp in unix seconds
  #[arg(long)]
  pub timestamp: Option<u64>,
}

pub async fn cmd_build(config: &BuilderConfig, args: &BuildArgs, output: OutputFormat) -> Result<()> {
  let start = Instant::now();
  let _lock =
    BuildLock::acquire(&config.data_dir(), LockMode::Exclusive, "build").context("Failed to acquire build lock")?;

  let mode = if args.simulate {
    ChainMode::Simulated
  } else {
    ChainMode::Rpc
  };
  let session = Session::open(config, &args.definition, mode).await?;

  let index = BuildIndex::new(config.build_index_path());
  let prior = if args.fresh {
    None
  } else {
    session.prior_bundle(&index).await?
  };

  let mut options = config.build_options();
  if let Some(parallelism) = args.parallelism {
    options.parallelism = parallelism.max(1);
  }
  options.timestamp = args.timestamp;

  let request = session.request(prior).with_options(options);
  let outcome = build(&session.definition, &session.registry, &session.env, &request)
    .await
    .with_context(|| format!("Failed to build {}", session.reference))?;

  let pointer = session
    .loader
    .storage()
    .put_bundle(&outcome.bundle)
    .await
    .context("Failed to store bundle")?;
  index
    .record(
      &session.reference,
      BuildRecord {
        content_hash: pointer.content_hash.clone(),
        status: outcome.bundle.meta.status,
        timestamp: outcome.bundle.meta.timestamp,
      },
    )
    .context("Failed to record build")?;

  if output.is_json() {
    print_json(&json!({
      "package": session.reference.to_string(),
      "contentHash": pointer.content_hash,
      "pointer": pointer,
      "phase": outcome.report.phase,
      "nodes": outcome.report.nodes,
      "failures": outcome
        .report
        .failures
        .iter()
        .map(|f| json!({ "node": f.node, "error": f.error.to_string() }))
        .collect::<Vec<_>>(),
    }))?;
  } else {
    print_report(&session, &outcome, &pointer.content_hash.to_string(), start);
  }

  if !outcome.report.is_complete() {
    let failed: Vec<&str> = outcome.report.failures.iter().map(|f| f.node.as_str()).collect();
    bail!("Build stopped: {} step(s) failed: {}", failed.len(), failed.join(", "));
  }
  Ok(())
}

fn print_report(session: &Session, outcome: &BuildOutcome, hash: &str, start: Instant) {
  println!();
  for (key, status) in &outcome.report.nodes {
    print_node(key, *status);
  }
  println!();

  for failure in &outcome.report.failures {
    print_error(&format!("{}: {}", failure.node, failure.error));
  }

  let executed = outcome.report.executed().count();
  let skipped = outcome.report.skipped().count();
  if outcome.report.is_complete() {
    if executed == 0 {
      print_info(&format!("{} is up to date", session.reference));
    } else {
      print_success(&format!("Built {}", session.reference));
    }
  } else {
    print_warning(&format!("Partial build of {} recorded", session.reference));
  }

  print_stat("Bundle", hash);
  print_stat("Executed", &executed.to_string());
  print_stat("Reused", &skipped.to_string());
  print_stat("Timestamp", &format_timestamp(outcome.bundle.meta.timestamp));
  print_stat("Duration", &format_duration(start.elapsed()));
}
