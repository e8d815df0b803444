//! Implementation of the `chainbuild plan` command.
//!
//! Predicts which steps a build would execute and which it would reuse,
//! without sending anything to a chain.

use anyhow::{Context, Result};
use owo_colors::{OwoColorize, Stream};
use serde_json::json;

use chainbuild_lib::build::index::BuildIndex;
use chainbuild_lib::build::{PlanAction, PlanReason, plan_build};
use chainbuild_lib::config::BuilderConfig;

use super::{ChainMode, DefinitionArgs, Session};
use crate::output::{OutputFormat, print_info, print_json, print_stat, symbols};

pub async fn cmd_plan(config: &BuilderConfig, args: &DefinitionArgs, fresh: bool, output: OutputFormat) -> Result<()> {
  let session = Session::open(config, args, ChainMode::Simulated).await?;

  let index = BuildIndex::new(config.build_index_path());
  let prior = if fresh {
    None
  } else {
    session.prior_bundle(&index).await?
  };
  let has_prior = prior.is_some();

  let request = session.request(prior);
  let plan = plan_build(&session.definition, &session.registry, &session.env, &request)
    .await
    .with_context(|| format!("Failed to plan {}", session.reference))?;

  if output.is_json() {
    return print_json(&json!({
      "package": session.reference.to_string(),
      "prior": has_prior,
      "nodes": plan.nodes,
    }));
  }

  println!("Plan: {}", session.reference);
  if !has_prior {
    print_info("No prior build recorded; every step executes");
  }
  println!();

  for node in &plan.nodes {
    match &node.action {
      PlanAction::Reuse { version } => println!(
        "  {} {} {}",
        symbols::SKIP.if_supports_color(Stream::Stdout, |s| s.dimmed()),
        node.key,
        format!("(reuse v{})", version).if_supports_color(Stream::Stdout, |s| s.dimmed())
      ),
      PlanAction::Execute(reason) => {
        let (symbol, reason) = describe(reason);
        println!(
          "  {} {} {}",
          symbol,
          node.key,
          format!("({})", reason).if_supports_color(Stream::Stdout, |s| s.dimmed())
        );
      }
    }
  }

  println!();
  print_stat("Steps", &plan.nodes.len().to_string());
  print_stat("To execute", &plan.to_execute().count().to_string());
  print_stat("Reused", &plan.reused().count().to_string());
  if plan.is_noop() {
    print_info("Nothing to do");
  }
  Ok(())
}

fn describe(reason: &PlanReason) -> (String, String) {
  match reason {
    PlanReason::New => (
      symbols::ADD.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
      "new".to_string(),
    ),
    PlanReason::FingerprintChanged => (
      symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
      "config changed".to_string(),
    ),
    PlanReason::DependencyChanged(dep) => (
      symbols::MODIFY.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
      format!("{} {} changes", symbols::ARROW, dep),
    ),
    PlanReason::Unresolved(message) => (
      symbols::WARNING.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
      format!("unresolved: {}", message),
    ),
  }
}
