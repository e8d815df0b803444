//! `import.<label>`: expose another package's outputs under `imports.<label>`.
//!
//! ```toml
//! [import.registry]
//! source = "core-registry:1.2.0"
//! chain_id = 10          # defaults to the build's chain
//! preset = "main"
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::action::{
  ActionError, ActionHandler, ExecutionEnv, ValidationIssue, extend_fingerprint, parse_config, render_string,
  resolved_config_hash, shape_issues,
};
use crate::build::BuildContext;
use crate::bundle::{ChainArtifacts, ImportData};
use crate::consts::MAX_IMPORT_DEPTH;
use crate::definition::ActionNode;
use crate::reference::{PackageReference, validate_preset};
use crate::registry::PackageLoader;
use crate::template;
use crate::util::hash::ContentHash;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImportConfig {
  source: String,
  #[serde(default)]
  chain_id: Option<u64>,
  #[serde(default)]
  preset: Option<String>,
}

impl ImportConfig {
  fn reference(&self, ctx: &BuildContext) -> Result<PackageReference, ActionError> {
    let source = render_string(&self.source, &ctx.scope(), "source")?;
    let mut reference = PackageReference::parse_with_chain_id(&source, self.chain_id.unwrap_or(ctx.chain_id))
      .map_err(|e| ActionError::InvalidConfig(e.to_string()))?;
    if let Some(preset) = &self.preset {
      reference.preset = preset.clone();
    }
    Ok(reference)
  }
}

fn loader<'a>(env: &'a ExecutionEnv, reference: &PackageReference) -> Result<&'a PackageLoader, ActionError> {
  env
    .packages
    .as_deref()
    .ok_or_else(|| ActionError::NoPackageLoader(reference.to_string()))
}

pub struct ImportAction;

#[async_trait]
impl ActionHandler for ImportAction {
  fn validate(&self, config: &Value) -> Vec<ValidationIssue> {
    let (parsed, mut issues) = shape_issues::<ImportConfig>(config);
    let Some(cfg) = parsed else {
      return issues;
    };

    if !template::has_template(&cfg.source)
      && let Err(err) = PackageReference::parse(&cfg.source)
    {
      issues.push(ValidationIssue::new("source", err.to_string()));
    }
    if let Some(preset) = &cfg.preset
      && let Err(reason) = validate_preset(preset)
    {
      issues.push(ValidationIssue::new("preset", reason));
    }
    issues
  }

  fn outputs(&self, label: &str, _config: &Value) -> Vec<String> {
    vec![format!("imports.{}", label)]
  }

  async fn compute_state_fingerprint(
    &self,
    node: &ActionNode,
    ctx: &BuildContext,
    env: &ExecutionEnv,
  ) -> Result<ContentHash, ActionError> {
    let cfg: ImportConfig = parse_config(&node.config)?;
    let reference = cfg.reference(ctx)?;
    let pointer = loader(env, &reference)?.resolve(&reference).await?;
    let config_hash = resolved_config_hash(&node.config, ctx)?;

    Ok(extend_fingerprint(
      &config_hash,
      &[
        ("package", &reference.to_string()),
        ("content", pointer.content_hash.as_str()),
      ],
    ))
  }

  async fn execute(
    &self,
    node: &ActionNode,
    ctx: &BuildContext,
    env: &ExecutionEnv,
  ) -> Result<ChainArtifacts, ActionError> {
    let cfg: ImportConfig = parse_config(&node.config)?;
    let reference = cfg.reference(ctx)?;
    let (pointer, bundle) = loader(env, &reference)?.load(&reference).await?;

    if !bundle.is_complete() {
      warn!(
        step = %node.key,
        package = %reference,
        failed_node = ?bundle.meta.failed_node,
        "importing a partially built package"
      );
    }

    let imported = bundle.artifacts();
    let depth = 1 + imported.import_depth();
    if depth > MAX_IMPORT_DEPTH {
      return Err(ActionError::ImportTooDeep {
        package: reference.to_string(),
        depth,
      });
    }

    info!(step = %node.key, package = %reference, hash = %pointer.content_hash.short(), "package imported");

    let mut artifacts = ChainArtifacts::default();
    artifacts.imports.insert(
      node.label.clone(),
      ImportData {
        url: pointer.to_string(),
        content_hash: pointer.content_hash.clone(),
        package: reference.to_string(),
        artifacts: imported,
      },
    );
    Ok(artifacts)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::action::MemoryArtifacts;
  use crate::provider::MemoryChain;
  use crate::util::testutil::{build_ctx, contract_data, exec_env, node, nested_bundle, package_loader, publish_bundle};
  use serde_json::json;
  use std::sync::Arc;

  #[test]
  fn validate_checks_source() {
    assert!(ImportAction.validate(&json!({ "source": "dep:1.0.0" })).is_empty());
    assert!(ImportAction.validate(&json!({ "source": "<%= settings.dep %>" })).is_empty());

    let issues = ImportAction.validate(&json!({ "source": "Not A Package", "preset": "BAD" }));
    let fields: Vec<_> = issues.iter().map(|i| i.field.as_str()).collect();
    assert_eq!(fields, vec!["source", "preset"]);
  }

  #[tokio::test]
  async fn imports_published_artifacts() {
    let loader = package_loader();
    let mut bundle = nested_bundle("dep", 0);
    bundle
      .state
      .get_mut("contract.Root")
      .unwrap()
      .artifacts
      .contracts
      .insert("Registry".into(), contract_data("Registry", "0x00000000000000000000000000000000000000d1"));
    let hash = publish_bundle(&loader, &bundle).await;

    let env = exec_env(Arc::new(MemoryChain::new(13370)), MemoryArtifacts::new()).with_packages(loader);
    let step = node("import.dep", json!({ "source": "dep" }));
    let artifacts = ImportAction.execute(&step, &build_ctx(), &env).await.unwrap();

    let import = &artifacts.imports["dep"];
    assert_eq!(import.content_hash, hash);
    assert_eq!(import.package, "dep:latest@main/13370");
    assert!(import.url.ends_with(&format!("#{}", hash)));
    assert_eq!(
      artifacts.find_contract("dep.Registry").unwrap().address,
      "0x00000000000000000000000000000000000000d1"
    );
  }

  #[tokio::test]
  async fn fingerprint_follows_published_content() {
    let loader = package_loader();
    publish_bundle(&loader, &nested_bundle("dep", 0)).await;

    let env = exec_env(Arc::new(MemoryChain::new(13370)), MemoryArtifacts::new()).with_packages(loader.clone());
    let step = node("import.dep", json!({ "source": "dep:latest" }));
    let before = ImportAction.compute_state_fingerprint(&step, &build_ctx(), &env).await.unwrap();

    publish_bundle(&loader, &nested_bundle("dep", 1)).await;
    let after = ImportAction.compute_state_fingerprint(&step, &build_ctx(), &env).await.unwrap();
    assert_ne!(before, after);
  }

  #[tokio::test]
  async fn rejects_nesting_beyond_limit() {
    let loader = package_loader();
    publish_bundle(&loader, &nested_bundle("dep", MAX_IMPORT_DEPTH)).await;

    let env = exec_env(Arc::new(MemoryChain::new(13370)), MemoryArtifacts::new()).with_packages(loader);
    let step = node("import.dep", json!({ "source": "dep:latest" }));
    let err = ImportAction.execute(&step, &build_ctx(), &env).await.unwrap_err();
    assert!(matches!(err, ActionError::ImportTooDeep { depth, .. } if depth == MAX_IMPORT_DEPTH + 1));
  }

  #[tokio::test]
  async fn requires_a_package_loader() {
    let env = exec_env(Arc::new(MemoryChain::new(13370)), MemoryArtifacts::new());
    let step = node("import.dep", json!({ "source": "dep" }));
    let err = ImportAction.execute(&step, &build_ctx(), &env).await.unwrap_err();
    assert!(matches!(err, ActionError::NoPackageLoader(_)));
  }
}
