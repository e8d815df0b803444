use std::sync::Arc;

use chainbuild_lib::action::{ActionRegistry, ExecutionEnv, MemoryArtifacts};
use chainbuild_lib::archive;
use chainbuild_lib::build::{BuildOptions, BuildRequest, build};
use chainbuild_lib::bundle::{DeploymentBundle, diff_bundles};
use chainbuild_lib::definition::ChainDefinition;
use chainbuild_lib::provider::MemoryChain;
use chainbuild_lib::reference::PackageReference;
use chainbuild_lib::registry::{LoadError, MemoryRegistry, PackageLoader, RegistryError, RegistryResolver};
use chainbuild_lib::storage::Storage;

const TOKEN: &str = r#"
name = "token"
version = "1.0.0"

[contract.Token]
args = ["0x0000000000000000000000000000000000000001"]
"#;

const APP: &str = r#"
name = "app"
version = "2.0.0"

[import.token]
source = "token:1.0.0"

[contract.Vault]
args = ["<%= imports.token.contracts.Token.address %>"]

[invoke.approve]
target = ["token.Token"]
func = "approve"
args = ["<%= contracts.Vault.address %>"]
"#;

struct World {
  chain: Arc<MemoryChain>,
  loader: Arc<PackageLoader>,
  registry: ActionRegistry,
  env: ExecutionEnv,
}

impl World {
  fn new() -> Self {
    let chain = Arc::new(MemoryChain::new(13370));
    let loader = Arc::new(PackageLoader::new(
      RegistryResolver::new().with_registry(Arc::new(MemoryRegistry::new())),
      Storage::in_memory(),
    ));
    let artifacts = MemoryArtifacts::new().with("Token", "0x6080").with("Vault", "0x6090");
    let env = ExecutionEnv::new(chain.clone(), Arc::new(artifacts)).with_packages(loader.clone());
    Self {
      chain,
      loader,
      registry: ActionRegistry::builtin(),
      env,
    }
  }

  async fn build(&self, source: &str, prior: Option<DeploymentBundle>) -> DeploymentBundle {
    let definition = ChainDefinition::from_toml_str(source, &self.registry).unwrap();
    let request = BuildRequest::new(13370).with_prior(prior).with_options(BuildOptions {
      parallelism: 2,
      timestamp: Some(1_700_000_000),
    });
    let outcome = build(&definition, &self.registry, &self.env, &request).await.unwrap();
    assert!(outcome.report.is_complete(), "build failed: {:?}", outcome.report.failures);
    outcome.bundle
  }
}

#[tokio::test]
async fn published_package_feeds_dependent_build() {
  let world = World::new();

  let token = world.build(TOKEN, None).await;
  world.loader.publish(&token, "alice").await.unwrap();
  let token_address = token.artifacts().contracts["Token"].address.clone();

  let app = world.build(APP, None).await;
  let import = &app.state["import.token"].artifacts.imports["token"];
  assert_eq!(import.content_hash, token.content_hash().unwrap());
  assert_eq!(import.package, "token:1.0.0@main/13370");

  let vault = &app.state["contract.Vault"].artifacts.contracts["Vault"];
  assert_eq!(world.chain.contract(&vault.address).unwrap().args[0], token_address.as_str());

  let approve = world.chain.transactions().last().cloned().unwrap();
  assert_eq!(approve.to.as_deref(), Some(token_address.as_str()));
}

#[tokio::test]
async fn dependent_rebuild_is_a_noop() {
  let world = World::new();
  let token = world.build(TOKEN, None).await;
  world.loader.publish(&token, "alice").await.unwrap();

  let first = world.build(APP, None).await;
  let sent = world.chain.transaction_count();
  let second = world.build(APP, Some(first.clone())).await;

  assert_eq!(world.chain.transaction_count(), sent);
  assert_eq!(second.to_bytes().unwrap(), first.to_bytes().unwrap());
  assert!(diff_bundles(&first, &second).is_empty());
}

#[tokio::test]
async fn archived_bundle_restores_exactly() {
  let world = World::new();
  let token = world.build(TOKEN, None).await;
  world.loader.publish(&token, "alice").await.unwrap();
  let app = world.build(APP, None).await;

  let restored = archive::import(&archive::export(&app).unwrap()).unwrap();
  assert_eq!(restored.content_hash().unwrap(), app.content_hash().unwrap());
  assert_eq!(restored.artifacts().import_depth(), app.artifacts().import_depth());
}

#[tokio::test]
async fn released_versions_are_immutable() {
  let world = World::new();
  let token = world.build(TOKEN, None).await;
  world.loader.publish(&token, "alice").await.unwrap();

  let mut changed = token.clone();
  changed.meta.timestamp += 1;
  let err = world.loader.publish(&changed, "alice").await.unwrap_err();
  assert!(matches!(err, LoadError::Registry(RegistryError::PointerConflict { .. })));

  let latest = PackageReference::parse("token").unwrap();
  world.loader.publish_as(&token, &latest, "alice").await.unwrap();
  world.loader.publish_as(&changed, &latest, "alice").await.unwrap();
  let (_, loaded) = world.loader.load(&latest).await.unwrap();
  assert_eq!(loaded, changed);
}
