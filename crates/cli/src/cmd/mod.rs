//! Subcommand implementations and the plumbing they share: provider
//! selection, definition loading and bundle lookup.

mod build;
mod diff;
mod export;
mod fetch;
mod gc;
mod import;
mod inspect;
mod plan;
mod publish;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use tracing::{debug, warn};

use chainbuild_lib::action::{ActionRegistry, DirArtifacts, ExecutionEnv};
use chainbuild_lib::archive;
use chainbuild_lib::build::BuildRequest;
use chainbuild_lib::build::index::BuildIndex;
use chainbuild_lib::bundle::DeploymentBundle;
use chainbuild_lib::config::BuilderConfig;
use chainbuild_lib::definition::ChainDefinition;
use chainbuild_lib::provider::{MemoryChain, Provider, RpcProvider};
use chainbuild_lib::reference::PackageReference;
use chainbuild_lib::registry::PackageLoader;
use chainbuild_lib::storage::StorageError;

pub use build::{BuildArgs, cmd_build};
pub use diff::cmd_diff;
pub use export::cmd_export;
pub use fetch::cmd_fetch;
pub use gc::cmd_gc;
pub use import::cmd_import;
pub use inspect::cmd_inspect;
pub use plan::cmd_plan;
pub use publish::{PublishArgs, cmd_publish};

/// Definition file looked up in the current directory.
pub const DEFAULT_DEFINITION: &str = "deploy.toml";

/// Artifact directory, relative to the definition, when `--artifacts` is not given.
const DEFAULT_ARTIFACTS_DIR: &str = "out";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Arguments shared by `build` and `plan`.
#[derive(Args, Debug)]
pub struct DefinitionArgs {
  /// Chain definition file
  #[arg(default_value = DEFAULT_DEFINITION)]
  pub file: PathBuf,

  /// Target chain id (default: provider.chain_id from the config, else the endpoint's)
  #[arg(long)]
  pub chain_id: Option<u64>,

  /// Override a declared setting
  #[arg(short = 's', long = "setting", value_name = "NAME=VALUE", value_parser = parse_setting)]
  pub settings: Vec<(String, String)>,

  /// Directory of compiled contract artifacts (default: `out` next to the definition)
  #[arg(long)]
  pub artifacts: Option<PathBuf>,

  /// Account transactions are sent from
  #[arg(long)]
  pub from: Option<String>,
}

fn parse_setting(raw: &str) -> Result<(String, String), String> {
  let (name, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected NAME=VALUE, got {:?}", raw))?;
  if name.is_empty() {
    return Err(format!("setting name missing in {:?}", raw));
  }
  Ok((name.to_string(), value.to_string()))
}

/// How steps reach a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainMode {
  /// The configured JSON-RPC endpoint.
  Rpc,
  /// A fresh in-memory chain; nothing leaves the process.
  Simulated,
}

/// Everything needed to build or plan one definition.
pub struct Session {
  pub definition: ChainDefinition,
  pub registry: ActionRegistry,
  pub env: ExecutionEnv,
  pub loader: Arc<PackageLoader>,
  pub reference: PackageReference,
  pub chain_id: u64,
  settings: BTreeMap<String, String>,
}

impl Session {
  pub async fn open(config: &BuilderConfig, args: &DefinitionArgs, mode: ChainMode) -> Result<Self> {
    let registry = ActionRegistry::builtin();
    let definition = ChainDefinition::load(&args.file, &registry)
      .with_context(|| format!("Failed to load definition: {}", args.file.display()))?;

    let (provider, chain_id): (Arc<dyn Provider>, u64) = match mode {
      ChainMode::Simulated => {
        let chain_id = args.chain_id.unwrap_or_else(|| config.chain_id());
        (Arc::new(MemoryChain::new(chain_id)), chain_id)
      }
      ChainMode::Rpc => connect(config, args.chain_id.or(config.provider.chain_id)).await?,
    };

    let registry_provider = match mode {
      ChainMode::Rpc => Some(provider.clone()),
      ChainMode::Simulated => rpc_provider(config)?,
    };
    let loader = Arc::new(
      config
        .package_loader(registry_provider)
        .context("Failed to set up registry and storage")?,
    );

    let workdir = match args.file.parent() {
      Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
      _ => PathBuf::from("."),
    };
    let artifacts = args
      .artifacts
      .clone()
      .unwrap_or_else(|| workdir.join(DEFAULT_ARTIFACTS_DIR));
    debug!(artifacts = %artifacts.display(), workdir = %workdir.display(), "execution environment");

    let env = ExecutionEnv::new(provider, Arc::new(DirArtifacts::new(artifacts)))
      .with_packages(loader.clone())
      .with_signer(args.from.clone())
      .with_workdir(workdir);

    let package = definition.package();
    let reference = PackageReference::new(&package.name, &package.version, &package.preset, chain_id)
      .context("Definition does not name a valid package")?;

    Ok(Self {
      definition,
      registry,
      env,
      loader,
      reference,
      chain_id,
      settings: args.settings.iter().cloned().collect(),
    })
  }

  /// The last recorded build of this package, if its bundle is still stored.
  pub async fn prior_bundle(&self, index: &BuildIndex) -> Result<Option<DeploymentBundle>> {
    let Some(record) = index.get(&self.reference).context("Failed to read build index")? else {
      return Ok(None);
    };
    match self.loader.storage().get_bundle(&record.content_hash).await {
      Ok(bundle) => Ok(Some(bundle)),
      Err(StorageError::NotFound(hash)) => {
        warn!(package = %self.reference, hash = %hash.short(), "prior build is no longer stored, building from scratch");
        Ok(None)
      }
      Err(err) => Err(err).context("Failed to read prior build"),
    }
  }

  pub fn request(&self, prior: Option<DeploymentBundle>) -> BuildRequest {
    self
      .settings
      .iter()
      .fold(BuildRequest::new(self.chain_id), |request, (name, value)| {
        request.with_setting(name, value)
      })
      .with_prior(prior)
  }
}

/// The configured RPC provider, when an endpoint is configured.
pub fn rpc_provider(config: &BuilderConfig) -> Result<Option<Arc<dyn Provider>>> {
  let Some(url) = config.provider.rpc_url.as_deref() else {
    return Ok(None);
  };
  let provider = RpcProvider::new(url, config.provider_timeout()).context("Failed to create RPC provider")?;
  Ok(Some(Arc::new(provider)))
}

/// Connect to the configured endpoint and check it serves `expected`, or
/// adopt its chain id when none is expected.
async fn connect(config: &BuilderConfig, expected: Option<u64>) -> Result<(Arc<dyn Provider>, u64)> {
  let Some(provider) = rpc_provider(config)? else {
    bail!("No RPC endpoint configured. Set provider.rpc_url or CHAINBUILD_RPC_URL, or pass --simulate");
  };
  let remote = provider
    .chain_id()
    .await
    .context("Failed to query chain id from the RPC endpoint")?;
  if let Some(expected) = expected
    && expected != remote
  {
    bail!("RPC endpoint serves chain {}, expected {}", remote, expected);
  }
  Ok((provider, remote))
}

/// Read a bundle file: either canonical bundle JSON or an archive.
pub fn read_bundle_file(path: &Path) -> Result<DeploymentBundle> {
  let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
  if bytes.starts_with(&GZIP_MAGIC) {
    archive::import(&bytes).with_context(|| format!("Failed to read archive {}", path.display()))
  } else {
    DeploymentBundle::from_bytes(&bytes).with_context(|| format!("Failed to parse bundle {}", path.display()))
  }
}

/// Find a bundle by file path or package reference.
///
/// References are looked up in the local build index first, then through
/// the configured registries.
pub async fn load_bundle(config: &BuilderConfig, target: &str, chain_id: Option<u64>) -> Result<DeploymentBundle> {
  let path = Path::new(target);
  if path.is_file() {
    return read_bundle_file(path);
  }

  let reference = PackageReference::parse_with_chain_id(target, chain_id.unwrap_or_else(|| config.chain_id()))
    .with_context(|| format!("{:?} is neither a file nor a package reference", target))?;
  let loader = config
    .package_loader(rpc_provider(config)?)
    .context("Failed to set up registry and storage")?;

  let index = BuildIndex::new(config.build_index_path());
  if let Some(record) = index.get(&reference).context("Failed to read build index")? {
    match loader.storage().get_bundle(&record.content_hash).await {
      Ok(bundle) => return Ok(bundle),
      Err(err) => debug!(package = %reference, error = %err, "indexed build unavailable, trying registry"),
    }
  }

  let (_, bundle) = loader
    .load(&reference)
    .await
    .with_context(|| format!("Failed to load {}", reference))?;
  Ok(bundle)
}
