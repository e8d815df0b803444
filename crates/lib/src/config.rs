//! Builder configuration.
//!
//! Loaded from the first of:
//!
//! 1. an explicit path (`--config`)
//! 2. `$CHAINBUILD_CONFIG`
//! 3. `<config_dir>/chainbuild.toml`, when it exists
//!
//! and defaults otherwise. `CHAINBUILD_DATA_DIR` and `CHAINBUILD_RPC_URL`
//! override the corresponding file settings.
//!
//! ```toml
//! data_dir = "/var/lib/chainbuild"
//!
//! [build]
//! parallelism = 8
//!
//! [retry]
//! attempts = 5
//! base_delay_ms = 100
//!
//! [[storage]]
//! kind = "local"
//! role = "primary"
//!
//! [[storage]]
//! kind = "http"
//! url = "https://pin.example.com/objects"
//! role = "mirror"
//!
//! [registry]
//! kind = "onchain"
//! address = "0x..."
//!
//! [provider]
//! rpc_url = "http://127.0.0.1:8545"
//! chain_id = 13370
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::build::BuildOptions;
use crate::consts::{CONFIG_ENV, DATA_DIR_ENV, DEFAULT_CHAIN_ID, RPC_URL_ENV};
use crate::platform::paths;
use crate::provider::{Provider, is_address};
use crate::registry::{LocalRegistry, OnChainRegistry, PackageLoader, RegistryResolver};
use crate::storage::{HttpStore, LocalStore, Storage, StorageBackend, StorageError};
use crate::util::retry::RetryPolicy;

const STORE_DIR: &str = "store";
const REGISTRY_FILE: &str = "registry.json";
const BUILD_INDEX_FILE: &str = "builds.json";

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("config file not found: {0}")]
  NotFound(PathBuf),

  #[error("failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("invalid config: {0}")]
  Invalid(String),

  #[error(transparent)]
  Storage(#[from] StorageError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
  #[default]
  Local,
  Http,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageRole {
  #[default]
  Primary,
  Mirror,
  Read,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
  #[serde(default)]
  pub kind: StorageKind,
  /// Directory of a local store; defaults to `<data_dir>/store`.
  #[serde(default)]
  pub path: Option<PathBuf>,
  /// Base URL of an HTTP store.
  #[serde(default)]
  pub url: Option<String>,
  #[serde(default)]
  pub role: StorageRole,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
  #[default]
  Local,
  Onchain,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
  pub kind: RegistryKind,
  /// Registry contract address, for `onchain`.
  pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
  pub parallelism: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
  pub rpc_url: Option<String>,
  pub chain_id: Option<u64>,
  pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuilderConfig {
  pub data_dir: Option<PathBuf>,
  pub build: BuildConfig,
  pub retry: RetryPolicy,
  pub storage: Vec<StorageConfig>,
  pub registry: RegistryConfig,
  pub provider: ProviderConfig,
}

impl BuilderConfig {
  /// Load from `explicit`, `$CHAINBUILD_CONFIG` or the default location, then
  /// apply environment overrides.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    let from_env = env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()).map(PathBuf::from);

    let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
      Some(path) => Self::from_file(&path)?,
      None => {
        let default_path = paths::config_file();
        if default_path.is_file() {
          Self::from_file(&default_path)?
        } else {
          debug!(path = %default_path.display(), "no config file, using defaults");
          Self::default()
        }
      }
    };

    config.apply_env();
    Ok(config)
  }

  pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| {
      if source.kind() == std::io::ErrorKind::NotFound {
        ConfigError::NotFound(path.to_path_buf())
      } else {
        ConfigError::Read {
          path: path.to_path_buf(),
          source,
        }
      }
    })?;
    let config = Self::from_toml_str(&content).map_err(|message| ConfigError::Parse {
      path: path.to_path_buf(),
      message,
    })?;
    debug!(path = %path.display(), "config loaded");
    Ok(config)
  }

  pub fn from_toml_str(input: &str) -> Result<Self, String> {
    toml::from_str(input).map_err(|e| e.to_string())
  }

  fn apply_env(&mut self) {
    if let Some(dir) = env::var_os(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
      self.data_dir = Some(PathBuf::from(dir));
    }
    if let Ok(url) = env::var(RPC_URL_ENV)
      && !url.is_empty()
    {
      self.provider.rpc_url = Some(url);
    }
  }

  pub fn data_dir(&self) -> PathBuf {
    self.data_dir.clone().unwrap_or_else(paths::data_dir)
  }

  pub fn store_dir(&self) -> PathBuf {
    self.data_dir().join(STORE_DIR)
  }

  pub fn registry_path(&self) -> PathBuf {
    self.data_dir().join(REGISTRY_FILE)
  }

  pub fn build_index_path(&self) -> PathBuf {
    self.data_dir().join(BUILD_INDEX_FILE)
  }

  pub fn chain_id(&self) -> u64 {
    self.provider.chain_id.unwrap_or(DEFAULT_CHAIN_ID)
  }

  pub fn provider_timeout(&self) -> Duration {
    Duration::from_secs(self.provider.timeout_secs.unwrap_or(30))
  }

  pub fn build_options(&self) -> BuildOptions {
    let mut options = BuildOptions::default();
    if let Some(parallelism) = self.build.parallelism {
      options.parallelism = parallelism.max(1);
    }
    options
  }

  /// Directories of every local store, configured or implied.
  pub fn local_store_dirs(&self) -> Vec<PathBuf> {
    if self.storage.is_empty() {
      return vec![self.store_dir()];
    }
    self
      .storage
      .iter()
      .filter(|s| s.kind == StorageKind::Local)
      .map(|s| s.path.clone().unwrap_or_else(|| self.store_dir()))
      .collect()
  }

  fn backend(&self, storage: &StorageConfig) -> Result<Arc<dyn StorageBackend>, ConfigError> {
    match storage.kind {
      StorageKind::Local => Ok(Arc::new(LocalStore::new(
        storage.path.clone().unwrap_or_else(|| self.store_dir()),
      ))),
      StorageKind::Http => {
        let url = storage
          .url
          .as_deref()
          .ok_or_else(|| ConfigError::Invalid("http storage needs a url".into()))?;
        Ok(Arc::new(HttpStore::new(url, Duration::from_secs(storage.timeout_secs))?))
      }
    }
  }

  /// Composite storage described by the `[[storage]]` entries; a local
  /// store under the data directory when there are none.
  pub fn storage(&self) -> Result<Storage, ConfigError> {
    if self.storage.is_empty() {
      return Ok(Storage::new(Arc::new(LocalStore::new(self.store_dir()))).with_retry(self.retry));
    }

    let primaries: Vec<_> = self.storage.iter().filter(|s| s.role == StorageRole::Primary).collect();
    let [primary] = primaries.as_slice() else {
      return Err(ConfigError::Invalid(format!(
        "exactly one primary storage is required, found {}",
        primaries.len()
      )));
    };

    let mut storage = Storage::new(self.backend(primary)?).with_retry(self.retry);
    for entry in &self.storage {
      match entry.role {
        StorageRole::Primary => {}
        StorageRole::Mirror => {
          let backend = self.backend(entry)?;
          storage = storage.with_mirror(backend.clone()).with_reader(backend);
        }
        StorageRole::Read => storage = storage.with_reader(self.backend(entry)?),
      }
    }
    Ok(storage)
  }

  /// Registries in lookup order. The local registry file is the cache of an
  /// on-chain registry, or the only registry otherwise.
  pub fn registry_resolver(&self, provider: Option<Arc<dyn Provider>>) -> Result<RegistryResolver, ConfigError> {
    let local = Arc::new(LocalRegistry::new(self.registry_path()));
    let resolver = RegistryResolver::new().with_retry(self.retry);

    match self.registry.kind {
      RegistryKind::Local => Ok(resolver.with_registry(local)),
      RegistryKind::Onchain => {
        let address = self
          .registry
          .address
          .as_deref()
          .ok_or_else(|| ConfigError::Invalid("onchain registry needs an address".into()))?;
        if !is_address(address) {
          return Err(ConfigError::Invalid(format!("invalid registry address: {}", address)));
        }
        let provider =
          provider.ok_or_else(|| ConfigError::Invalid("onchain registry needs a provider (rpc_url)".into()))?;
        Ok(
          resolver
            .with_registry(Arc::new(OnChainRegistry::new(provider, address)))
            .with_cache(local),
        )
      }
    }
  }

  pub fn package_loader(&self, provider: Option<Arc<dyn Provider>>) -> Result<PackageLoader, ConfigError> {
    Ok(PackageLoader::new(self.registry_resolver(provider)?, self.storage()?))
  }
}
