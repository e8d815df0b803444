//! Crate-wide constants.

/// Application name used for directory layout and environment variable prefixes.
pub const APP_NAME: &str = "chainbuild";

/// Generator string recorded in every bundle's metadata.
pub const GENERATOR: &str = concat!("chainbuild/", env!("CARGO_PKG_VERSION"));

/// Chain id used when a reference carries no `/chainId` suffix and the caller
/// supplies no contextual default.
pub const DEFAULT_CHAIN_ID: u64 = 13370;

/// Preset used when a reference omits `@preset`.
pub const DEFAULT_PRESET: &str = "main";

/// Version used when a reference omits `:version`. This is the only mutable tag
/// in a registry.
pub const DEFAULT_VERSION: &str = "latest";

/// Maximum depth of nested imported sub-bundles inside one bundle.
pub const MAX_IMPORT_DEPTH: usize = 8;

/// Number of hex characters shown when a hash is abbreviated for display.
pub const HASH_PREFIX_LEN: usize = 12;

/// Config file name looked up in the config directory.
pub const CONFIG_FILE_NAME: &str = "chainbuild.toml";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "CHAINBUILD_CONFIG";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CHAINBUILD_DATA_DIR";

/// Environment variable overriding the provider RPC endpoint.
pub const RPC_URL_ENV: &str = "CHAINBUILD_RPC_URL";

/// Environment variable through which `run` steps receive the build context.
pub const RUN_CONTEXT_ENV: &str = "CHAINBUILD_CONTEXT";
