//! Per-user directories: XDG on unix, known folders on windows.

use std::env;
use std::path::PathBuf;

use crate::consts::{APP_NAME, CONFIG_FILE_NAME, DATA_DIR_ENV};

fn env_path(var: &str) -> Option<PathBuf> {
  env::var_os(var).filter(|v| !v.is_empty()).map(PathBuf::from)
}

/// Returns the user's home directory, or the working directory when unknown
#[cfg(windows)]
pub fn home_dir() -> PathBuf {
  env_path("USERPROFILE").unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the user's home directory, or the working directory when unknown
#[cfg(not(windows))]
pub fn home_dir() -> PathBuf {
  env_path("HOME").unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the directory for configuration files for the application
#[cfg(windows)]
pub fn config_dir() -> PathBuf {
  env_path("APPDATA")
    .unwrap_or_else(|| home_dir().join("AppData").join("Roaming"))
    .join(APP_NAME)
}

/// Returns the directory for configuration files for the application
#[cfg(not(windows))]
pub fn config_dir() -> PathBuf {
  env_path("XDG_CONFIG_HOME")
    .unwrap_or_else(|| home_dir().join(".config"))
    .join(APP_NAME)
}

/// Default location of the config file.
pub fn config_file() -> PathBuf {
  config_dir().join(CONFIG_FILE_NAME)
}

/// Returns the directory for data files for the application.
///
/// `CHAINBUILD_DATA_DIR` overrides the platform default.
pub fn data_dir() -> PathBuf {
  env_path(DATA_DIR_ENV).unwrap_or_else(default_data_dir)
}

#[cfg(windows)]
fn default_data_dir() -> PathBuf {
  env_path("LOCALAPPDATA")
    .unwrap_or_else(|| home_dir().join("AppData").join("Local"))
    .join(APP_NAME)
}

#[cfg(not(windows))]
fn default_data_dir() -> PathBuf {
  env_path("XDG_DATA_HOME")
    .unwrap_or_else(|| home_dir().join(".local").join("share"))
    .join(APP_NAME)
}
