//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Token plus a variable step reading its address.
pub const TOKEN_DEFINITION: &str = r#"
name = "token"
version = "1.0.0"

[setting.owner]
default = "0x0000000000000000000000000000000000000001"

[contract.Token]
args = ["<%= settings.owner %>"]

[var.summary]
token = "<%= contracts.Token.address %>"
"#;

pub const TOKEN_REFERENCE: &str = "token:1.0.0@main/13370";

/// Isolated test environment.
///
/// Each test gets its own definition directory, artifacts, config file and
/// data directory.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// An environment holding `definition` as `deploy.toml` and a `Token`
  /// artifact under `out/`.
  pub fn with_definition(definition: &str) -> Self {
    let env = Self::empty();
    env.write_file("deploy.toml", definition);
    env.write_file(
      "out/Token.json",
      r#"{ "contractName": "Token", "abi": [], "bytecode": "0x608060405234801561001057600080fd5b50" }"#,
    );
    env
  }

  pub fn token() -> Self {
    Self::with_definition(TOKEN_DEFINITION)
  }

  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("chainbuild.toml"), "").unwrap();
    Self { temp }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn path(&self, relative_path: &str) -> PathBuf {
    self.temp.path().join(relative_path)
  }

  /// Data directory (isolated per test).
  pub fn data_path(&self) -> PathBuf {
    let p = self.temp.path().join("data");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// A `chainbuild` command running in the temp directory with isolated
  /// config and data directories.
  pub fn cmd(&self) -> Command {
    self.cmd_with_data(&self.data_path())
  }

  pub fn cmd_with_data(&self, data_dir: &Path) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("chainbuild");
    cmd.current_dir(self.temp.path());
    cmd.env("CHAINBUILD_CONFIG", self.temp.path().join("chainbuild.toml"));
    cmd.env("CHAINBUILD_DATA_DIR", data_dir);
    cmd.env("XDG_CONFIG_HOME", self.temp.path().join("config"));
    cmd.env("XDG_DATA_HOME", self.temp.path().join("xdg-data"));
    cmd.env("APPDATA", self.temp.path().join("config")); // For Windows
    cmd.env("LOCALAPPDATA", self.temp.path().join("xdg-data")); // For Windows
    cmd.env_remove("CHAINBUILD_RPC_URL");
    cmd.env_remove("RUST_LOG");
    cmd
  }

  /// `chainbuild build --simulate` with a fixed timestamp, plus `extra` args.
  pub fn build(&self, extra: &[&str]) -> Command {
    let mut cmd = self.cmd();
    cmd.args(["build", "--simulate", "--timestamp", "1700000000"]).args(extra);
    cmd
  }

  /// Parse stdout of a `-o json` run.
  pub fn json_output(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
  }
}
