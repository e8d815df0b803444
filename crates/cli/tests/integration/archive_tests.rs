use predicates::prelude::*;

use super::common::{TOKEN_REFERENCE, TestEnv};

#[test]
fn export_then_import_into_another_data_dir() {
  let env = TestEnv::token();
  env.build(&[]).assert().success();

  env
    .cmd()
    .args(["export", "token:1.0.0", "token.cbar"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Exported to token.cbar"));
  assert!(env.path("token.cbar").is_file());

  let other = env.path("other-data");
  env
    .cmd_with_data(&other)
    .args(["import", "token.cbar", "--record"])
    .assert()
    .success()
    .stdout(predicate::str::contains(format!("Imported {}", TOKEN_REFERENCE)));

  env
    .cmd_with_data(&other)
    .args(["inspect", "token:1.0.0"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Token 0x"));
}

#[test]
fn imported_build_is_reused_by_the_next_build() {
  let env = TestEnv::token();
  env.build(&[]).assert().success();
  env.cmd().args(["export", "token:1.0.0", "token.cbar"]).assert().success();

  let other = env.path("other-data");
  env
    .cmd_with_data(&other)
    .args(["import", "token.cbar", "--record"])
    .assert()
    .success();

  env
    .cmd_with_data(&other)
    .args(["build", "--simulate", "--timestamp", "1700000000"])
    .assert()
    .success()
    .stdout(predicate::str::contains("is up to date"));
}

#[test]
fn import_rejects_garbage() {
  let env = TestEnv::empty();
  env.write_file("bad.cbar", "not an archive");

  env
    .cmd()
    .args(["import", "bad.cbar"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("corrupt archive"));
}

#[test]
fn inspect_reads_archive_files() {
  let env = TestEnv::token();
  env.build(&[]).assert().success();
  env.cmd().args(["export", "token:1.0.0", "token.cbar"]).assert().success();

  env
    .cmd()
    .args(["inspect", "token.cbar"])
    .assert()
    .success()
    .stdout(predicate::str::contains(TOKEN_REFERENCE));
}
