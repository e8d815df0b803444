use predicates::prelude::*;

use super::common::{TOKEN_REFERENCE, TestEnv};

#[test]
fn publish_then_fetch() {
  let env = TestEnv::token();
  env.build(&[]).assert().success();

  env
    .cmd()
    .args(["publish", "token:1.0.0"])
    .assert()
    .success()
    .stdout(predicate::str::contains(format!("Published {}", TOKEN_REFERENCE)));

  env
    .cmd()
    .args(["publish", "token:1.0.0"])
    .assert()
    .success()
    .stdout(predicate::str::contains("already points at this bundle"));

  env
    .cmd()
    .args(["fetch", "token:1.0.0", "--out", "fetched.json"])
    .assert()
    .success()
    .stdout(predicate::str::contains(format!("Fetched {}", TOKEN_REFERENCE)));

  let fetched: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(env.path("fetched.json")).unwrap()).unwrap();
  assert_eq!(fetched["meta"]["package"]["name"], "token");
}

#[test]
fn publish_as_latest_alias() {
  let env = TestEnv::token();
  env.build(&[]).assert().success();

  env
    .cmd()
    .args(["publish", "token:1.0.0", "--as", "token"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Published token:latest@main/13370"));

  env
    .cmd()
    .args(["fetch", "token"])
    .assert()
    .success();
}

#[test]
fn fetch_unknown_package_fails() {
  let env = TestEnv::empty();

  env
    .cmd()
    .args(["fetch", "nothing:1.0.0"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("not found"));
}

#[test]
fn import_step_resolves_published_package() {
  let env = TestEnv::token();
  env.build(&[]).assert().success();
  env.cmd().args(["publish", "token:1.0.0"]).assert().success();

  env.write_file(
    "app/deploy.toml",
    r#"
name = "app"
version = "1.0.0"

[import.token]
source = "token:1.0.0"

[var.wiring]
token = "<%= imports.token.contracts.Token.address %>"
"#,
  );

  env
    .cmd()
    .args(["build", "app/deploy.toml", "--simulate", "-o", "json"])
    .assert()
    .success()
    .stdout(predicate::str::contains("\"import.token\": \"done\""));
}
