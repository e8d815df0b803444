use predicates::prelude::*;

use super::common::{TOKEN_REFERENCE, TestEnv};

#[test]
fn first_build_executes_every_step() {
  let env = TestEnv::token();

  env
    .build(&[])
    .assert()
    .success()
    .stdout(predicate::str::contains(format!("Built {}", TOKEN_REFERENCE)))
    .stdout(predicate::str::contains("contract.Token"))
    .stdout(predicate::str::contains("var.summary"));
}

#[test]
fn unchanged_rebuild_reuses_everything() {
  let env = TestEnv::token();
  let first = TestEnv::json_output(&mut env.build(&["-o", "json"]));
  let second = TestEnv::json_output(&mut env.build(&["-o", "json"]));

  assert_eq!(first["contentHash"], second["contentHash"]);
  assert_eq!(second["nodes"]["contract.Token"], "skipped");
  assert_eq!(second["nodes"]["var.summary"], "skipped");

  env
    .build(&[])
    .assert()
    .success()
    .stdout(predicate::str::contains("is up to date"));
}

#[test]
fn setting_override_rebuilds_dependents() {
  let env = TestEnv::token();
  env.build(&[]).assert().success();

  let rebuilt = TestEnv::json_output(&mut env.build(&[
    "-s",
    "owner=0x0000000000000000000000000000000000000002",
    "-o",
    "json",
  ]));
  assert_eq!(rebuilt["phase"], "complete");
  assert_eq!(rebuilt["nodes"]["contract.Token"], "done");
  assert_eq!(rebuilt["nodes"]["var.summary"], "done");
}

#[test]
fn fresh_build_ignores_prior() {
  let env = TestEnv::token();
  env.build(&[]).assert().success();

  let fresh = TestEnv::json_output(&mut env.build(&["--fresh", "-o", "json"]));
  assert_eq!(fresh["nodes"]["contract.Token"], "done");
}

#[test]
fn unknown_setting_fails() {
  let env = TestEnv::token();

  env
    .build(&["-s", "nope=1"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown setting 'nope'"));
}

#[test]
fn missing_artifact_records_partial_build() {
  let env = TestEnv::with_definition(
    r#"
name = "broken"
version = "1.0.0"

[contract.Token]

[contract.Missing]
depends = ["contract.Token"]
"#,
  );

  env
    .build(&[])
    .assert()
    .failure()
    .stderr(predicate::str::contains("Build stopped"))
    .stderr(predicate::str::contains("contract.Missing"));

  env
    .cmd()
    .args(["inspect", "broken:1.0.0"])
    .assert()
    .success()
    .stderr(predicate::str::contains("partial"))
    .stdout(predicate::str::contains("Token"));
}

#[test]
fn missing_definition_fails() {
  let env = TestEnv::empty();

  env
    .build(&[])
    .assert()
    .failure()
    .stderr(predicate::str::contains("deploy.toml"));
}

#[test]
fn build_without_endpoint_asks_for_one() {
  let env = TestEnv::token();

  env
    .cmd()
    .arg("build")
    .assert()
    .failure()
    .stderr(predicate::str::contains("--simulate"));
}

#[test]
fn plan_before_and_after_build() {
  let env = TestEnv::token();

  env
    .cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("every step executes"));

  env.build(&[]).assert().success();

  env
    .cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("Nothing to do"));

  let changed = TestEnv::json_output(env.cmd().args([
    "plan",
    "-s",
    "owner=0x0000000000000000000000000000000000000003",
    "-o",
    "json",
  ]));
  let nodes = changed["nodes"].as_array().unwrap();
  assert_eq!(nodes[0]["key"], "contract.Token");
  assert_eq!(nodes[0]["action"], "execute");
}

#[test]
fn inspect_lists_contracts() {
  let env = TestEnv::token();
  env.build(&[]).assert().success();

  env
    .cmd()
    .args(["inspect", "token:1.0.0"])
    .assert()
    .success()
    .stdout(predicate::str::contains(TOKEN_REFERENCE))
    .stdout(predicate::str::contains("Contracts:"))
    .stdout(predicate::str::contains("Token 0x"));

  let json = TestEnv::json_output(env.cmd().args(["inspect", "token:1.0.0", "-o", "json"]));
  assert_eq!(json["bundle"]["meta"]["timestamp"], 1_700_000_000);
}

#[test]
fn diff_between_builds() {
  let env = TestEnv::token();
  env.build(&[]).assert().success();
  env.cmd().args(["export", "token:1.0.0", "before.cbar"]).assert().success();

  env
    .build(&["-s", "owner=0x0000000000000000000000000000000000000002"])
    .assert()
    .success();

  let diff = TestEnv::json_output(env.cmd().args(["diff", "before.cbar", "token:1.0.0", "-o", "json"]));
  let changed: Vec<&str> = diff["diff"]["changed"]
    .as_array()
    .unwrap()
    .iter()
    .map(|v| v.as_str().unwrap())
    .collect();
  assert_eq!(changed, vec!["contract.Token", "var.summary"]);

  env
    .cmd()
    .args(["diff", "before.cbar", "before.cbar"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No changes."));
}
