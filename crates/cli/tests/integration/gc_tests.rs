use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn gc_with_empty_data_dir_succeeds() {
  let env = TestEnv::empty();

  env
    .cmd()
    .arg("gc")
    .assert()
    .success()
    .stdout(predicate::str::contains("Garbage collection complete"));
}

#[test]
fn gc_dry_run_changes_nothing() {
  let env = TestEnv::token();
  env.build(&[]).assert().success();
  env
    .build(&["-s", "owner=0x0000000000000000000000000000000000000002"])
    .assert()
    .success();

  let preview = TestEnv::json_output(env.cmd().args(["gc", "--dry-run", "-o", "json"]));
  assert_eq!(preview["stats"]["objects_deleted"], 1);

  let again = TestEnv::json_output(env.cmd().args(["gc", "--dry-run", "-o", "json"]));
  assert_eq!(again["deleted"], preview["deleted"]);
}

#[test]
fn gc_removes_superseded_builds_only() {
  let env = TestEnv::token();
  env.build(&[]).assert().success();
  env
    .build(&["-s", "owner=0x0000000000000000000000000000000000000002"])
    .assert()
    .success();

  let result = TestEnv::json_output(env.cmd().args(["gc", "-o", "json"]));
  assert_eq!(result["stats"]["roots"], 1);
  assert_eq!(result["stats"]["objects_deleted"], 1);

  env
    .cmd()
    .args(["inspect", "token:1.0.0"])
    .assert()
    .success();

  let empty = TestEnv::json_output(env.cmd().args(["gc", "-o", "json"]));
  assert_eq!(empty["stats"]["objects_deleted"], 0);
}
