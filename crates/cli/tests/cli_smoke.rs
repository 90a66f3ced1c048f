//! Smoke tests driving the `mason` binary.
#![cfg(unix)]

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn write(path: &Path, contents: &str) {
  fs::create_dir_all(path.parent().unwrap()).unwrap();
  fs::write(path, contents).unwrap();
}

fn fixture_workspace() -> TempDir {
  let temp = TempDir::new().unwrap();
  write(&temp.path().join("workspace.yaml"), "");
  write(
    &temp.path().join("comp/build.yaml"),
    r#"
packages:
  - name: lib
    type: generic
    sources: ["lib.txt"]
    commands: [["sh", "-c", "cat lib.txt > out.txt"]]
  - name: hello
    type: generic
    deps: [":lib"]
    commands: [["sh", "-c", "echo hello > hello.txt"]]
"#,
  );
  write(&temp.path().join("comp/lib.txt"), "lib");
  temp
}

fn mason(workspace: &Path) -> Command {
  let mut cmd = Command::cargo_bin("mason").unwrap();
  cmd.arg("--workspace").arg(workspace);
  cmd
}

#[test]
fn help_lists_subcommands() {
  Command::cargo_bin("mason")
    .unwrap()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("build").and(predicate::str::contains("describe")));
}

#[test]
fn build_succeeds_and_caches() {
  let ws = fixture_workspace();
  let cache = TempDir::new().unwrap();

  mason(ws.path())
    .env("MASON_CACHE_DIR", cache.path())
    .args(["build", "-c", "local", "comp/hello"])
    .assert()
    .success()
    .stdout(predicate::str::contains("built in"));

  // A second run with unchanged inputs reuses the cache everywhere.
  mason(ws.path())
    .env("MASON_CACHE_DIR", cache.path())
    .args(["build", "-c", "local", "comp/hello"])
    .assert()
    .success()
    .stdout(predicate::str::contains("already built (local cache)"));
}

#[test]
fn dry_run_prints_plan_without_building() {
  let ws = fixture_workspace();
  let cache = TempDir::new().unwrap();

  mason(ws.path())
    .env("MASON_CACHE_DIR", cache.path())
    .args(["build", "-c", "local", "--dry-run", "comp/hello"])
    .assert()
    .success()
    .stdout(predicate::str::contains("must-build"));

  assert_eq!(
    fs::read_dir(cache.path()).unwrap().count(),
    0,
    "dry run must not write artifacts"
  );
}

#[test]
fn dump_plan_writes_json() {
  let ws = fixture_workspace();
  let cache = TempDir::new().unwrap();
  let plan_path = ws.path().join("plan.json");

  mason(ws.path())
    .env("MASON_CACHE_DIR", cache.path())
    .args(["build", "-c", "local", "--dry-run"])
    .arg("--dump-plan")
    .arg(&plan_path)
    .arg("comp/hello")
    .assert()
    .success();

  let plan = fs::read_to_string(&plan_path).unwrap();
  assert!(plan.contains("\"target\": \"comp/hello\""));
  assert!(plan.contains("\"status\": \"must-build\""));
}

#[test]
fn failing_package_exits_non_zero() {
  let ws = TempDir::new().unwrap();
  write(&ws.path().join("workspace.yaml"), "");
  write(
    &ws.path().join("comp/build.yaml"),
    r#"
packages:
  - name: broken
    type: generic
    commands: [["sh", "-c", "exit 3"]]
"#,
  );
  let cache = TempDir::new().unwrap();

  mason(ws.path())
    .env("MASON_CACHE_DIR", cache.path())
    .args(["build", "-c", "local", "comp/broken"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("failed"));
}

#[test]
fn unknown_target_is_reported() {
  let ws = fixture_workspace();
  let cache = TempDir::new().unwrap();

  mason(ws.path())
    .env("MASON_CACHE_DIR", cache.path())
    .args(["build", "-c", "local", "comp/ghost"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("comp/ghost"));
}

#[test]
fn describe_dependencies_prints_tree() {
  let ws = fixture_workspace();

  mason(ws.path())
    .args(["describe", "dependencies", "comp/hello"])
    .assert()
    .success()
    .stdout(predicate::str::contains("comp/hello").and(predicate::str::contains("comp/lib")));
}

#[test]
fn describe_dependencies_dot_output() {
  let ws = fixture_workspace();

  mason(ws.path())
    .args(["describe", "dependencies", "--dot"])
    .assert()
    .success()
    .stdout(predicate::str::contains("digraph G {").and(predicate::str::contains("->")));
}
