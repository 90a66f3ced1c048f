//! Kind-specific build and test actions.
//!
//! Each package kind has a fixed action: Docker runs `docker build` (and
//! `docker save` for untagged images), Go runs `go build`/`go test`, Yarn
//! runs the usual install/build/test trio, and Generic runs its configured
//! command lists. Commands execute in the package's build directory with the
//! inherited environment plus the `DEP_*` dependency variables.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tokio::process::Command;
use tracing::{debug, info};

use crate::cache::sanitize_name;
use crate::plan::PlanNode;
use crate::workspace::{DockerConfig, GoPackaging, PackageConfig, YarnPackaging};

use super::{BuildConfig, BuildError, jail};

/// Whether a command belongs to the build or the test step; decides which
/// error variant a failure maps to.
#[derive(Clone, Copy)]
enum ActionPhase {
  Build,
  Test,
}

pub(crate) async fn run_build(
  node: &PlanNode,
  build_dir: &Path,
  dep_env: &BTreeMap<String, String>,
  config: &BuildConfig,
) -> Result<(), BuildError> {
  match &node.package.config {
    PackageConfig::Docker(c) => docker_build(node, c, build_dir, dep_env, config).await,
    PackageConfig::Generic(c) => {
      for command in &c.commands {
        run_command(node, command, build_dir, dep_env, config, ActionPhase::Build).await?;
      }
      Ok(())
    }
    PackageConfig::Go(c) => {
      let mut argv: Vec<String> = vec!["go".into(), "build".into()];
      argv.extend(c.build_flags.iter().cloned());
      match c.packaging {
        GoPackaging::App => {
          fs::create_dir_all(build_dir.join("bin"))?;
          argv.push("-o".into());
          argv.push(format!("bin/{}", node.package.name));
        }
        GoPackaging::Library => argv.push("./...".into()),
      }
      run_command(node, &argv, build_dir, dep_env, config, ActionPhase::Build).await
    }
    PackageConfig::Yarn(c) => {
      let install: Vec<String> = vec!["yarn".into(), "install".into(), "--frozen-lockfile".into()];
      run_command(node, &install, build_dir, dep_env, config, ActionPhase::Build).await?;
      if c.packaging == YarnPackaging::App {
        let build: Vec<String> = vec!["yarn".into(), "build".into()];
        run_command(node, &build, build_dir, dep_env, config, ActionPhase::Build).await?;
      }
      Ok(())
    }
  }
}

pub(crate) async fn run_tests(
  node: &PlanNode,
  build_dir: &Path,
  dep_env: &BTreeMap<String, String>,
  config: &BuildConfig,
) -> Result<(), BuildError> {
  match &node.package.config {
    // Docker images carry no test step.
    PackageConfig::Docker(_) => Ok(()),
    PackageConfig::Generic(c) => {
      for command in &c.test {
        run_command(node, command, build_dir, dep_env, config, ActionPhase::Test).await?;
      }
      Ok(())
    }
    PackageConfig::Go(c) => {
      if c.dont_test {
        return Ok(());
      }
      let mut argv: Vec<String> = vec!["go".into(), "test".into()];
      if let Some(coverage_dir) = &config.coverage_output_path {
        fs::create_dir_all(coverage_dir)?;
        let profile = coverage_dir.join(format!("{}.out", sanitize_name(&node.full_name())));
        argv.push(format!("-coverprofile={}", profile.display()));
      }
      argv.push("./...".into());
      run_command(node, &argv, build_dir, dep_env, config, ActionPhase::Test).await
    }
    PackageConfig::Yarn(c) => {
      if c.dont_test {
        return Ok(());
      }
      let argv: Vec<String> = vec!["yarn".into(), "test".into()];
      run_command(node, &argv, build_dir, dep_env, config, ActionPhase::Test).await
    }
  }
}

async fn docker_build(
  node: &PlanNode,
  docker: &DockerConfig,
  build_dir: &Path,
  dep_env: &BTreeMap<String, String>,
  config: &BuildConfig,
) -> Result<(), BuildError> {
  let mut argv: Vec<String> = vec!["docker".into(), "build".into(), "-f".into(), docker.dockerfile.clone()];

  // Dependencies double as build arguments so Dockerfiles can reference
  // them, e.g. `FROM ${DEP_COMP__PKG0}`.
  for (key, value) in dep_env {
    argv.push("--build-arg".into());
    argv.push(format!("{}={}", key, value));
  }
  for (key, value) in &docker.build_args {
    argv.push("--build-arg".into());
    argv.push(format!("{}={}", key, value));
  }
  for (key, value) in &config.docker_build_options {
    argv.push(format!("--{}={}", key, value));
  }

  let tags = if docker.image.is_empty() {
    vec![format!("mason-build:{}", node.version)]
  } else {
    docker.image.clone()
  };
  for tag in &tags {
    argv.push("-t".into());
    argv.push(tag.clone());
  }
  argv.push(".".into());

  run_command(node, &argv, build_dir, dep_env, config, ActionPhase::Build).await?;

  if docker.image.is_empty() {
    // No published tag: the image itself is the build result.
    let save: Vec<String> = vec![
      "docker".into(),
      "save".into(),
      "-o".into(),
      "image.tar".into(),
      tags[0].clone(),
    ];
    run_command(node, &save, build_dir, dep_env, config, ActionPhase::Build).await?;
  } else {
    fs::write(build_dir.join("imgnames.txt"), format!("{}\n", tags.join("\n")))?;
  }

  Ok(())
}

async fn run_command(
  node: &PlanNode,
  argv: &[String],
  build_dir: &Path,
  env: &BTreeMap<String, String>,
  config: &BuildConfig,
  phase: ActionPhase,
) -> Result<(), BuildError> {
  let package = node.full_name();

  let argv = if config.jailed_execution {
    jail::wrap(argv, build_dir)
  } else {
    argv.to_vec()
  };

  let Some((program, args)) = argv.split_first() else {
    return Err(action_error(phase, &package, "empty command".to_string()));
  };

  info!(package = %package, command = %argv.join(" "), "running command");

  let output = Command::new(program)
    .args(args)
    .current_dir(build_dir)
    .envs(env)
    .output()
    .await
    .map_err(|e| action_error(phase, &package, format!("failed to run {}: {}", program, e)))?;

  if !output.status.success() {
    let message = format!(
      "`{}` exited with {}\n{}{}",
      argv.join(" "),
      output
        .status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_string()),
      String::from_utf8_lossy(&output.stdout),
      String::from_utf8_lossy(&output.stderr),
    );
    return Err(action_error(phase, &package, message));
  }

  if !output.stdout.is_empty() {
    debug!(package = %package, stdout = %String::from_utf8_lossy(&output.stdout).trim_end(), "command output");
  }

  Ok(())
}

fn action_error(phase: ActionPhase, package: &str, message: String) -> BuildError {
  match phase {
    ActionPhase::Build => BuildError::Action {
      package: package.to_string(),
      message,
    },
    ActionPhase::Test => BuildError::Test {
      package: package.to_string(),
      message,
    },
  }
}
