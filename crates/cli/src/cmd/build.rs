//! Implementation of `mason build`.
//!
//! Wires flags and environment defaults into the engine's `BuildConfig`,
//! runs one plan/execute cycle (dumping or printing the plan when asked),
//! and in watch mode keeps rebuilding on debounced source changes while
//! managing the serve/save side effects of the last successful build.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::Args;
use owo_colors::OwoColorize;
use tracing::{error, info};

use mason_lib::build::{BuildConfig, BuildSummary, execute_plan};
use mason_lib::cache::{
  ArtifactId, CacheLevel, FilesystemCache, HttpRemoteCache, NoRemoteCache, RemoteCache, configure_remote,
};
use mason_lib::consts::{DEFAULT_DEBOUNCE, ENV_CACHE_DIR, ENV_REMOTE_CACHE_URL};
use mason_lib::plan::{BuildPlan, compute_plan, package_versions};
use mason_lib::report::CompositeReporter;
use mason_lib::watch::watch_sources;
use mason_lib::workspace::{Package, Workspace};

use crate::console::ConsoleReporter;
use crate::effects::SideEffects;

#[derive(Args)]
pub struct BuildArgs {
  /// Package to build (component/name or component:name)
  pub package: Option<String>,

  /// Caching behaviour: none=no caching, local=local caching only,
  /// remote-pull=download from remote but never upload, remote-push=push to
  /// remote but never download, remote=use all configured caches
  #[arg(short = 'c', long)]
  pub cache: Option<String>,

  /// Don't actually build but stop after showing what would need to be built
  #[arg(long)]
  pub dry_run: bool,

  /// Write the build plan as JSON to a file. Use "-" to write the build
  /// plan to stderr.
  #[arg(long)]
  pub dump_plan: Option<String>,

  /// Disable all package-level tests
  #[arg(long)]
  pub dont_test: bool,

  /// Disable compression of build artifacts
  #[arg(long)]
  pub dont_compress: bool,

  /// Run all build commands in a bubblewrap sandbox
  #[arg(long)]
  pub jailed_execution: bool,

  /// Limit the number of max concurrent build tasks - set to 0 to disable
  /// the limit
  #[arg(short = 'j', long)]
  pub max_concurrent_tasks: Option<usize>,

  /// Output path where test coverage files will be copied after running
  /// tests
  #[arg(long)]
  pub coverage_output_path: Option<PathBuf>,

  /// Option passed to all `docker build` commands (key=value, repeatable)
  #[arg(long, value_parser = parse_key_value)]
  pub docker_build_options: Vec<(String, String)>,

  /// Watch source files and re-build on change
  #[arg(long)]
  pub watch: bool,

  /// After a successful build, serve the build result on the given address
  /// (e.g. --serve localhost:8080)
  #[arg(long)]
  pub serve: Option<String>,

  /// After a successful build, save the build result archive to the given
  /// path (e.g. --save build-result.tar.gz)
  #[arg(long)]
  pub save: Option<PathBuf>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
  raw
    .split_once('=')
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .ok_or_else(|| format!("expected key=value, got {:?}", raw))
}

pub async fn cmd_build(root: &Path, args: BuildArgs) -> Result<()> {
  let cache_level = match &args.cache {
    Some(level) => level.parse::<CacheLevel>()?,
    None => CacheLevel::from_env()?,
  };

  // With caching disabled artifacts land in a throwaway directory that
  // lives for this invocation only.
  let (local_cache, _ephemeral) = match cache_level {
    CacheLevel::None => {
      let dir = tempfile::Builder::new().prefix("mason-cache-").tempdir()?;
      (FilesystemCache::new(dir.path().to_path_buf())?, Some(dir))
    }
    _ => (FilesystemCache::new(local_cache_dir())?, None),
  };
  info!(location = %local_cache.root().display(), level = %cache_level, "local cache configured");

  let remote: Arc<dyn RemoteCache> = match std::env::var(ENV_REMOTE_CACHE_URL) {
    Ok(url) if !url.is_empty() => Arc::new(HttpRemoteCache::new(url)),
    _ => Arc::new(NoRemoteCache),
  };

  let mut config = BuildConfig::new(local_cache, configure_remote(cache_level, remote));
  config.dry_run = args.dry_run;
  config.dont_test = args.dont_test;
  config.compress = !args.dont_compress;
  config.jailed_execution = args.jailed_execution;
  config.coverage_output_path = args.coverage_output_path.clone();
  config.docker_build_options = args.docker_build_options.iter().cloned().collect::<BTreeMap<_, _>>();
  if let Some(max) = args.max_concurrent_tasks {
    config.max_concurrent_tasks = max;
  }
  config.reporter = Arc::new(CompositeReporter::new(vec![Arc::new(ConsoleReporter::new())]));

  let workspace = Workspace::load(root).context("cannot load workspace")?;
  let target = args
    .package
    .clone()
    .or_else(|| workspace.default_target.clone())
    .ok_or_else(|| anyhow!("build needs a package"))?;

  let summary = run_cycle(&workspace, &target, &config, args.dump_plan.as_deref()).await?;
  if !summary.is_success() {
    bail!("build of {} failed", target);
  }
  if args.dry_run {
    return Ok(());
  }

  let mut effects = SideEffects::new(args.serve.clone(), args.save.clone());
  effects.restart(&config.local_cache, &target_artifact(&workspace, &target)?).await?;

  if !args.watch {
    if args.serve.is_some() {
      // Keep serving until interrupted.
      tokio::signal::ctrl_c().await?;
    }
    return Ok(());
  }

  watch_loop(root, &target, &config, &workspace, &mut effects).await
}

/// The watch loop: Idle until a debounced change event arrives, then reload
/// the workspace and run a full plan/execute cycle. A rebuild failure is
/// logged and the previous artifact and side effects stay untouched; only a
/// failure of the watch mechanism itself is fatal.
async fn watch_loop(
  root: &Path,
  target: &str,
  config: &BuildConfig,
  workspace: &Workspace,
  effects: &mut SideEffects,
) -> Result<()> {
  let watched = watched_packages(workspace, target)?;
  let mut watcher = watch_sources(&watched, DEFAULT_DEBOUNCE)?;
  println!("watching {} packages for changes", watched.len());

  loop {
    tokio::select! {
      event = watcher.events.recv() => {
        let Some(event) = event else {
          bail!("watch event channel closed");
        };
        info!(files = event.paths.len(), "source change detected, rebuilding");
        rebuild(root, target, config, effects).await;
      }
      err = watcher.errors.recv() => {
        let Some(err) = err else {
          bail!("watch error channel closed");
        };
        return Err(err).context("file watching failed");
      }
    }
  }
}

/// One watch-triggered rebuild. Never fatal: the target is re-resolved from
/// the freshly reloaded workspace, and any failure leaves the last-known-good
/// state alone.
async fn rebuild(root: &Path, target: &str, config: &BuildConfig, effects: &mut SideEffects) {
  let workspace = match Workspace::load(root) {
    Ok(ws) => ws,
    Err(e) => {
      error!(error = %e, "workspace reload failed, keeping previous build");
      return;
    }
  };

  match run_cycle(&workspace, target, config, None).await {
    Ok(summary) if summary.is_success() => {
      let artifact = match target_artifact(&workspace, target) {
        Ok(artifact) => artifact,
        Err(e) => {
          error!(error = %e, "cannot determine build result");
          return;
        }
      };
      if let Err(e) = effects.restart(&config.local_cache, &artifact).await {
        error!(error = %e, "restarting side effects failed");
      }
    }
    Ok(_) => {
      error!(target = %target, "rebuild failed, keeping previous build");
    }
    Err(e) => {
      error!(error = %e, "rebuild failed, keeping previous build");
    }
  }
}

async fn run_cycle(
  workspace: &Workspace,
  target: &str,
  config: &BuildConfig,
  dump_plan: Option<&str>,
) -> Result<BuildSummary> {
  let package = workspace
    .resolve_target(target)
    .ok_or_else(|| anyhow!("package not found: {}", target))?;

  let plan = compute_plan(workspace, package, &config.local_cache, config.remote_cache.as_ref()).await?;

  if let Some(dest) = dump_plan {
    if dest == "-" {
      plan.write_json(std::io::stderr().lock())?;
      eprintln!();
    } else {
      let file = File::create(dest).with_context(|| format!("cannot open {}", dest))?;
      plan.write_json(file)?;
    }
  }

  if config.dry_run {
    print_plan(&plan);
  }

  Ok(execute_plan(&plan, config).await?)
}

fn print_plan(plan: &BuildPlan) {
  for node in &plan.nodes {
    println!(
      "{}  {} ({})",
      format!("{:>13}", node.status).bold(),
      node.full_name(),
      node.version.to_string().dimmed()
    );
  }
}

/// The artifact the serve/save side effects act on.
fn target_artifact(workspace: &Workspace, target: &str) -> Result<ArtifactId> {
  let package = workspace
    .resolve_target(target)
    .ok_or_else(|| anyhow!("package not found: {}", target))?;
  let full_name = package.full_name();
  let versions = package_versions(workspace, &full_name)?;
  Ok(ArtifactId {
    version: versions[&full_name].clone(),
    full_name,
  })
}

/// The package set the watcher observes: the target plus its transitive
/// dependencies.
fn watched_packages(workspace: &Workspace, target: &str) -> Result<Vec<Package>> {
  let package = workspace
    .resolve_target(target)
    .ok_or_else(|| anyhow!("package not found: {}", target))?;
  let versions = package_versions(workspace, &package.full_name())?;
  Ok(
    versions
      .keys()
      .filter_map(|name| workspace.packages.get(name).cloned())
      .collect(),
  )
}

fn local_cache_dir() -> PathBuf {
  std::env::var(ENV_CACHE_DIR)
    .map(PathBuf::from)
    .unwrap_or_else(|_| std::env::temp_dir().join("mason").join("cache"))
}
