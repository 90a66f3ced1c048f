//! The build executor.
//!
//! Realizes a build plan: every node is either reused from the local cache,
//! downloaded from the remote cache, or built by its kind-specific action.
//! Scheduling is a classic DAG walk — a node runs only after all of its
//! dependencies completed successfully — under a configurable concurrency
//! bound. A node failure marks its transitive dependents skipped and stops
//! releasing new work, while unrelated in-flight work runs to completion.

mod actions;
mod execute;
mod jail;
mod scheduler;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::cache::{CacheError, FilesystemCache, RemoteCache};
use crate::plan::graph::GraphError;
use crate::plan::{BuildPlan, PlanError, compute_plan};
use crate::report::{CompositeReporter, Reporter};
use crate::util::archive::ArchiveError;
use crate::workspace::Workspace;

pub use execute::dependency_env_name;

/// Errors that fail a package or the whole build.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error("package {package}: build action failed: {message}")]
  Action { package: String, message: String },

  #[error("package {package}: tests failed: {message}")]
  Test { package: String, message: String },

  #[error("package {package}: artifact for dependency {dependency} missing from local cache")]
  MissingDependencyArtifact { package: String, dependency: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Cache(#[from] CacheError),

  #[error(transparent)]
  Archive(#[from] ArchiveError),
}

/// Executor configuration, threaded explicitly through the build — there is
/// no ambient global state.
#[derive(Clone)]
pub struct BuildConfig {
  pub local_cache: FilesystemCache,
  pub remote_cache: Arc<dyn RemoteCache>,
  pub reporter: Arc<dyn Reporter>,

  /// Compute and report the plan, but do not execute it.
  pub dry_run: bool,

  /// Skip every package's test step.
  pub dont_test: bool,

  /// Concurrency bound for package tasks. 0 means unbounded.
  pub max_concurrent_tasks: usize,

  /// Directory test coverage profiles are written to, when set.
  pub coverage_output_path: Option<PathBuf>,

  /// Extra options passed to every `docker build` as `--key=value`.
  pub docker_build_options: BTreeMap<String, String>,

  /// Run build commands inside a bubblewrap sandbox.
  pub jailed_execution: bool,

  /// Gzip-compress artifact archives.
  pub compress: bool,
}

impl BuildConfig {
  pub fn new(local_cache: FilesystemCache, remote_cache: Arc<dyn RemoteCache>) -> Self {
    BuildConfig {
      local_cache,
      remote_cache,
      reporter: Arc::new(CompositeReporter::default()),
      dry_run: false,
      dont_test: false,
      max_concurrent_tasks: std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4),
      coverage_output_path: None,
      docker_build_options: BTreeMap::new(),
      jailed_execution: false,
      compress: true,
    }
  }
}

/// Result of executing a build plan. Packages appear in exactly one bucket.
#[derive(Debug)]
pub struct BuildSummary {
  pub target: String,
  /// Packages whose build action ran and produced a fresh artifact.
  pub built: Vec<String>,
  /// Packages reused from the local cache.
  pub cached_local: Vec<String>,
  /// Packages downloaded from the remote cache.
  pub cached_remote: Vec<String>,
  /// Packages whose build or test action failed, with the failure message.
  pub failed: Vec<(String, String)>,
  /// Packages skipped because a dependency failed, mapped to that
  /// dependency.
  pub skipped: BTreeMap<String, String>,
  /// Packages never started because the build halted after a failure.
  pub pending: Vec<String>,
}

impl BuildSummary {
  pub fn new(target: impl Into<String>) -> Self {
    BuildSummary {
      target: target.into(),
      built: Vec::new(),
      cached_local: Vec::new(),
      cached_remote: Vec::new(),
      failed: Vec::new(),
      skipped: BTreeMap::new(),
      pending: Vec::new(),
    }
  }

  pub fn is_success(&self) -> bool {
    self.failed.is_empty() && self.skipped.is_empty()
  }

  pub fn total(&self) -> usize {
    self.built.len()
      + self.cached_local.len()
      + self.cached_remote.len()
      + self.failed.len()
      + self.skipped.len()
      + self.pending.len()
  }
}

/// Plan and execute a build of `target`.
///
/// This is the main entry point: it resolves the target, computes the
/// cache-annotated plan, and — unless this is a dry run — executes it.
///
/// # Errors
///
/// Only structural problems (unknown target, dependency cycle, version
/// hashing failure) surface as `Err`. Per-package failures are recorded in
/// the returned summary; check [`BuildSummary::is_success`].
pub async fn build(workspace: &Workspace, target: &str, config: &BuildConfig) -> Result<BuildSummary, BuildError> {
  let package = workspace
    .resolve_target(target)
    .ok_or_else(|| PlanError::Graph(GraphError::TargetNotFound {
      target: target.to_string(),
    }))?;

  let plan = compute_plan(workspace, package, &config.local_cache, config.remote_cache.as_ref()).await?;
  execute_plan(&plan, config).await
}

/// Execute an already computed plan.
pub async fn execute_plan(plan: &BuildPlan, config: &BuildConfig) -> Result<BuildSummary, BuildError> {
  config.reporter.build_started(plan);

  if config.dry_run {
    info!(target = %plan.target, packages = plan.len(), "dry run, not executing");
    let summary = BuildSummary::new(&plan.target);
    config.reporter.build_finished(&plan.target, &summary);
    return Ok(summary);
  }

  let summary = scheduler::run(plan, config).await;
  config.reporter.build_finished(&plan.target, &summary);

  info!(
    target = %plan.target,
    built = summary.built.len(),
    cached_local = summary.cached_local.len(),
    cached_remote = summary.cached_remote.len(),
    failed = summary.failed.len(),
    skipped = summary.skipped.len(),
    "build finished"
  );

  Ok(summary)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn summary_success_requires_no_failures_or_skips() {
    let mut summary = BuildSummary::new("comp/app");
    assert!(summary.is_success());

    summary.built.push("comp/lib".to_string());
    summary.pending.push("comp/late".to_string());
    assert!(summary.is_success());

    summary.failed.push(("comp/app".to_string(), "boom".to_string()));
    assert!(!summary.is_success());
  }

  #[test]
  fn summary_total_counts_all_buckets() {
    let mut summary = BuildSummary::new("comp/app");
    summary.built.push("a".to_string());
    summary.cached_local.push("b".to_string());
    summary.cached_remote.push("c".to_string());
    summary.failed.push(("d".to_string(), "err".to_string()));
    summary.skipped.insert("e".to_string(), "d".to_string());
    summary.pending.push("f".to_string());
    assert_eq!(summary.total(), 6);
  }
}
