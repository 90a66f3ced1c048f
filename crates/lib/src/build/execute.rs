//! Single package realization.
//!
//! A node short-circuits to its cached artifact when it can; otherwise its
//! sources are copied into a scratch build directory, dependency artifacts
//! are extracted at their layout locations, the kind-specific build and test
//! actions run, and the result is packed into the local cache and optionally
//! pushed to the remote.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::cache::sanitize_name;
use crate::consts::DEFAULT_DEP_LAYOUT;
use crate::plan::{CacheStatus, PlanNode};
use crate::report::PackageOutcome;
use crate::util::archive::unpack_archive;
use crate::workspace::PackageConfig;

use super::{BuildConfig, BuildError, actions};

pub(crate) async fn execute_node(
  node: &PlanNode,
  deps: &[PlanNode],
  config: &BuildConfig,
) -> Result<PackageOutcome, BuildError> {
  let id = node.artifact_id();

  match node.status {
    CacheStatus::CachedLocal => {
      if config.local_cache.location(&id).1 {
        debug!(package = %node.full_name(), "reusing local artifact");
        return Ok(PackageOutcome::CachedLocal);
      }
      warn!(package = %node.full_name(), "expected local artifact disappeared, rebuilding");
    }
    CacheStatus::CachedRemote => {
      if config.local_cache.location(&id).1 {
        return Ok(PackageOutcome::CachedLocal);
      }
      match config
        .remote_cache
        .download(&config.local_cache, std::slice::from_ref(&id))
        .await
      {
        Ok(()) if config.local_cache.location(&id).1 => {
          debug!(package = %node.full_name(), "downloaded remote artifact");
          return Ok(PackageOutcome::CachedRemote);
        }
        Ok(()) => {
          warn!(package = %node.full_name(), "remote download produced no artifact, rebuilding");
        }
        Err(e) => {
          warn!(package = %node.full_name(), error = %e, "remote download failed, rebuilding");
        }
      }
    }
    CacheStatus::MustBuild => {}
  }

  build_package(node, deps, config).await?;
  Ok(PackageOutcome::Built)
}

async fn build_package(node: &PlanNode, deps: &[PlanNode], config: &BuildConfig) -> Result<(), BuildError> {
  let full_name = node.full_name();
  info!(package = %full_name, version = %node.version, "building package");

  let build_dir = tempfile::Builder::new().prefix("mason-build-").tempdir()?;

  copy_sources(node, build_dir.path())?;
  let dep_env = place_dependencies(node, deps, build_dir.path(), config)?;

  actions::run_build(node, build_dir.path(), &dep_env, config).await?;

  if !config.dont_test {
    actions::run_tests(node, build_dir.path(), &dep_env, config).await?;
  }

  let artifact = config.local_cache.path_for(&node.artifact_id(), config.compress);
  crate::util::archive::pack_archive(build_dir.path(), &artifact, config.compress)?;
  debug!(package = %full_name, artifact = %artifact.display(), "artifact stored");

  // The artifact is already valid locally; a failed push only means
  // distribution failed.
  if let Err(e) = config
    .remote_cache
    .upload(&config.local_cache, &[node.artifact_id()])
    .await
  {
    warn!(package = %full_name, error = %e, "artifact upload failed");
  }

  Ok(())
}

/// Copy the package's source files into the build directory, preserving
/// their paths relative to the component.
fn copy_sources(node: &PlanNode, build_dir: &Path) -> Result<(), BuildError> {
  for source in &node.package.sources {
    let relative = source.strip_prefix(&node.package.origin).unwrap_or(source);
    let dest = build_dir.join(relative);
    if let Some(parent) = dest.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::copy(source, &dest)?;
  }
  Ok(())
}

/// Extract dependency artifacts at their layout locations and compute the
/// `DEP_*` environment for the build action.
///
/// Docker dependencies expose their first image tag; every other kind
/// exposes the path its artifact was extracted to.
fn place_dependencies(
  node: &PlanNode,
  deps: &[PlanNode],
  build_dir: &Path,
  config: &BuildConfig,
) -> Result<BTreeMap<String, String>, BuildError> {
  let mut env = BTreeMap::new();

  for dep in deps {
    let dep_name = dep.full_name();
    let (path, exists) = config.local_cache.location(&dep.artifact_id());
    if !exists {
      return Err(BuildError::MissingDependencyArtifact {
        package: node.full_name(),
        dependency: dep_name,
      });
    }

    let location = node
      .package
      .layout
      .get(&dep_name)
      .cloned()
      .unwrap_or_else(|| format!("{}/{}", DEFAULT_DEP_LAYOUT, sanitize_name(&dep_name)));
    let dest = build_dir.join(&location);
    unpack_archive(&path, &dest)?;

    let value = match &dep.package.config {
      PackageConfig::Docker(c) if !c.image.is_empty() => c.image[0].clone(),
      _ => dest.to_string_lossy().to_string(),
    };
    env.insert(dependency_env_name(&dep_name), value);
  }

  Ok(env)
}

/// Environment variable name a dependency is exposed under, e.g.
/// `comp/pkg0` becomes `DEP_COMP__PKG0`.
pub fn dependency_env_name(full_name: &str) -> String {
  let name = full_name
    .to_uppercase()
    .replace(['/', ':'], "__")
    .replace(['-', '.'], "_");
  format!("DEP_{}", name)
}
