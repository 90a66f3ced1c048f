//! Build planning: versions, cache annotation, and the ordered plan.
//!
//! Planning turns "build package P" into a topologically ordered list of
//! plan nodes covering P and its transitive dependencies. Each node carries
//! the package's deterministic content version and a cache status:
//! `cached-local`, `cached-remote`, or `must-build`. Local status comes from
//! a synchronous [`FilesystemCache::location`] lookup; remote status from a
//! single batched existence check over everything not cached locally. A
//! remote cache failure degrades to `must-build` — the cache is an
//! optimization, never a build input.
//!
//! Cache status never forces a rebuild of a dependent: version equality is
//! the sole correctness oracle. The executor schedules every node, cached or
//! not, after all of its dependencies, which is what keeps fetch order sound
//! when a dependency still has to be built.

pub mod graph;

use std::collections::{BTreeMap, HashSet};
use std::io;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{ArtifactId, FilesystemCache, RemoteCache};
use crate::util::hash::{HashError, Version, hash_file};
use crate::workspace::{Package, Workspace};

use graph::{GraphError, PackageGraph};

/// Where a planned package's artifact will come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStatus {
  CachedLocal,
  CachedRemote,
  MustBuild,
}

impl std::fmt::Display for CacheStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      CacheStatus::CachedLocal => "cached-local",
      CacheStatus::CachedRemote => "cached-remote",
      CacheStatus::MustBuild => "must-build",
    };
    write!(f, "{}", s)
  }
}

/// One package in a build plan.
#[derive(Debug, Clone)]
pub struct PlanNode {
  pub package: Package,
  pub version: Version,
  pub status: CacheStatus,
  /// Direct dependencies, all of which are themselves plan nodes. Sorted.
  pub dependencies: Vec<String>,
}

impl PlanNode {
  pub fn full_name(&self) -> String {
    self.package.full_name()
  }

  pub fn artifact_id(&self) -> ArtifactId {
    ArtifactId {
      full_name: self.full_name(),
      version: self.version.clone(),
    }
  }
}

/// A topologically ordered, cache-annotated build plan. Every node appears
/// after all of its dependencies; ties are broken by full name, so the plan
/// is deterministic for identical workspace state.
#[derive(Debug, Clone)]
pub struct BuildPlan {
  pub target: String,
  pub nodes: Vec<PlanNode>,
}

impl BuildPlan {
  pub fn node(&self, full_name: &str) -> Option<&PlanNode> {
    self.nodes.iter().find(|n| n.full_name() == full_name)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn count(&self, status: CacheStatus) -> usize {
    self.nodes.iter().filter(|n| n.status == status).count()
  }

  /// Write the plan as JSON, stable for identical input workspace state.
  pub fn write_json<W: io::Write>(&self, writer: W) -> Result<(), serde_json::Error> {
    let dump = PlanDump {
      target: &self.target,
      packages: self
        .nodes
        .iter()
        .map(|n| PlanRecord {
          package: n.full_name(),
          kind: n.package.kind().to_string(),
          version: &n.version,
          status: n.status,
          dependencies: &n.dependencies,
        })
        .collect(),
    };
    serde_json::to_writer_pretty(writer, &dump)
  }
}

#[derive(Serialize)]
struct PlanDump<'a> {
  target: &'a str,
  packages: Vec<PlanRecord<'a>>,
}

#[derive(Serialize)]
struct PlanRecord<'a> {
  package: String,
  #[serde(rename = "type")]
  kind: String,
  version: &'a Version,
  status: CacheStatus,
  dependencies: &'a [String],
}

/// Errors during planning.
#[derive(Debug, Error)]
pub enum PlanError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("failed to hash sources of {package}: {source}")]
  Hash {
    package: String,
    #[source]
    source: HashError,
  },

  #[error("failed to serialize config of {package}: {message}")]
  Config { package: String, message: String },
}

/// Compute the build plan for `target`.
///
/// Resolves the transitive dependency closure, orders it, computes versions,
/// and annotates every node with its cache status. The remote existence
/// check is one batched call over all packages not already cached locally;
/// when it fails those packages degrade to `must-build`.
pub async fn compute_plan(
  workspace: &Workspace,
  target: &Package,
  local: &FilesystemCache,
  remote: &dyn RemoteCache,
) -> Result<BuildPlan, PlanError> {
  let target_name = target.full_name();
  let graph = PackageGraph::from_workspace(workspace)?;
  let closure = graph.transitive_closure(&target_name)?;
  let order = graph.topological_order(&closure)?;
  let versions = compute_versions(workspace, &order)?;

  // Local lookups first; everything else is a candidate for the batched
  // remote existence check.
  let mut statuses: BTreeMap<String, CacheStatus> = BTreeMap::new();
  let mut candidates: Vec<ArtifactId> = Vec::new();
  for name in &order {
    let id = ArtifactId {
      full_name: name.clone(),
      version: versions[name].clone(),
    };
    if local.location(&id).1 {
      statuses.insert(name.clone(), CacheStatus::CachedLocal);
    } else {
      candidates.push(id);
    }
  }

  let remotely_present: HashSet<Version> = if candidates.is_empty() {
    HashSet::new()
  } else {
    match remote.existing_packages(&candidates).await {
      Ok(present) => present,
      Err(e) => {
        warn!(error = %e, "remote cache existence check failed; treating packages as not cached");
        HashSet::new()
      }
    }
  };

  for candidate in candidates {
    let status = if remotely_present.contains(&candidate.version) {
      CacheStatus::CachedRemote
    } else {
      CacheStatus::MustBuild
    };
    statuses.insert(candidate.full_name, status);
  }

  let nodes = order
    .iter()
    .map(|name| PlanNode {
      package: workspace.packages[name].clone(),
      version: versions[name].clone(),
      status: statuses[name],
      dependencies: graph.dependencies(name),
    })
    .collect();

  debug!(target = %target_name, packages = order.len(), "plan computed");

  Ok(BuildPlan {
    target: target_name,
    nodes,
  })
}

/// Compute versions for `target` and its transitive dependencies.
///
/// This is the standalone entry used by commands that need versions without
/// a cache, such as dependency graph dumps.
pub fn package_versions(workspace: &Workspace, target: &str) -> Result<BTreeMap<String, Version>, PlanError> {
  let graph = PackageGraph::from_workspace(workspace)?;
  let closure = graph.transitive_closure(target)?;
  let order = graph.topological_order(&closure)?;
  compute_versions(workspace, &order)
}

/// Compute content versions in topological order.
///
/// A version hashes the package's configuration and layout, the content of
/// every source file, and the version of every direct dependency. Any transitive input
/// change therefore changes the version; identical inputs always produce the
/// identical version.
fn compute_versions(workspace: &Workspace, order: &[String]) -> Result<BTreeMap<String, Version>, PlanError> {
  let mut versions: BTreeMap<String, Version> = BTreeMap::new();

  for name in order {
    let pkg = &workspace.packages[name];
    let mut hasher = Sha256::new();

    hasher.update(format!("package:{}\n", name));

    let config = serde_json::to_string(&pkg.config).map_err(|e| PlanError::Config {
      package: name.clone(),
      message: e.to_string(),
    })?;
    hasher.update(format!("config:{}\n", config));

    for source in &pkg.sources {
      let relative = source.strip_prefix(&pkg.origin).unwrap_or(source);
      let content = hash_file(source).map_err(|e| PlanError::Hash {
        package: name.clone(),
        source: e,
      })?;
      hasher.update(format!("source:{}:{}\n", relative.display(), content));
    }

    for (dep, location) in &pkg.layout {
      hasher.update(format!("layout:{}:{}\n", dep, location));
    }

    let mut deps = pkg.dependencies.clone();
    deps.sort();
    for dep in deps {
      // Topological order guarantees the dependency's version exists.
      hasher.update(format!("dep:{}:{}\n", dep, versions[&dep]));
    }

    versions.insert(name.clone(), Version::from_digest(&format!("{:x}", hasher.finalize())));
  }

  Ok(versions)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::remote::{NoRemoteCache, RemoteFuture};
  use std::fs;
  use std::path::Path;
  use tempfile::TempDir;

  fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
  }

  /// comp/app depends on comp/lib; both generic with one source file each.
  fn fixture() -> TempDir {
    let temp = TempDir::new().unwrap();
    write(&temp.path().join("workspace.yaml"), "");
    write(
      &temp.path().join("comp/build.yaml"),
      r#"
packages:
  - name: lib
    type: generic
    sources: ["lib.txt"]
    commands: [["true"]]
  - name: app
    type: generic
    sources: ["app.txt"]
    deps: [":lib"]
    commands: [["true"]]
"#,
    );
    write(&temp.path().join("comp/lib.txt"), "lib v1");
    write(&temp.path().join("comp/app.txt"), "app v1");
    temp
  }

  fn local_cache() -> (FilesystemCache, TempDir) {
    let temp = TempDir::new().unwrap();
    (FilesystemCache::new(temp.path().to_path_buf()).unwrap(), temp)
  }

  struct FixedRemote {
    present: HashSet<Version>,
  }

  impl RemoteCache for FixedRemote {
    fn existing_packages<'a>(&'a self, pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, HashSet<Version>> {
      let result = pkgs
        .iter()
        .filter(|p| self.present.contains(&p.version))
        .map(|p| p.version.clone())
        .collect();
      Box::pin(async move { Ok(result) })
    }

    fn download<'a>(&'a self, _dst: &'a FilesystemCache, _pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()> {
      Box::pin(async { Ok(()) })
    }

    fn upload<'a>(&'a self, _src: &'a FilesystemCache, _pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()> {
      Box::pin(async { Ok(()) })
    }
  }

  struct FailingRemote;

  fn remote_error() -> crate::cache::CacheError {
    crate::cache::CacheError::RemoteStatus {
      status: 500,
      url: "http://remote/broken".to_string(),
    }
  }

  impl RemoteCache for FailingRemote {
    fn existing_packages<'a>(&'a self, _pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, HashSet<Version>> {
      Box::pin(async { Err(remote_error()) })
    }

    fn download<'a>(&'a self, _dst: &'a FilesystemCache, _pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()> {
      Box::pin(async { Ok(()) })
    }

    fn upload<'a>(&'a self, _src: &'a FilesystemCache, _pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()> {
      Box::pin(async { Ok(()) })
    }
  }

  #[test]
  fn versions_are_deterministic() {
    let temp = fixture();
    let ws = Workspace::load(temp.path()).unwrap();

    let first = package_versions(&ws, "comp/app").unwrap();
    let second = package_versions(&ws, "comp/app").unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn dependency_source_change_propagates_to_dependent() {
    let temp = fixture();
    let ws = Workspace::load(temp.path()).unwrap();
    let before = package_versions(&ws, "comp/app").unwrap();

    // Only the dependency's source changes; the dependent's own sources are
    // untouched.
    write(&temp.path().join("comp/lib.txt"), "lib v2");
    let ws = Workspace::load(temp.path()).unwrap();
    let after = package_versions(&ws, "comp/app").unwrap();

    assert_ne!(before["comp/lib"], after["comp/lib"]);
    assert_ne!(before["comp/app"], after["comp/app"]);
  }

  #[test]
  fn config_change_changes_version() {
    let temp = fixture();
    let ws = Workspace::load(temp.path()).unwrap();
    let before = package_versions(&ws, "comp/lib").unwrap();

    write(
      &temp.path().join("comp/build.yaml"),
      r#"
packages:
  - name: lib
    type: generic
    sources: ["lib.txt"]
    commands: [["false"]]
  - name: app
    type: generic
    sources: ["app.txt"]
    deps: [":lib"]
    commands: [["true"]]
"#,
    );
    let ws = Workspace::load(temp.path()).unwrap();
    let after = package_versions(&ws, "comp/lib").unwrap();

    assert_ne!(before["comp/lib"], after["comp/lib"]);
  }

  #[tokio::test]
  async fn plan_orders_dependency_before_dependent() {
    let temp = fixture();
    let ws = Workspace::load(temp.path()).unwrap();
    let (local, _t) = local_cache();

    let target = ws.packages.get("comp/app").unwrap().clone();
    let plan = compute_plan(&ws, &target, &local, &NoRemoteCache).await.unwrap();

    let names: Vec<_> = plan.nodes.iter().map(|n| n.full_name()).collect();
    assert_eq!(names, vec!["comp/lib", "comp/app"]);
    assert_eq!(plan.target, "comp/app");
    assert_eq!(plan.count(CacheStatus::MustBuild), 2);
  }

  #[tokio::test]
  async fn local_artifact_yields_cached_local() {
    let temp = fixture();
    let ws = Workspace::load(temp.path()).unwrap();
    let (local, _t) = local_cache();

    let versions = package_versions(&ws, "comp/app").unwrap();
    let id = ArtifactId {
      full_name: "comp/lib".to_string(),
      version: versions["comp/lib"].clone(),
    };
    fs::write(local.path_for(&id, true), b"artifact").unwrap();

    let target = ws.packages.get("comp/app").unwrap().clone();
    let plan = compute_plan(&ws, &target, &local, &NoRemoteCache).await.unwrap();

    assert_eq!(plan.node("comp/lib").unwrap().status, CacheStatus::CachedLocal);
    assert_eq!(plan.node("comp/app").unwrap().status, CacheStatus::MustBuild);
  }

  #[tokio::test]
  async fn remote_artifact_yields_cached_remote() {
    let temp = fixture();
    let ws = Workspace::load(temp.path()).unwrap();
    let (local, _t) = local_cache();

    let versions = package_versions(&ws, "comp/app").unwrap();
    let remote = FixedRemote {
      present: [versions["comp/lib"].clone()].into_iter().collect(),
    };

    let target = ws.packages.get("comp/app").unwrap().clone();
    let plan = compute_plan(&ws, &target, &local, &remote).await.unwrap();

    assert_eq!(plan.node("comp/lib").unwrap().status, CacheStatus::CachedRemote);
    assert_eq!(plan.node("comp/app").unwrap().status, CacheStatus::MustBuild);
  }

  #[tokio::test]
  async fn remote_failure_degrades_to_must_build() {
    let temp = fixture();
    let ws = Workspace::load(temp.path()).unwrap();
    let (local, _t) = local_cache();

    let target = ws.packages.get("comp/app").unwrap().clone();
    let plan = compute_plan(&ws, &target, &local, &FailingRemote).await.unwrap();

    assert_eq!(plan.count(CacheStatus::MustBuild), 2);
  }

  #[tokio::test]
  async fn plan_dump_is_stable() {
    let temp = fixture();
    let ws = Workspace::load(temp.path()).unwrap();
    let (local, _t) = local_cache();

    let target = ws.packages.get("comp/app").unwrap().clone();
    let plan = compute_plan(&ws, &target, &local, &NoRemoteCache).await.unwrap();

    let mut first = Vec::new();
    plan.write_json(&mut first).unwrap();
    let mut second = Vec::new();
    plan.write_json(&mut second).unwrap();

    assert_eq!(first, second);
    let text = String::from_utf8(first).unwrap();
    assert!(text.contains("\"status\": \"must-build\""));
    assert!(text.contains("\"target\": \"comp/app\""));
  }
}
