//! Workspace scanning and validation.
//!
//! A workspace is a directory tree with a `workspace.yaml` marker at its
//! root. Every directory below it containing a `build.yaml` is a component;
//! the manifest lists that component's packages. Scanning resolves source
//! globs to concrete file lists, normalizes dependency references to
//! `component/name` full names, and validates the model:
//! - package names are unique within their component (and full names
//!   therefore globally unique)
//! - every dependency reference resolves to a known package
//! - the dependency relation is acyclic
//! - layout collisions (two dependencies placed at the same path) are
//!   reported as warnings, not errors

pub mod types;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSetBuilder};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::consts::{COMPONENT_MANIFEST, WORKSPACE_MANIFEST};
use crate::plan::graph::{GraphError, PackageGraph};

pub use types::{
  Component, DockerConfig, GenericConfig, GoConfig, GoPackaging, Package, PackageConfig, PackageKind, YarnConfig,
  YarnPackaging,
};

/// The fully scanned repository model.
#[derive(Debug, Clone)]
pub struct Workspace {
  /// Absolute workspace root.
  pub origin: PathBuf,
  /// Target built when the CLI is invoked without one.
  pub default_target: Option<String>,
  /// Components by name (path relative to the root).
  pub components: BTreeMap<String, Component>,
  /// Packages by full name.
  pub packages: BTreeMap<String, Package>,
}

/// Errors while loading a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
  #[error("no workspace.yaml found at {}", .0.display())]
  ManifestNotFound(PathBuf),

  #[error("failed to read {path}: {message}")]
  Read { path: String, message: String },

  #[error("failed to parse {path}: {message}")]
  Parse { path: String, message: String },

  #[error("duplicate package {full_name}")]
  DuplicatePackage { full_name: String },

  #[error("package {package}: invalid dependency reference {reference:?}")]
  InvalidDependency { package: String, reference: String },

  #[error("package {package}: invalid source pattern {pattern:?}: {message}")]
  InvalidSourcePattern {
    package: String,
    pattern: String,
    message: String,
  },

  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

#[derive(Debug, Default, Deserialize)]
struct WorkspaceManifest {
  #[serde(default)]
  default_target: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ComponentManifest {
  #[serde(default)]
  packages: Vec<PackageManifest>,
}

#[derive(Debug, Deserialize)]
struct PackageManifest {
  name: String,

  #[serde(default)]
  deps: Vec<String>,

  #[serde(default)]
  sources: Vec<String>,

  #[serde(default)]
  layout: BTreeMap<String, String>,

  #[serde(flatten)]
  config: PackageConfig,
}

impl Workspace {
  /// Scan and validate the workspace rooted at `root`.
  ///
  /// # Errors
  ///
  /// Fails when the root has no `workspace.yaml`, a manifest cannot be
  /// parsed, a package name collides, a dependency reference is malformed or
  /// unresolved, or the dependency relation contains a cycle.
  pub fn load(root: &Path) -> Result<Self, WorkspaceError> {
    let origin = fs::canonicalize(root)?;

    let manifest_path = origin.join(WORKSPACE_MANIFEST);
    if !manifest_path.is_file() {
      return Err(WorkspaceError::ManifestNotFound(origin));
    }
    let manifest = parse_yaml::<WorkspaceManifest>(&manifest_path)?;

    let mut workspace = Workspace {
      origin: origin.clone(),
      default_target: manifest.default_target,
      components: BTreeMap::new(),
      packages: BTreeMap::new(),
    };

    for entry in WalkDir::new(&origin).into_iter().filter_entry(|e| !is_hidden(e)) {
      let entry = entry.map_err(|e| WorkspaceError::Read {
        path: origin.display().to_string(),
        message: e.to_string(),
      })?;
      if !entry.file_type().is_file() || entry.file_name() != COMPONENT_MANIFEST {
        continue;
      }

      let component_dir = entry.path().parent().unwrap_or(&origin).to_path_buf();
      if component_dir == origin {
        warn!(path = %entry.path().display(), "ignoring component manifest at the workspace root");
        continue;
      }

      workspace.load_component(&component_dir, entry.path())?;
    }

    // Resolving the graph validates that every dependency exists and that
    // the relation, closed over all packages, is acyclic.
    PackageGraph::from_workspace(&workspace)?;

    for package in workspace.packages.values() {
      warn_on_layout_collisions(package);
    }

    info!(
      components = workspace.components.len(),
      packages = workspace.packages.len(),
      root = %workspace.origin.display(),
      "workspace loaded"
    );

    Ok(workspace)
  }

  /// Walk upwards from `start` looking for a directory containing
  /// `workspace.yaml`.
  pub fn find_root(start: &Path) -> Option<PathBuf> {
    start
      .ancestors()
      .find(|dir| dir.join(WORKSPACE_MANIFEST).is_file())
      .map(Path::to_path_buf)
  }

  /// Look up a package by target reference (`component/name` or
  /// `component:name`).
  pub fn resolve_target(&self, reference: &str) -> Option<&Package> {
    let full_name = normalize_package_ref(reference, None)?;
    self.packages.get(&full_name)
  }

  fn load_component(&mut self, component_dir: &Path, manifest_path: &Path) -> Result<(), WorkspaceError> {
    let name = relative_name(&self.origin, component_dir);
    let manifest = parse_yaml::<ComponentManifest>(manifest_path)?;

    debug!(component = %name, packages = manifest.packages.len(), "scanning component");

    let mut seen = HashSet::new();
    for pkg in manifest.packages {
      let full_name = format!("{}/{}", name, pkg.name);
      if !seen.insert(pkg.name.clone()) {
        return Err(WorkspaceError::DuplicatePackage { full_name });
      }

      let mut dependencies = Vec::with_capacity(pkg.deps.len());
      for dep in &pkg.deps {
        let normalized =
          normalize_package_ref(dep, Some(&name)).ok_or_else(|| WorkspaceError::InvalidDependency {
            package: full_name.clone(),
            reference: dep.clone(),
          })?;
        dependencies.push(normalized);
      }

      let mut layout = BTreeMap::new();
      for (dep, location) in &pkg.layout {
        let normalized =
          normalize_package_ref(dep, Some(&name)).ok_or_else(|| WorkspaceError::InvalidDependency {
            package: full_name.clone(),
            reference: dep.clone(),
          })?;
        if !dependencies.contains(&normalized) {
          warn!(package = %full_name, dependency = %normalized, "layout entry for a package that is not a dependency");
        }
        layout.insert(normalized, location.clone());
      }

      let sources = resolve_sources(component_dir, &pkg.sources, &full_name)?;

      self.packages.insert(
        full_name,
        Package {
          name: pkg.name,
          component: name.clone(),
          origin: component_dir.to_path_buf(),
          config: pkg.config,
          dependencies,
          sources,
          layout,
        },
      );
    }

    self.components.insert(
      name.clone(),
      Component {
        name,
        origin: component_dir.to_path_buf(),
      },
    );

    Ok(())
  }
}

/// Normalize a package reference to its `component/name` full name.
///
/// Accepted forms:
/// - `component/name` (canonical)
/// - `component:name`
/// - `:name` — same-component shorthand, requires `component` context
///
/// Returns `None` when the reference is malformed or the shorthand is used
/// without component context.
pub fn normalize_package_ref(reference: &str, component: Option<&str>) -> Option<String> {
  let reference = reference.trim();
  if reference.is_empty() {
    return None;
  }

  if let Some(name) = reference.strip_prefix(':') {
    let component = component?;
    if name.is_empty() || name.contains('/') || name.contains(':') {
      return None;
    }
    return Some(format!("{}/{}", component, name));
  }

  if let Some((component, name)) = reference.rsplit_once(':') {
    if component.is_empty() || name.is_empty() || name.contains('/') {
      return None;
    }
    return Some(format!("{}/{}", component, name));
  }

  if reference.contains('/') && !reference.ends_with('/') {
    return Some(reference.to_string());
  }

  None
}

fn parse_yaml<T: Default + for<'de> Deserialize<'de>>(path: &Path) -> Result<T, WorkspaceError> {
  let contents = fs::read_to_string(path).map_err(|e| WorkspaceError::Read {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  if contents.trim().is_empty() {
    return Ok(T::default());
  }

  serde_yaml::from_str(&contents).map_err(|e| WorkspaceError::Parse {
    path: path.display().to_string(),
    message: e.to_string(),
  })
}

impl Default for ComponentManifest {
  fn default() -> Self {
    ComponentManifest { packages: Vec::new() }
  }
}

fn is_hidden(entry: &walkdir::DirEntry) -> bool {
  entry.depth() > 0
    && entry
      .file_name()
      .to_str()
      .map(|name| name.starts_with('.'))
      .unwrap_or(false)
}

fn relative_name(root: &Path, dir: &Path) -> String {
  dir
    .strip_prefix(root)
    .unwrap_or(dir)
    .components()
    .map(|c| c.as_os_str().to_string_lossy())
    .collect::<Vec<_>>()
    .join("/")
}

/// Resolve source glob patterns into a sorted list of absolute file paths.
///
/// Matching is relative to the component directory. Hidden entries, nested
/// component directories, and the component manifest itself are excluded.
fn resolve_sources(component_dir: &Path, patterns: &[String], package: &str) -> Result<Vec<PathBuf>, WorkspaceError> {
  if patterns.is_empty() {
    return Ok(Vec::new());
  }

  let mut builder = GlobSetBuilder::new();
  for pattern in patterns {
    let glob = Glob::new(pattern).map_err(|e| WorkspaceError::InvalidSourcePattern {
      package: package.to_string(),
      pattern: pattern.clone(),
      message: e.to_string(),
    })?;
    builder.add(glob);
  }
  let globs = builder.build().map_err(|e| WorkspaceError::InvalidSourcePattern {
    package: package.to_string(),
    pattern: patterns.join(", "),
    message: e.to_string(),
  })?;

  let walker = WalkDir::new(component_dir).into_iter().filter_entry(|e| {
    if is_hidden(e) {
      return false;
    }
    // Do not descend into nested components: their files belong to their
    // own packages.
    !(e.depth() > 0 && e.file_type().is_dir() && e.path().join(COMPONENT_MANIFEST).is_file())
  });

  let mut sources = Vec::new();
  for entry in walker {
    let entry = entry.map_err(|e| WorkspaceError::Read {
      path: component_dir.display().to_string(),
      message: e.to_string(),
    })?;
    if !entry.file_type().is_file() || entry.file_name() == COMPONENT_MANIFEST {
      continue;
    }
    let relative = entry.path().strip_prefix(component_dir).unwrap_or(entry.path());
    if globs.is_match(relative) {
      sources.push(entry.path().to_path_buf());
    }
  }

  sources.sort();
  Ok(sources)
}

fn warn_on_layout_collisions(package: &Package) {
  let mut locations: BTreeMap<&String, &String> = BTreeMap::new();
  for (dep, location) in &package.layout {
    if let Some(previous) = locations.insert(location, dep) {
      warn!(
        package = %package.full_name(),
        location = %location,
        first = %previous,
        second = %dep,
        "two dependencies share the same layout location; their contents will collide"
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
  }

  fn fixture_workspace() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();

    write(&root.join(WORKSPACE_MANIFEST), "default_target: app/server\n");
    write(
      &root.join("lib/build.yaml"),
      r#"
packages:
  - name: common
    type: generic
    sources: ["**/*.sh"]
    commands: [["echo", "common"]]
"#,
    );
    write(&root.join("lib/gen.sh"), "echo hi\n");
    write(
      &root.join("app/build.yaml"),
      r#"
packages:
  - name: proto
    type: generic
    commands: [["echo", "proto"]]
  - name: server
    type: go
    sources: ["**/*.go", "go.mod"]
    deps: [":proto", "lib/common"]
    layout:
      lib/common: common
"#,
    );
    write(&root.join("app/main.go"), "package main\n");
    write(&root.join("app/go.mod"), "module example.com/app\n");

    temp
  }

  #[test]
  fn load_resolves_packages_and_dependencies() {
    let temp = fixture_workspace();
    let ws = Workspace::load(temp.path()).unwrap();

    assert_eq!(ws.default_target.as_deref(), Some("app/server"));
    assert_eq!(ws.components.len(), 2);
    assert_eq!(ws.packages.len(), 3);

    let server = ws.packages.get("app/server").unwrap();
    assert_eq!(server.dependencies, vec!["app/proto", "lib/common"]);
    assert_eq!(server.layout.get("lib/common").map(String::as_str), Some("common"));
    assert_eq!(server.kind(), PackageKind::Go);

    let sources: Vec<_> = server
      .sources
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
      .collect();
    assert_eq!(sources, vec!["go.mod", "main.go"]);
  }

  #[test]
  fn load_requires_workspace_manifest() {
    let temp = TempDir::new().unwrap();
    let result = Workspace::load(temp.path());
    assert!(matches!(result, Err(WorkspaceError::ManifestNotFound(_))));
  }

  #[test]
  fn duplicate_package_names_rejected() {
    let temp = TempDir::new().unwrap();
    write(&temp.path().join(WORKSPACE_MANIFEST), "");
    write(
      &temp.path().join("comp/build.yaml"),
      r#"
packages:
  - name: twice
    type: generic
  - name: twice
    type: generic
"#,
    );

    let result = Workspace::load(temp.path());
    assert!(matches!(result, Err(WorkspaceError::DuplicatePackage { .. })));
  }

  #[test]
  fn unresolved_dependency_rejected() {
    let temp = TempDir::new().unwrap();
    write(&temp.path().join(WORKSPACE_MANIFEST), "");
    write(
      &temp.path().join("comp/build.yaml"),
      r#"
packages:
  - name: lonely
    type: generic
    deps: ["comp/ghost"]
"#,
    );

    let result = Workspace::load(temp.path());
    assert!(matches!(
      result,
      Err(WorkspaceError::Graph(GraphError::UnresolvedDependency { .. }))
    ));
  }

  #[test]
  fn dependency_cycle_rejected() {
    let temp = TempDir::new().unwrap();
    write(&temp.path().join(WORKSPACE_MANIFEST), "");
    write(
      &temp.path().join("comp/build.yaml"),
      r#"
packages:
  - name: a
    type: generic
    deps: [":b"]
  - name: b
    type: generic
    deps: [":a"]
"#,
    );

    let result = Workspace::load(temp.path());
    assert!(matches!(result, Err(WorkspaceError::Graph(GraphError::Cycle { .. }))));
  }

  #[test]
  fn sources_exclude_nested_components() {
    let temp = TempDir::new().unwrap();
    write(&temp.path().join(WORKSPACE_MANIFEST), "");
    write(
      &temp.path().join("outer/build.yaml"),
      r#"
packages:
  - name: all
    type: generic
    sources: ["**/*.txt"]
"#,
    );
    write(&temp.path().join("outer/mine.txt"), "mine");
    write(
      &temp.path().join("outer/inner/build.yaml"),
      r#"
packages:
  - name: leaf
    type: generic
"#,
    );
    write(&temp.path().join("outer/inner/theirs.txt"), "theirs");

    let ws = Workspace::load(temp.path()).unwrap();
    let all = ws.packages.get("outer/all").unwrap();
    let names: Vec<_> = all
      .sources
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
      .collect();
    assert_eq!(names, vec!["mine.txt"]);
  }

  #[test]
  fn normalize_accepts_all_reference_forms() {
    assert_eq!(
      normalize_package_ref(":pkg0", Some("comp")).as_deref(),
      Some("comp/pkg0")
    );
    assert_eq!(normalize_package_ref("comp:pkg0", None).as_deref(), Some("comp/pkg0"));
    assert_eq!(normalize_package_ref("comp/pkg0", None).as_deref(), Some("comp/pkg0"));
    assert_eq!(
      normalize_package_ref("a/b:pkg", None).as_deref(),
      Some("a/b/pkg"),
      "nested components keep their path"
    );

    assert_eq!(normalize_package_ref(":pkg0", None), None);
    assert_eq!(normalize_package_ref("", Some("comp")), None);
    assert_eq!(normalize_package_ref("plain", None), None);
    assert_eq!(normalize_package_ref(":", Some("comp")), None);
  }

  #[test]
  fn find_root_walks_upwards() {
    let temp = fixture_workspace();
    let nested = temp.path().join("app");
    let found = Workspace::find_root(&nested).unwrap();
    assert_eq!(found, temp.path());
  }
}
