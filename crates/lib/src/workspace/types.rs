//! The scanned workspace model: components, packages, and their
//! kind-specific configuration.
//!
//! The model is built once by [`Workspace::load`](super::Workspace::load) and
//! is read-only for the remainder of a build. Watch mode discards and
//! rebuilds the whole model on every change.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A directory grouping one or more packages, identified by its path
/// relative to the workspace root.
#[derive(Debug, Clone)]
pub struct Component {
  /// Path relative to the workspace root, `/`-separated.
  pub name: String,
  /// Absolute path of the component directory.
  pub origin: PathBuf,
}

/// The smallest buildable unit.
#[derive(Debug, Clone)]
pub struct Package {
  /// Name, unique within the owning component.
  pub name: String,
  /// Name of the owning component.
  pub component: String,
  /// Absolute path of the owning component directory.
  pub origin: PathBuf,
  /// Kind-specific configuration.
  pub config: PackageConfig,
  /// Full names of direct dependencies, normalized to `component/name`.
  pub dependencies: Vec<String>,
  /// Absolute paths of the files that constitute this package's build input,
  /// sorted for determinism.
  pub sources: Vec<PathBuf>,
  /// Build-time placement of dependency artifacts: dependency full name to a
  /// path relative to the build directory.
  pub layout: BTreeMap<String, String>,
}

impl Package {
  /// The globally unique `component/name` identifier.
  pub fn full_name(&self) -> String {
    format!("{}/{}", self.component, self.name)
  }

  pub fn kind(&self) -> PackageKind {
    match self.config {
      PackageConfig::Docker(_) => PackageKind::Docker,
      PackageConfig::Generic(_) => PackageKind::Generic,
      PackageConfig::Go(_) => PackageKind::Go,
      PackageConfig::Yarn(_) => PackageKind::Yarn,
    }
  }
}

/// The closed set of package kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
  Docker,
  Generic,
  Go,
  Yarn,
}

impl std::fmt::Display for PackageKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      PackageKind::Docker => "docker",
      PackageKind::Generic => "generic",
      PackageKind::Go => "go",
      PackageKind::Yarn => "yarn",
    };
    write!(f, "{}", s)
  }
}

/// Kind-specific package configuration, tagged by `type` in the component
/// manifest. Each kind has a fixed configuration shape and a fixed build
/// action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PackageConfig {
  Docker(DockerConfig),
  Generic(GenericConfig),
  Go(GoConfig),
  Yarn(YarnConfig),
}

/// Configuration for Docker image packages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
  /// Dockerfile path relative to the component directory.
  #[serde(default = "default_dockerfile")]
  pub dockerfile: String,

  /// Tags applied to the built image. The first tag is what dependent
  /// packages see in their `DEP_*` build argument. When empty, the image is
  /// saved into the artifact instead.
  #[serde(default)]
  pub image: Vec<String>,

  /// Additional `--build-arg` key/value pairs.
  #[serde(default)]
  pub build_args: BTreeMap<String, String>,
}

fn default_dockerfile() -> String {
  "Dockerfile".to_string()
}

/// Configuration for generic script packages: a fixed list of argv-style
/// commands, plus optional test commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenericConfig {
  #[serde(default)]
  pub commands: Vec<Vec<String>>,

  #[serde(default)]
  pub test: Vec<Vec<String>>,
}

/// Configuration for Go packages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoConfig {
  #[serde(default)]
  pub packaging: GoPackaging,

  /// Skip this package's tests even when tests are enabled globally.
  #[serde(default)]
  pub dont_test: bool,

  /// Extra flags passed to `go build`.
  #[serde(default)]
  pub build_flags: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoPackaging {
  #[default]
  Library,
  App,
}

/// Configuration for Yarn packages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct YarnConfig {
  #[serde(default)]
  pub packaging: YarnPackaging,

  /// Skip this package's tests even when tests are enabled globally.
  #[serde(default)]
  pub dont_test: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YarnPackaging {
  #[default]
  Library,
  App,
}
