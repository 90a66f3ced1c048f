//! Artifact caches.
//!
//! The local cache is a flat directory of artifact archives keyed by package
//! full name and version. The remote cache (see [`remote`]) mirrors those
//! archives behind an HTTP service and supports batched existence checks.
//!
//! Cache levels select which of the two participate in a build:
//!
//! | level         | local | remote existence | download | upload |
//! |---------------|-------|------------------|----------|--------|
//! | `none`        | ephemeral | no           | no       | no     |
//! | `local`       | yes   | no               | no       | no     |
//! | `remote-pull` | yes   | yes              | yes      | no     |
//! | `remote-push` | yes   | yes              | no       | yes    |
//! | `remote`      | yes   | yes              | yes      | yes    |
//!
//! The pull-only/push-only levels are realized by wrapping a full remote
//! cache in a decorator that no-ops the disallowed operation, so the planner
//! and executor stay unaware of the level.

pub mod remote;

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::consts::ENV_DEFAULT_CACHE_LEVEL;
use crate::util::hash::Version;

pub use remote::{HttpRemoteCache, NoRemoteCache, PullOnlyRemoteCache, PushOnlyRemoteCache, RemoteCache, configure_remote};

/// Errors from cache operations.
///
/// Remote errors are transient by contract: callers degrade to "not cached"
/// and rebuild locally. Only local I/O failures are surfaced as hard errors.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("remote cache request failed: {0}")]
  Remote(#[from] reqwest::Error),

  #[error("remote cache returned status {status} for {url}")]
  RemoteStatus { status: u16, url: String },

  #[error("artifact missing from local cache: {0}")]
  MissingArtifact(String),
}

/// How much caching a build uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLevel {
  /// No caching: artifacts land in an ephemeral location and are discarded.
  None,
  /// Local cache only, no remote calls.
  Local,
  /// Download from remote, never upload.
  RemotePull,
  /// Upload to remote, never download. The existence check still runs so the
  /// planner knows what not to rebuild.
  RemotePush,
  /// Full remote read and write.
  Remote,
}

impl CacheLevel {
  /// The level used when neither a flag nor the environment overrides it.
  pub const DEFAULT: CacheLevel = CacheLevel::Remote;

  /// Resolve the default cache level from the environment, falling back to
  /// [`CacheLevel::DEFAULT`].
  pub fn from_env() -> Result<CacheLevel, InvalidCacheLevel> {
    match std::env::var(ENV_DEFAULT_CACHE_LEVEL) {
      Ok(value) if !value.is_empty() => value.parse(),
      _ => Ok(CacheLevel::DEFAULT),
    }
  }
}

/// Error for unrecognized cache level names.
#[derive(Debug, Error)]
#[error("invalid cache level: {0} (expected none, local, remote-pull, remote-push or remote)")]
pub struct InvalidCacheLevel(String);

impl FromStr for CacheLevel {
  type Err = InvalidCacheLevel;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "none" => Ok(CacheLevel::None),
      "local" => Ok(CacheLevel::Local),
      "remote-pull" => Ok(CacheLevel::RemotePull),
      "remote-push" => Ok(CacheLevel::RemotePush),
      "remote" => Ok(CacheLevel::Remote),
      other => Err(InvalidCacheLevel(other.to_string())),
    }
  }
}

impl std::fmt::Display for CacheLevel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      CacheLevel::None => "none",
      CacheLevel::Local => "local",
      CacheLevel::RemotePull => "remote-pull",
      CacheLevel::RemotePush => "remote-push",
      CacheLevel::Remote => "remote",
    };
    write!(f, "{}", s)
  }
}

/// Identity of one package artifact: the package plus its content version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ArtifactId {
  pub full_name: String,
  pub version: Version,
}

impl ArtifactId {
  /// File name of the artifact archive in the local cache.
  pub fn file_name(&self, compressed: bool) -> String {
    let ext = if compressed { "tar.gz" } else { "tar" };
    format!("{}-{}.{}", sanitize_name(&self.full_name), self.version, ext)
  }

  /// Key of this artifact in a remote cache: full name plus version, with
  /// no archive extension. Remote storage is agnostic to whether the
  /// producer compressed the archive.
  pub fn remote_key(&self) -> String {
    format!("{}-{}", sanitize_name(&self.full_name), self.version)
  }
}

impl std::fmt::Display for ArtifactId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}@{}", self.full_name, self.version)
  }
}

/// Replace path separators so a full name can be used in a file name.
pub fn sanitize_name(full_name: &str) -> String {
  full_name.replace(['/', ':'], "--")
}

/// The local filesystem cache: one artifact archive per package version
/// under a single root directory.
#[derive(Debug, Clone)]
pub struct FilesystemCache {
  root: PathBuf,
}

impl FilesystemCache {
  /// Open (and create if necessary) a cache rooted at `root`.
  pub fn new(root: PathBuf) -> Result<Self, CacheError> {
    fs::create_dir_all(&root)?;
    Ok(FilesystemCache { root })
  }

  pub fn root(&self) -> &std::path::Path {
    &self.root
  }

  /// Locate a package's artifact in this cache.
  ///
  /// Synchronous and side-effect free; never touches the network. Checks the
  /// compressed name first, then the uncompressed one. When neither exists,
  /// the returned path is where a compressed artifact would be written.
  pub fn location(&self, id: &ArtifactId) -> (PathBuf, bool) {
    let compressed = self.root.join(id.file_name(true));
    if compressed.is_file() {
      return (compressed, true);
    }
    let plain = self.root.join(id.file_name(false));
    if plain.is_file() {
      return (plain, true);
    }
    (compressed, false)
  }

  /// The path an artifact gets written to, honoring the compression toggle.
  pub fn path_for(&self, id: &ArtifactId, compressed: bool) -> PathBuf {
    self.root.join(id.file_name(compressed))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  fn artifact(name: &str, version: &str) -> ArtifactId {
    ArtifactId {
      full_name: name.to_string(),
      version: Version(version.to_string()),
    }
  }

  #[test]
  fn parse_all_levels() {
    assert_eq!("none".parse::<CacheLevel>().unwrap(), CacheLevel::None);
    assert_eq!("local".parse::<CacheLevel>().unwrap(), CacheLevel::Local);
    assert_eq!("remote-pull".parse::<CacheLevel>().unwrap(), CacheLevel::RemotePull);
    assert_eq!("remote-push".parse::<CacheLevel>().unwrap(), CacheLevel::RemotePush);
    assert_eq!("remote".parse::<CacheLevel>().unwrap(), CacheLevel::Remote);
    assert!("aggressive".parse::<CacheLevel>().is_err());
  }

  #[test]
  #[serial]
  fn level_from_env_with_override() {
    temp_env::with_var(ENV_DEFAULT_CACHE_LEVEL, Some("local"), || {
      assert_eq!(CacheLevel::from_env().unwrap(), CacheLevel::Local);
    });
    temp_env::with_var(ENV_DEFAULT_CACHE_LEVEL, None::<&str>, || {
      assert_eq!(CacheLevel::from_env().unwrap(), CacheLevel::Remote);
    });
    temp_env::with_var(ENV_DEFAULT_CACHE_LEVEL, Some("bogus"), || {
      assert!(CacheLevel::from_env().is_err());
    });
  }

  #[test]
  fn artifact_file_name_is_path_safe() {
    let id = artifact("comp/pkg0", "abc123");
    assert_eq!(id.file_name(true), "comp--pkg0-abc123.tar.gz");
    assert_eq!(id.file_name(false), "comp--pkg0-abc123.tar");
  }

  #[test]
  fn remote_key_carries_no_extension() {
    let id = artifact("comp/pkg0", "abc123");
    assert_eq!(id.remote_key(), "comp--pkg0-abc123");
  }

  #[test]
  fn location_misses_then_hits() {
    let temp = TempDir::new().unwrap();
    let cache = FilesystemCache::new(temp.path().to_path_buf()).unwrap();
    let id = artifact("comp/pkg0", "abc123");

    let (path, exists) = cache.location(&id);
    assert!(!exists);
    assert_eq!(path, cache.path_for(&id, true));

    std::fs::write(cache.path_for(&id, true), b"artifact").unwrap();
    let (path, exists) = cache.location(&id);
    assert!(exists);
    assert!(path.ends_with("comp--pkg0-abc123.tar.gz"));
  }

  #[test]
  fn location_falls_back_to_uncompressed() {
    let temp = TempDir::new().unwrap();
    let cache = FilesystemCache::new(temp.path().to_path_buf()).unwrap();
    let id = artifact("comp/pkg0", "abc123");

    std::fs::write(cache.path_for(&id, false), b"artifact").unwrap();
    let (path, exists) = cache.location(&id);
    assert!(exists);
    assert!(path.ends_with("comp--pkg0-abc123.tar"));
  }
}
