//! Hashing utilities for content-addressed versioning.
//!
//! This module provides:
//! - `Version`: the truncated content hash that identifies a package build
//! - `ContentHash`: a full 64-character hash for file contents
//! - `hash_file()` / `hash_bytes()`: the underlying SHA-256 helpers

use std::fs;
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::consts::VERSION_PREFIX_LEN;

/// The deterministic content version of a package.
///
/// Computed over the package's own source contents, its configuration, and
/// the versions of all direct dependencies (and therefore, transitively, over
/// every input). It is the cache key: identical inputs always produce the
/// identical version.
///
/// # Format
///
/// A lowercase hexadecimal string truncated to [`VERSION_PREFIX_LEN`]
/// characters, e.g. `"3f2a9c..."`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(pub String);

impl Version {
  /// Truncate a full hex digest into a version.
  pub fn from_digest(full_hex: &str) -> Self {
    Version(full_hex[..VERSION_PREFIX_LEN.min(full_hex.len())].to_string())
  }
}

impl std::fmt::Display for Version {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A full 64-character SHA-256 hash of some content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl std::fmt::Display for ContentHash {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Error while hashing file contents.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
  #[error("failed to read {path}: {message}")]
  ReadFile { path: String, message: String },
}

/// Hash a file's contents.
///
/// Returns the full 64-character SHA-256 hash. Only the content is hashed,
/// never metadata such as timestamps or permissions.
pub fn hash_file(path: &Path) -> Result<ContentHash, HashError> {
  let mut file = fs::File::open(path).map_err(|e| HashError::ReadFile {
    path: path.display().to_string(),
    message: e.to_string(),
  })?;

  let mut hasher = Sha256::new();
  let mut buffer = [0u8; 8192];

  loop {
    let bytes_read = file.read(&mut buffer).map_err(|e| HashError::ReadFile {
      path: path.display().to_string(),
      message: e.to_string(),
    })?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(ContentHash(format!("{:x}", hasher.finalize())))
}

/// Hash arbitrary bytes.
pub fn hash_bytes(data: &[u8]) -> ContentHash {
  let mut hasher = Sha256::new();
  hasher.update(data);
  ContentHash(format!("{:x}", hasher.finalize()))
}
