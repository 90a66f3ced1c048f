//! Artifact archive packing and extraction.
//!
//! Build results are stored as tar archives, gzip-compressed unless
//! compression is disabled. Archives are written to a temporary file next to
//! the destination and renamed into place so a concurrent reader never sees a
//! half-written artifact.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder};
use thiserror::Error;

/// Error while packing or unpacking an artifact archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to persist archive at {path}: {message}")]
  Persist { path: String, message: String },

  #[error("unsupported archive format: {0}")]
  UnsupportedFormat(String),
}

/// Pack the contents of `src_dir` into an archive at `dest`.
///
/// The archive contains the directory contents at its root (no leading
/// component). With `compress` the result is a gzip tarball, otherwise a
/// plain tarball.
pub fn pack_archive(src_dir: &Path, dest: &Path, compress: bool) -> Result<(), ArchiveError> {
  if let Some(parent) = dest.parent() {
    fs::create_dir_all(parent)?;
  }

  let staging = tempfile::NamedTempFile::new_in(dest.parent().unwrap_or(Path::new(".")))?;

  {
    use std::io::Write;

    let writer = BufWriter::new(staging.as_file());
    if compress {
      let encoder = GzEncoder::new(writer, Compression::default());
      let mut builder = Builder::new(encoder);
      builder.append_dir_all(".", src_dir)?;
      builder.into_inner()?.finish()?.flush()?;
    } else {
      let mut builder = Builder::new(writer);
      builder.append_dir_all(".", src_dir)?;
      builder.into_inner()?.flush()?;
    }
  }

  staging.persist(dest).map_err(|e| ArchiveError::Persist {
    path: dest.display().to_string(),
    message: e.to_string(),
  })?;

  Ok(())
}

/// Unpack an artifact archive into `dest`.
///
/// Supports `.tar.gz` / `.tgz` and plain `.tar`.
pub fn unpack_archive(archive_path: &Path, dest: &Path) -> Result<(), ArchiveError> {
  let name = archive_path.to_string_lossy();

  fs::create_dir_all(dest)?;

  if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut archive = Archive::new(decoder);
    archive.unpack(dest)?;
  } else if name.ends_with(".tar") {
    let file = File::open(archive_path)?;
    let mut archive = Archive::new(BufReader::new(file));
    archive.unpack(dest)?;
  } else {
    return Err(ArchiveError::UnsupportedFormat(name.to_string()));
  }

  Ok(())
}
