//! The remote artifact cache protocol and its implementations.
//!
//! A remote cache supports three operations: a batched existence check (one
//! network round trip for many packages), downloading artifacts into another
//! cache, and uploading artifacts from another cache. Cache levels that
//! forbid one direction wrap a full implementation in a decorator that
//! no-ops exactly that operation.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{ArtifactId, CacheError, CacheLevel, FilesystemCache};
use crate::util::hash::Version;

/// Boxed future returned by [`RemoteCache`] operations.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CacheError>> + Send + 'a>>;

/// Capability set of a remote artifact cache.
pub trait RemoteCache: Send + Sync {
  /// Which of `pkgs` already have a remote artifact. One batched request,
  /// regardless of how many packages are asked about.
  fn existing_packages<'a>(&'a self, pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, HashSet<Version>>;

  /// Pull remote artifacts for `pkgs` into `dst`.
  fn download<'a>(&'a self, dst: &'a FilesystemCache, pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()>;

  /// Push artifacts for `pkgs` from `src` to the remote.
  fn upload<'a>(&'a self, src: &'a FilesystemCache, pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()>;
}

/// Remote cache used when no remote is configured: nothing exists, transfers
/// do nothing.
pub struct NoRemoteCache;

impl RemoteCache for NoRemoteCache {
  fn existing_packages<'a>(&'a self, _pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, HashSet<Version>> {
    Box::pin(async { Ok(HashSet::new()) })
  }

  fn download<'a>(&'a self, _dst: &'a FilesystemCache, _pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()> {
    Box::pin(async { Ok(()) })
  }

  fn upload<'a>(&'a self, _src: &'a FilesystemCache, _pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()> {
    Box::pin(async { Ok(()) })
  }
}

/// Decorator allowing existence checks and downloads but suppressing
/// uploads.
pub struct PullOnlyRemoteCache {
  inner: Arc<dyn RemoteCache>,
}

impl PullOnlyRemoteCache {
  pub fn new(inner: Arc<dyn RemoteCache>) -> Self {
    PullOnlyRemoteCache { inner }
  }
}

impl RemoteCache for PullOnlyRemoteCache {
  fn existing_packages<'a>(&'a self, pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, HashSet<Version>> {
    self.inner.existing_packages(pkgs)
  }

  fn download<'a>(&'a self, dst: &'a FilesystemCache, pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()> {
    self.inner.download(dst, pkgs)
  }

  fn upload<'a>(&'a self, _src: &'a FilesystemCache, _pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()> {
    Box::pin(async { Ok(()) })
  }
}

/// Decorator allowing existence checks and uploads but suppressing
/// downloads.
pub struct PushOnlyRemoteCache {
  inner: Arc<dyn RemoteCache>,
}

impl PushOnlyRemoteCache {
  pub fn new(inner: Arc<dyn RemoteCache>) -> Self {
    PushOnlyRemoteCache { inner }
  }
}

impl RemoteCache for PushOnlyRemoteCache {
  fn existing_packages<'a>(&'a self, pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, HashSet<Version>> {
    self.inner.existing_packages(pkgs)
  }

  fn download<'a>(&'a self, _dst: &'a FilesystemCache, _pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()> {
    Box::pin(async { Ok(()) })
  }

  fn upload<'a>(&'a self, src: &'a FilesystemCache, pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()> {
    self.inner.upload(src, pkgs)
  }
}

/// Wrap a full remote cache according to the cache level.
///
/// `none` and `local` drop the remote entirely; `remote-pull` and
/// `remote-push` wrap it in the corresponding decorator; `remote` uses it
/// as-is.
pub fn configure_remote(level: CacheLevel, remote: Arc<dyn RemoteCache>) -> Arc<dyn RemoteCache> {
  match level {
    CacheLevel::None | CacheLevel::Local => Arc::new(NoRemoteCache),
    CacheLevel::RemotePull => Arc::new(PullOnlyRemoteCache::new(remote)),
    CacheLevel::RemotePush => Arc::new(PushOnlyRemoteCache::new(remote)),
    CacheLevel::Remote => remote,
  }
}

#[derive(Serialize)]
struct ExistsRequest<'a> {
  artifacts: &'a [String],
}

#[derive(Deserialize)]
struct ExistsResponse {
  exists: Vec<String>,
}

/// Remote cache backed by a plain HTTP artifact service.
///
/// Endpoints:
/// - `POST {base}/v1/exists` with `{"artifacts": [..keys..]}` returns
///   `{"exists": [..subset..]}`
/// - `GET {base}/artifacts/{key}` downloads an artifact
/// - `PUT {base}/artifacts/{key}` uploads an artifact
///
/// Artifacts are keyed by [`ArtifactId::remote_key`] — full name plus
/// version, no archive extension — so the remote side never depends on the
/// producer's compression setting. A transfer carries whichever archive
/// form the producer stored; downloads detect the format from the content
/// and store it locally under the matching name.
pub struct HttpRemoteCache {
  base_url: String,
  client: reqwest::Client,
}

/// Gzip streams start with the two-byte magic `1f 8b`.
fn is_gzip(bytes: &[u8]) -> bool {
  bytes.starts_with(&[0x1f, 0x8b])
}

impl HttpRemoteCache {
  pub fn new(base_url: impl Into<String>) -> Self {
    let mut base_url = base_url.into();
    while base_url.ends_with('/') {
      base_url.pop();
    }
    HttpRemoteCache {
      base_url,
      client: reqwest::Client::new(),
    }
  }

  fn artifact_url(&self, key: &str) -> String {
    format!("{}/artifacts/{}", self.base_url, key)
  }
}

impl RemoteCache for HttpRemoteCache {
  fn existing_packages<'a>(&'a self, pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, HashSet<Version>> {
    Box::pin(async move {
      if pkgs.is_empty() {
        return Ok(HashSet::new());
      }

      let keys: Vec<String> = pkgs.iter().map(|p| p.remote_key()).collect();
      let url = format!("{}/v1/exists", self.base_url);
      let response = self
        .client
        .post(&url)
        .json(&ExistsRequest { artifacts: &keys })
        .send()
        .await?;

      if !response.status().is_success() {
        return Err(CacheError::RemoteStatus {
          status: response.status().as_u16(),
          url,
        });
      }

      let body: ExistsResponse = response.json().await?;
      let present: HashSet<String> = body.exists.into_iter().collect();

      debug!(asked = pkgs.len(), present = present.len(), "remote existence check");

      Ok(
        pkgs
          .iter()
          .filter(|p| present.contains(&p.remote_key()))
          .map(|p| p.version.clone())
          .collect(),
      )
    })
  }

  fn download<'a>(&'a self, dst: &'a FilesystemCache, pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()> {
    Box::pin(async move {
      for pkg in pkgs {
        let url = self.artifact_url(&pkg.remote_key());
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
          return Err(CacheError::RemoteStatus {
            status: response.status().as_u16(),
            url,
          });
        }

        let bytes = response.bytes().await?;
        // The local name must match the archive form the producer stored.
        let dest = dst.path_for(pkg, is_gzip(&bytes));
        let staging = dest.with_extension("partial");
        tokio::fs::write(&staging, &bytes).await?;
        tokio::fs::rename(&staging, &dest).await?;

        debug!(artifact = %pkg, "downloaded artifact");
      }
      Ok(())
    })
  }

  fn upload<'a>(&'a self, src: &'a FilesystemCache, pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()> {
    Box::pin(async move {
      for pkg in pkgs {
        let (path, exists) = src.location(pkg);
        if !exists {
          return Err(CacheError::MissingArtifact(pkg.to_string()));
        }

        let bytes = tokio::fs::read(&path).await?;
        let url = self.artifact_url(&pkg.remote_key());
        let response = self.client.put(&url).body(bytes).send().await?;

        if !response.status().is_success() {
          return Err(CacheError::RemoteStatus {
            status: response.status().as_u16(),
            url,
          });
        }

        debug!(artifact = %pkg, "uploaded artifact");
      }
      Ok(())
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex;
  use tempfile::TempDir;

  #[derive(Default)]
  struct RecordingRemote {
    calls: Mutex<Vec<&'static str>>,
  }

  impl RemoteCache for RecordingRemote {
    fn existing_packages<'a>(&'a self, _pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, HashSet<Version>> {
      self.calls.lock().unwrap().push("exists");
      Box::pin(async { Ok(HashSet::new()) })
    }

    fn download<'a>(&'a self, _dst: &'a FilesystemCache, _pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()> {
      self.calls.lock().unwrap().push("download");
      Box::pin(async { Ok(()) })
    }

    fn upload<'a>(&'a self, _src: &'a FilesystemCache, _pkgs: &'a [ArtifactId]) -> RemoteFuture<'a, ()> {
      self.calls.lock().unwrap().push("upload");
      Box::pin(async { Ok(()) })
    }
  }

  fn artifact(name: &str) -> ArtifactId {
    ArtifactId {
      full_name: name.to_string(),
      version: Version("cafe".to_string()),
    }
  }

  fn cache() -> (FilesystemCache, TempDir) {
    let temp = TempDir::new().unwrap();
    let cache = FilesystemCache::new(temp.path().to_path_buf()).unwrap();
    (cache, temp)
  }

  #[tokio::test]
  async fn no_remote_reports_nothing_cached() {
    let (local, _t) = cache();
    let remote = NoRemoteCache;
    let pkgs = vec![artifact("c/a")];

    assert!(remote.existing_packages(&pkgs).await.unwrap().is_empty());
    remote.download(&local, &pkgs).await.unwrap();
    remote.upload(&local, &pkgs).await.unwrap();
  }

  #[tokio::test]
  async fn pull_only_suppresses_upload() {
    let (local, _t) = cache();
    let recording = Arc::new(RecordingRemote::default());
    let pull_only = PullOnlyRemoteCache::new(recording.clone());
    let pkgs = vec![artifact("c/a")];

    pull_only.existing_packages(&pkgs).await.unwrap();
    pull_only.download(&local, &pkgs).await.unwrap();
    pull_only.upload(&local, &pkgs).await.unwrap();

    assert_eq!(*recording.calls.lock().unwrap(), vec!["exists", "download"]);
  }

  #[tokio::test]
  async fn push_only_suppresses_download() {
    let (local, _t) = cache();
    let recording = Arc::new(RecordingRemote::default());
    let push_only = PushOnlyRemoteCache::new(recording.clone());
    let pkgs = vec![artifact("c/a")];

    push_only.existing_packages(&pkgs).await.unwrap();
    push_only.download(&local, &pkgs).await.unwrap();
    push_only.upload(&local, &pkgs).await.unwrap();

    assert_eq!(*recording.calls.lock().unwrap(), vec!["exists", "upload"]);
  }

  #[tokio::test]
  async fn configure_remote_drops_remote_for_local_levels() {
    let recording = Arc::new(RecordingRemote::default());
    let pkgs = vec![artifact("c/a")];

    for level in [CacheLevel::None, CacheLevel::Local] {
      let remote = configure_remote(level, recording.clone());
      remote.existing_packages(&pkgs).await.unwrap();
    }

    assert!(recording.calls.lock().unwrap().is_empty());
  }

  #[test]
  fn gzip_detection_by_magic_bytes() {
    assert!(is_gzip(&[0x1f, 0x8b, 0x08, 0x00]));
    // A plain tar archive starts with the first entry's header, not the
    // gzip magic.
    assert!(!is_gzip(b"pax_global_header"));
    assert!(!is_gzip(&[]));
  }

  #[tokio::test]
  async fn upload_of_missing_artifact_fails() {
    let (local, _t) = cache();
    let remote = HttpRemoteCache::new("http://127.0.0.1:9");
    let result = remote.upload(&local, &[artifact("c/a")]).await;
    assert!(matches!(result, Err(CacheError::MissingArtifact(_))));
  }

  #[tokio::test]
  async fn existing_packages_with_empty_input_skips_network() {
    // Port 9 (discard) is not listening; an actual request would error.
    let remote = HttpRemoteCache::new("http://127.0.0.1:9/");
    let result = remote.existing_packages(&[]).await.unwrap();
    assert!(result.is_empty());
  }
}
