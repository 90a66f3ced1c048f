//! Serve/save side effects of a successful build.
//!
//! Both act on the finished artifact archive in the local cache: save copies
//! it verbatim to a destination path, serve extracts it to a scratch
//! directory and exposes the contents over a static file server until
//! cancelled. Watch mode cancels and restarts them on every successful
//! rebuild; a failed rebuild leaves the previous ones untouched.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use axum::Router;
use owo_colors::OwoColorize;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tracing::error;

use mason_lib::cache::{ArtifactId, FilesystemCache};
use mason_lib::util::archive::unpack_archive;

pub struct SideEffects {
  serve_addr: Option<String>,
  save_path: Option<PathBuf>,
  serve_task: Option<JoinHandle<()>>,
}

impl SideEffects {
  pub fn new(serve_addr: Option<String>, save_path: Option<PathBuf>) -> Self {
    SideEffects {
      serve_addr,
      save_path,
      serve_task: None,
    }
  }

  fn is_configured(&self) -> bool {
    self.serve_addr.is_some() || self.save_path.is_some()
  }

  /// Cancel any previous cycle's side effects and start new ones against
  /// the given artifact.
  pub async fn restart(&mut self, cache: &FilesystemCache, id: &ArtifactId) -> Result<()> {
    if !self.is_configured() {
      return Ok(());
    }

    self.cancel();

    let (archive, exists) = cache.location(id);
    if !exists {
      bail!(
        "build result for {} is not in the local cache despite just being built; something is wrong with the cache",
        id
      );
    }

    if let Some(save_path) = &self.save_path {
      std::fs::copy(&archive, save_path)
        .with_context(|| format!("cannot save build result to {}", save_path.display()))?;
      println!("saving build result to {}", save_path.display().cyan());
    }

    if let Some(addr) = &self.serve_addr {
      let addr = addr.clone();
      let archive = archive.clone();
      self.serve_task = Some(tokio::spawn(async move {
        if let Err(e) = serve_artifact(addr, archive).await {
          error!(error = %e, "cannot serve build result");
        }
      }));
    }

    Ok(())
  }

  /// Abort the running serve task, if any. The extracted scratch directory
  /// is cleaned up when the task is dropped.
  pub fn cancel(&mut self) {
    if let Some(task) = self.serve_task.take() {
      task.abort();
    }
  }
}

impl Drop for SideEffects {
  fn drop(&mut self) {
    self.cancel();
  }
}

async fn serve_artifact(addr: String, archive: PathBuf) -> Result<()> {
  let dir = tempfile::Builder::new().prefix("mason-serve-").tempdir()?;
  unpack_archive(&archive, dir.path()).with_context(|| format!("cannot extract {}", archive.display()))?;

  let listener = tokio::net::TcpListener::bind(&addr)
    .await
    .with_context(|| format!("cannot bind {}", addr))?;

  println!("serving build result on {}", addr.cyan());

  let app = Router::new().fallback_service(ServeDir::new(dir.path()));
  axum::serve(listener, app).await.context("static file server failed")?;

  drop(dir);
  Ok(())
}
