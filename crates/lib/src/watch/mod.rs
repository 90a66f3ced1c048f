//! Source change watching for incremental rebuilds.
//!
//! [`watch_sources`] registers a filesystem watcher over the source files of
//! the given packages and exposes two channels: debounced change events, and
//! fatal watcher errors. Bursts of file events are coalesced — the change
//! event fires once the filesystem has been quiet for the debounce interval.
//! A fatal error on the second channel means the watch mechanism itself
//! died; everything else is invisible to the consumer.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::workspace::Package;

/// A debounced batch of source changes.
#[derive(Debug)]
pub struct ChangeEvent {
  /// The changed source files, sorted and deduplicated.
  pub paths: Vec<PathBuf>,
}

/// Fatal failure of the watch mechanism.
#[derive(Debug, Error)]
pub enum WatchError {
  #[error("file watcher failed: {0}")]
  Notify(#[from] notify::Error),
}

/// A running source watcher. Dropping it stops the underlying filesystem
/// watcher and closes both channels.
pub struct SourceWatcher {
  _watcher: RecommendedWatcher,
  /// Debounced change events.
  pub events: mpsc::UnboundedReceiver<ChangeEvent>,
  /// Fatal watcher errors.
  pub errors: mpsc::UnboundedReceiver<WatchError>,
}

/// Watch the source files of `packages`.
///
/// Events for paths that are not sources of any given package are ignored.
/// Must be called within a Tokio runtime; the debouncer runs as a spawned
/// task.
pub fn watch_sources(packages: &[Package], debounce: Duration) -> Result<SourceWatcher, WatchError> {
  let files: HashSet<PathBuf> = packages.iter().flat_map(|p| p.sources.iter().cloned()).collect();
  let dirs: BTreeSet<PathBuf> = files
    .iter()
    .filter_map(|f| f.parent().map(|p| p.to_path_buf()))
    .collect();

  let (raw_tx, raw_rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();
  let (error_tx, errors) = mpsc::unbounded_channel::<WatchError>();
  let (event_tx, events) = mpsc::unbounded_channel::<ChangeEvent>();

  let watched = files.clone();
  let mut watcher = RecommendedWatcher::new(
    move |result: Result<Event, notify::Error>| match result {
      Ok(event) => {
        let hits: Vec<PathBuf> = event.paths.into_iter().filter(|p| watched.contains(p)).collect();
        if !hits.is_empty() {
          let _ = raw_tx.send(hits);
        }
      }
      Err(e) => {
        let _ = error_tx.send(WatchError::Notify(e));
      }
    },
    Config::default(),
  )?;

  for dir in &dirs {
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
  }

  debug!(files = files.len(), dirs = dirs.len(), "watching sources");

  tokio::spawn(debounce_loop(raw_rx, event_tx, debounce));

  Ok(SourceWatcher {
    _watcher: watcher,
    events,
    errors,
  })
}

/// Coalesce raw file events into one change event per quiet period.
async fn debounce_loop(
  mut raw: mpsc::UnboundedReceiver<Vec<PathBuf>>,
  out: mpsc::UnboundedSender<ChangeEvent>,
  debounce: Duration,
) {
  loop {
    let Some(first) = raw.recv().await else {
      return;
    };

    let mut paths: HashSet<PathBuf> = first.into_iter().collect();
    let mut closed = false;
    loop {
      match tokio::time::timeout(debounce, raw.recv()).await {
        Ok(Some(more)) => paths.extend(more),
        Ok(None) => {
          closed = true;
          break;
        }
        Err(_) => break,
      }
    }

    let mut sorted: Vec<PathBuf> = paths.into_iter().collect();
    sorted.sort();
    debug!(changed = sorted.len(), "source change detected");
    if out.send(ChangeEvent { paths: sorted }).is_err() || closed {
      return;
    }
  }
}
