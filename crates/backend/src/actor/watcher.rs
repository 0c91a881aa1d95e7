//! WatchSource - turns documents dropped into a folder into dispatch jobs
//!
//! Bridges notify's sync callback into the async world the same way for every
//! watcher: the callback `blocking_send`s into a channel and an async task
//! consumes it.
//!
//! # Stability window
//!
//! Producers write documents over a network share or a slow exporter, so a
//! create event does not mean the file is complete. Candidate files sit in a
//! pending map and are re-stat'ed every poll interval; a file whose size and
//! mtime have not changed for the stability threshold is read and enqueued.
//!
//! # Filtering
//!
//! - Only regular files with the configured extension (case-insensitive)
//! - Hidden files (leading `.`) are skipped
//! - Non-recursive, so a processed folder nested inside the source is never
//!   re-read
//!
//! Each path is emitted once until it disappears from the folder (normally
//! because the worker moved it to the processed folder).
//!
//! # Lifecycle
//!
//! Runs until its `CancellationToken` fires (stop, replace, or disconnect) or
//! the notify channel closes.

use std::{
  collections::{HashMap, HashSet},
  path::{Path, PathBuf},
  time::{Duration, Instant, SystemTime},
};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
  dispatch::DispatchQueue,
  handle::Reporter,
  message::{Job, JobSource},
};
use crate::domain::{client::ClientId, config::WatcherConfig};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
  #[error("Source folder does not exist: {0}")]
  MissingSource(PathBuf),

  #[error("Failed to initialize watcher: {0}")]
  Init(#[source] notify::Error),

  #[error("Failed to watch path: {0}")]
  Watch(#[source] notify::Error),
}

// ============================================================================
// Internal Types
// ============================================================================

/// Size and mtime used to decide whether a file is still being written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
  len: u64,
  modified: Option<SystemTime>,
}

impl Fingerprint {
  fn of(meta: &std::fs::Metadata) -> Self {
    Self {
      len: meta.len(),
      modified: meta.modified().ok(),
    }
  }
}

/// A candidate file waiting for its stability window
#[derive(Debug)]
struct PendingFile {
  fingerprint: Option<Fingerprint>,
  last_change: Instant,
}

impl PendingFile {
  fn new() -> Self {
    Self {
      fingerprint: None,
      last_change: Instant::now(),
    }
  }

  fn touch(&mut self) {
    self.last_change = Instant::now();
  }
}

/// What the notify callback forwards to the event loop
pub(crate) type WatchEvent = Result<Event, notify::Error>;

/// Where to watch and where finished documents go
#[derive(Debug, Clone)]
pub struct WatchTarget {
  pub client_id: ClientId,
  pub source: PathBuf,
  pub processed: PathBuf,
}

// ============================================================================
// WatchSource
// ============================================================================

pub struct WatchSource {
  target: WatchTarget,
  extension: String,
  stability: Duration,
  poll_interval: Duration,
  include_existing: bool,
  queue: DispatchQueue,
  reporter: Reporter,
  cancel: CancellationToken,
  // The notify watcher must be held to keep it alive
  _watcher: RecommendedWatcher,
  event_rx: mpsc::Receiver<WatchEvent>,
  pending: HashMap<PathBuf, PendingFile>,
  emitted: HashSet<PathBuf>,
}

impl WatchSource {
  /// Start watching `target.source`. The task does not run until `run()`.
  pub fn new(
    target: WatchTarget,
    config: &WatcherConfig,
    queue: DispatchQueue,
    reporter: Reporter,
    cancel: CancellationToken,
  ) -> Result<Self, WatcherError> {
    let (event_tx, event_rx) = mpsc::channel(256);
    Self::with_events(target, config, queue, reporter, cancel, event_tx, event_rx)
  }

  /// Like [`new`](Self::new), with the notify bridge channel supplied by the
  /// caller. Other senders on the channel feed the same event loop.
  pub(crate) fn with_events(
    target: WatchTarget,
    config: &WatcherConfig,
    queue: DispatchQueue,
    reporter: Reporter,
    cancel: CancellationToken,
    event_tx: mpsc::Sender<WatchEvent>,
    event_rx: mpsc::Receiver<WatchEvent>,
  ) -> Result<Self, WatcherError> {
    if !target.source.is_dir() {
      return Err(WatcherError::MissingSource(target.source.clone()));
    }

    let poll_interval = Duration::from_millis(config.poll_interval_ms.max(10));

    let mut watcher = RecommendedWatcher::new(
      move |res| {
        // notify's thread; dropped if the task is gone
        let _ = event_tx.blocking_send(res);
      },
      Config::default().with_poll_interval(poll_interval),
    )
    .map_err(WatcherError::Init)?;

    watcher
      .watch(&target.source, RecursiveMode::NonRecursive)
      .map_err(WatcherError::Watch)?;

    info!(
      client_id = %target.client_id,
      source = %target.source.display(),
      processed = %target.processed.display(),
      "Watch source initialized"
    );

    Ok(Self {
      target,
      extension: config.extension.trim_start_matches('.').to_ascii_lowercase(),
      stability: Duration::from_millis(config.stability_threshold_ms),
      poll_interval,
      include_existing: config.include_existing,
      queue,
      reporter,
      cancel,
      _watcher: watcher,
      event_rx,
      pending: HashMap::new(),
      emitted: HashSet::new(),
    })
  }

  /// Create the source and spawn its task.
  pub fn spawn(
    target: WatchTarget,
    config: &WatcherConfig,
    queue: DispatchQueue,
    reporter: Reporter,
    cancel: CancellationToken,
  ) -> Result<tokio::task::JoinHandle<()>, WatcherError> {
    let source = Self::new(target, config, queue, reporter, cancel)?;
    Ok(tokio::spawn(source.run()))
  }

  pub async fn run(mut self) {
    if self.include_existing {
      self.scan_existing().await;
    }

    let mut tick = tokio::time::interval(self.poll_interval);

    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          debug!(client_id = %self.target.client_id, "Watch source cancelled");
          break;
        }

        event = self.event_rx.recv() => {
          match event {
            Some(Ok(event)) => self.process_event(event),
            // Directory-level errors are reported; watching continues
            Some(Err(e)) => {
              warn!(client_id = %self.target.client_id, error = %e, "Watcher error");
              self.reporter.log(format!("Watcher error: {}", e));
            }
            None => {
              debug!(client_id = %self.target.client_id, "Watch event channel closed");
              break;
            }
          }
        }

        _ = tick.tick() => {
          self.flush_settled().await;
        }
      }
    }

    info!(
      client_id = %self.target.client_id,
      source = %self.target.source.display(),
      pending = self.pending.len(),
      "Watch source stopped"
    );
  }

  /// Whether `path` names a document this source should pick up
  fn accepts(&self, path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
      return false;
    };
    if name.starts_with('.') {
      return false;
    }
    path
      .extension()
      .and_then(|ext| ext.to_str())
      .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
  }

  fn track(&mut self, path: &Path) {
    if self.emitted.contains(path) {
      return;
    }
    match self.pending.get_mut(path) {
      Some(pending) => pending.touch(),
      None => {
        trace!(path = %path.display(), "Tracking candidate document");
        self.pending.insert(path.to_path_buf(), PendingFile::new());
      }
    }
  }

  fn forget(&mut self, path: &Path) {
    self.pending.remove(path);
    if self.emitted.remove(path) {
      trace!(path = %path.display(), "Document left the source folder");
    }
  }

  async fn scan_existing(&mut self) {
    let mut entries = match tokio::fs::read_dir(&self.target.source).await {
      Ok(entries) => entries,
      Err(e) => {
        warn!(source = %self.target.source.display(), error = %e, "Initial scan failed");
        self.reporter.log(format!("Watcher error: {}", e));
        return;
      }
    };

    let mut found = 0usize;
    while let Ok(Some(entry)) = entries.next_entry().await {
      let path = entry.path();
      let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
      if is_file && self.accepts(&path) {
        self.track(&path);
        found += 1;
      }
    }

    debug!(client_id = %self.target.client_id, found, "Initial scan complete");
  }

  fn process_event(&mut self, event: Event) {
    match event.kind {
      EventKind::Create(_) | EventKind::Modify(_) => {
        for path in &event.paths {
          if !self.accepts(path) {
            continue;
          }
          // Renames report the old path as a modify of something that is gone
          if path.is_file() {
            self.track(path);
          } else if !path.exists() {
            self.forget(path);
          }
        }
      }
      EventKind::Remove(_) => {
        for path in &event.paths {
          self.forget(path);
        }
      }
      EventKind::Access(_) | EventKind::Any | EventKind::Other => {
        trace!(kind = ?event.kind, "Ignoring event");
      }
    }
  }

  /// Emit every pending file whose fingerprint has held for the stability window.
  async fn flush_settled(&mut self) {
    let now = Instant::now();
    let mut settled = Vec::new();
    let mut vanished = Vec::new();

    for (path, pending) in self.pending.iter_mut() {
      let current = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Fingerprint::of(&meta),
        _ => {
          vanished.push(path.clone());
          continue;
        }
      };

      if pending.fingerprint != Some(current) {
        pending.fingerprint = Some(current);
        pending.last_change = now;
      } else if now.duration_since(pending.last_change) >= self.stability {
        settled.push(path.clone());
      }
    }

    for path in vanished {
      self.pending.remove(&path);
    }

    for path in settled {
      self.pending.remove(&path);
      self.emitted.insert(path.clone());
      self.emit(path).await;
    }
  }

  async fn emit(&mut self, path: PathBuf) {
    let content = match tokio::fs::read(&path).await {
      Ok(content) => content,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "Failed to read settled document");
        self.reporter.log(format!("Could not read {}: {}", path.display(), e));
        self.emitted.remove(&path);
        return;
      }
    };

    info!(client_id = %self.target.client_id, path = %path.display(), "New document detected");
    self.reporter.log(format!("New file detected: {}", path.display()));

    let job = Job::new(
      self.target.client_id.clone(),
      JobSource::Watched {
        path,
        processed_dir: self.target.processed.clone(),
      },
      content,
      self.reporter.clone(),
    );
    self.queue.enqueue(job);
  }
}
