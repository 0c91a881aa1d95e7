//! DispatchQueue - the single process-wide FIFO of jobs and its worker
//!
//! Every ingestion source only enqueues. One worker task drains the queue and
//! runs each job to completion before starting the next, so sends are strictly
//! sequential across all tenants.
//!
//! # Worker lifecycle
//!
//! The worker-active flag lives under the same mutex as the queue. `enqueue`
//! pushes and, if no worker is active, sets the flag and spawns one while still
//! holding the lock; the worker clears the flag under the lock when it finds
//! the queue empty. So there is never more than one worker, and a job pushed
//! while the worker is finishing is never stranded.
//!
//! # Job pipeline
//!
//! ```text
//! decode ─▶ resolve session ─▶ send text ─▶ send attachment ─▶ complete source ─▶ delay
//! ```
//!
//! Failures are reported to the job's actor and logged; the worker moves on.
//! A panicking job is caught and counted as a failed job, so the worker and
//! its active flag always survive to drain the rest of the queue.

use std::{
  any::Any,
  collections::VecDeque,
  panic::AssertUnwindSafe,
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::{
  message::{Job, JobError, JobSource},
  registry::SessionRegistry,
};
use crate::domain::{
  config::DispatchConfig,
  envelope::{Envelope, TextEncoding},
};

// ============================================================================
// Internal Types
// ============================================================================

struct Queued {
  seq: u64,
  job: Job,
}

#[derive(Default)]
struct QueueState {
  jobs: VecDeque<Queued>,
  worker_active: bool,
}

/// Counters exposed for status output and tests
#[derive(Debug, Default)]
struct Counters {
  enqueued: AtomicU64,
  succeeded: AtomicU64,
  failed: AtomicU64,
  workers_started: AtomicU64,
}

/// Snapshot of queue counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
  pub enqueued: u64,
  pub succeeded: u64,
  pub failed: u64,
  pub workers_started: u64,
  pub pending: usize,
}

struct Inner {
  state: Mutex<QueueState>,
  sessions: Arc<SessionRegistry>,
  chat_suffix: String,
  post_job_delay: Duration,
  counters: Counters,
  idle: Notify,
}

impl Inner {
  fn lock(&self) -> MutexGuard<'_, QueueState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

// ============================================================================
// DispatchQueue
// ============================================================================

/// Handle to the shared queue; cheap to clone
#[derive(Clone)]
pub struct DispatchQueue {
  inner: Arc<Inner>,
}

impl DispatchQueue {
  pub fn new(sessions: Arc<SessionRegistry>, config: &DispatchConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        state: Mutex::new(QueueState::default()),
        sessions,
        chat_suffix: config.chat_suffix.clone(),
        post_job_delay: Duration::from_millis(config.post_job_delay_ms),
        counters: Counters::default(),
        idle: Notify::new(),
      }),
    }
  }

  /// Append a job and make sure a worker is draining. Returns the job's
  /// sequence number.
  pub fn enqueue(&self, job: Job) -> u64 {
    let seq = self.inner.counters.enqueued.fetch_add(1, Ordering::SeqCst) + 1;
    debug!(
      job = seq,
      client_id = %job.client_id,
      source = %job.source.label(),
      bytes = job.content.len(),
      "Job enqueued"
    );

    let mut state = self.inner.lock();
    state.jobs.push_back(Queued { seq, job });
    if !state.worker_active {
      state.worker_active = true;
      self.inner.counters.workers_started.fetch_add(1, Ordering::SeqCst);
      tokio::spawn(drain(self.inner.clone()));
    }

    seq
  }

  pub fn stats(&self) -> DispatchStats {
    let c = &self.inner.counters;
    DispatchStats {
      enqueued: c.enqueued.load(Ordering::SeqCst),
      succeeded: c.succeeded.load(Ordering::SeqCst),
      failed: c.failed.load(Ordering::SeqCst),
      workers_started: c.workers_started.load(Ordering::SeqCst),
      pending: self.inner.lock().jobs.len(),
    }
  }

  pub fn is_active(&self) -> bool {
    self.inner.lock().worker_active
  }

  /// Wait until the queue is empty and no worker is running.
  pub async fn idle(&self) {
    loop {
      let notified = self.inner.idle.notified();
      if !self.is_active() {
        return;
      }
      notified.await;
    }
  }
}

impl std::fmt::Debug for DispatchQueue {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DispatchQueue").field("stats", &self.stats()).finish()
  }
}

// ============================================================================
// Worker
// ============================================================================

/// Pop the next job, or clear the active flag if there is none.
fn next_job(inner: &Inner) -> Option<Queued> {
  let mut state = inner.lock();
  let next = state.jobs.pop_front();
  if next.is_none() {
    state.worker_active = false;
  }
  next
}

async fn drain(inner: Arc<Inner>) {
  debug!("Dispatch worker started");

  while let Some(Queued { seq, job }) = next_job(&inner) {
    let reporter = job.reporter.clone();
    let label = job.source.label();
    let queued_ms = (Utc::now() - job.enqueued_at).num_milliseconds();
    if reporter.is_closed() {
      debug!(job = seq, client_id = %job.client_id, "Actor disconnected, progress will not be delivered");
    }

    let result = match AssertUnwindSafe(execute(&inner, &job)).catch_unwind().await {
      Ok(result) => result,
      Err(panic) => Err(JobError::Panicked(panic_message(panic.as_ref()))),
    };
    let reached_transport = match &result {
      Ok(()) => {
        inner.counters.succeeded.fetch_add(1, Ordering::SeqCst);
        info!(job = seq, client_id = %job.client_id, source = %label, queued_ms, "Job complete");
        true
      }
      Err(e) => {
        inner.counters.failed.fetch_add(1, Ordering::SeqCst);
        error!(job = seq, client_id = %job.client_id, source = %label, queued_ms, error = %e, "Job failed");
        reporter.log(format!("Error processing {}: {}", label, e));
        e.reached_transport()
      }
    };

    if reached_transport && !inner.post_job_delay.is_zero() {
      tokio::time::sleep(inner.post_job_delay).await;
    }
  }

  debug!("Dispatch worker idle");
  inner.idle.notify_waiters();
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(s) = panic.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = panic.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}

async fn execute(inner: &Inner, job: &Job) -> Result<(), JobError> {
  let reporter = &job.reporter;

  let encoding = TextEncoding::detect(&job.content);
  if encoding == TextEncoding::Utf16Le {
    reporter.log(format!("Detected {} encoding", encoding.label()));
  }
  let envelope = Envelope::decode(&job.content)?;

  let session = inner
    .sessions
    .get(&job.client_id)
    .filter(|s| s.is_ready())
    .ok_or_else(|| JobError::SessionNotReady(job.client_id.clone()))?;
  let transport = session.transport();

  let chat = envelope.chat_id(&inner.chat_suffix);
  transport.send_text(&chat, &envelope.message_text).await?;
  reporter.log(format!("Message sent to {}", envelope.recipient()));

  if let Some(attachment) = &envelope.attachment_path {
    if tokio::fs::try_exists(attachment).await.unwrap_or(false) {
      transport.send_attachment(&chat, attachment).await?;
      reporter.log(format!("Attachment sent to {}", envelope.recipient()));
    } else {
      warn!(client_id = %job.client_id, path = %attachment.display(), "Attachment not found, skipping");
      reporter.log(format!("Attachment not found: {}", attachment.display()));
    }
  }

  if let JobSource::Watched { path, processed_dir } = &job.source {
    let dest = move_to_processed(path, processed_dir)
      .await
      .map_err(|source| JobError::Completion {
        path: path.clone(),
        source,
      })?;
    reporter.log(format!("Moved {} to {}", job.source.label(), dest.display()));
  }

  Ok(())
}

/// Move `path` into `dir`, overwriting any file of the same name.
///
/// Creates `dir` if needed and falls back to copy + remove when a rename is
/// not possible (e.g. across filesystems).
pub async fn move_to_processed(path: &Path, dir: &Path) -> std::io::Result<PathBuf> {
  tokio::fs::create_dir_all(dir).await?;
  let name = path
    .file_name()
    .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"))?;
  let dest = dir.join(name);

  if let Err(e) = tokio::fs::rename(path, &dest).await {
    debug!(from = %path.display(), to = %dest.display(), error = %e, "Rename failed, copying instead");
    tokio::fs::copy(path, &dest).await?;
    tokio::fs::remove_file(path).await?;
  }

  Ok(dest)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_move_overwrites_and_creates_dir() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let source = tmp.path().join("0042.xml");
    let processed = tmp.path().join("done").join("nested");

    tokio::fs::create_dir_all(&processed).await.expect("mkdir");
    tokio::fs::write(processed.join("0042.xml"), "old").await.expect("write old");
    tokio::fs::write(&source, "new").await.expect("write new");

    let dest = move_to_processed(&source, &processed).await.expect("move");
    assert_eq!(dest, processed.join("0042.xml"));
    assert_eq!(tokio::fs::read_to_string(&dest).await.expect("read"), "new");
    assert!(!source.exists());

    let fresh_dir = tmp.path().join("fresh");
    tokio::fs::write(&source, "again").await.expect("write");
    move_to_processed(&source, &fresh_dir).await.expect("move into missing dir");
    assert!(fresh_dir.join("0042.xml").exists());
  }
}
