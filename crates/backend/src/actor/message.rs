//! Dispatch jobs and their failure modes

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::handle::Reporter;
use crate::{
  domain::{client::ClientId, envelope::DecodeError},
  transport::TransportError,
};

// ============================================================================
// Job
// ============================================================================

/// Where a job's document came from, and what to do with it on success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
  /// A file picked up by a watch source; moved into `processed_dir` on success
  Watched { path: PathBuf, processed_dir: PathBuf },
  /// A document uploaded over the connection; nothing to clean up
  Uploaded { name: String },
}

impl JobSource {
  /// Short human-readable name for logs
  pub fn label(&self) -> String {
    match self {
      JobSource::Watched { path, .. } => path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string()),
      JobSource::Uploaded { name } => name.clone(),
    }
  }
}

/// One document waiting to be dispatched
///
/// Consumed exactly once by the dispatch worker.
#[derive(Debug)]
pub struct Job {
  pub client_id: ClientId,
  pub source: JobSource,
  pub content: Vec<u8>,
  pub enqueued_at: DateTime<Utc>,
  /// Progress and failures go back to the actor that produced the job
  pub reporter: Reporter,
}

impl Job {
  pub fn new(client_id: ClientId, source: JobSource, content: Vec<u8>, reporter: Reporter) -> Self {
    Self {
      client_id,
      source,
      content,
      enqueued_at: Utc::now(),
      reporter,
    }
  }
}

// ============================================================================
// Errors
// ============================================================================

/// Job-level failures. None of these stop the worker.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
  #[error("Session for {0} is not ready")]
  SessionNotReady(ClientId),

  #[error("Could not decode document: {0}")]
  Decode(#[from] DecodeError),

  #[error("Transport error: {0}")]
  Transport(#[from] TransportError),

  #[error("Job panicked: {0}")]
  Panicked(String),

  #[error("Sent, but could not move {path} to processed: {source}")]
  Completion {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

impl JobError {
  /// Whether the job got as far as handing something to the transport.
  /// A panic may have happened mid-send, so it counts.
  pub fn reached_transport(&self) -> bool {
    matches!(
      self,
      JobError::Transport(_) | JobError::Completion { .. } | JobError::Panicked(_)
    )
  }
}
