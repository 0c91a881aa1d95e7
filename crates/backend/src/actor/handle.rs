//! Handles for talking back to a connected actor
//!
//! Each connection runs a writer task that owns the socket's sink. Everything
//! else (session forwarding, watch source, dispatch worker) reaches the actor
//! through a cloned [`Reporter`] wrapping that task's channel.

use tokio::sync::mpsc;
use tracing::trace;

use crate::ipc::ServerEvent;

// ============================================================================
// Reporter
// ============================================================================

/// Cheap-to-clone sender of outbound events to one connection
#[derive(Clone, Debug)]
pub struct Reporter {
  tx: mpsc::Sender<ServerEvent>,
}

impl Reporter {
  pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
    Self { tx }
  }

  /// Send an event, waiting for buffer space.
  pub async fn send(&self, event: ServerEvent) -> Result<(), SendError> {
    self.tx.send(event).await.map_err(|_| SendError::ActorGone)
  }

  /// Push a progress line without waiting.
  ///
  /// Log lines are best effort: a full buffer or a closed connection drops
  /// the line (it is still in the tracing output).
  pub fn log(&self, message: impl Into<String>) {
    let message = message.into();
    if self.tx.try_send(ServerEvent::Log { message }).is_err() {
      trace!("Dropped log line for disconnected or slow actor");
    }
  }

  pub fn is_closed(&self) -> bool {
    self.tx.is_closed()
  }
}

// ============================================================================
// Errors
// ============================================================================

/// Error when sending to an actor
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendError {
  #[error("Actor has disconnected")]
  ActorGone,
}
