//! SessionActor - drives one client id's transport lifecycle
//!
//! Each session owns the transport created for its client id and a task that
//! consumes the transport's [`TransportEvent`]s. The resulting status is
//! published on a `watch` channel so any number of connections can observe it
//! and the dispatch worker can check readiness without messaging the task.
//!
//! ```text
//! Initializing ──pairing──▶ AwaitingPairing ──ready──▶ Ready
//!      └────────────────────────ready─────────────────────┘
//! ```
//!
//! `Ready` is terminal. Sessions live until the process shuts down.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  domain::client::ClientId,
  transport::{Transport, TransportEvent},
};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
  Initializing,
  AwaitingPairing,
  Ready,
}

/// Snapshot published to observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
  pub state: SessionState,
  /// Latest pairing artifact while awaiting pairing
  pub pairing: Option<String>,
  /// Last auth failure or init error reported by the transport
  pub last_error: Option<String>,
}

impl Default for SessionStatus {
  fn default() -> Self {
    Self {
      state: SessionState::Initializing,
      pairing: None,
      last_error: None,
    }
  }
}

impl SessionStatus {
  /// Apply a transport event. Returns false when the event was ignored.
  fn apply(&mut self, event: TransportEvent) -> bool {
    match (self.state, event) {
      (SessionState::Ready, TransportEvent::PairingChallenge(_)) => false,
      (_, TransportEvent::PairingChallenge(payload)) => {
        self.state = SessionState::AwaitingPairing;
        self.pairing = Some(payload);
        true
      }
      (_, TransportEvent::Ready) => {
        self.state = SessionState::Ready;
        self.pairing = None;
        true
      }
      (_, TransportEvent::AuthFailure(message)) => {
        self.last_error = Some(message);
        true
      }
    }
  }
}

// ============================================================================
// Handle
// ============================================================================

/// Cheap-to-clone view of a running session
#[derive(Clone)]
pub struct SessionHandle {
  client_id: ClientId,
  transport: Arc<dyn Transport>,
  status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
  pub fn client_id(&self) -> &ClientId {
    &self.client_id
  }

  pub fn transport(&self) -> &Arc<dyn Transport> {
    &self.transport
  }

  pub fn state(&self) -> SessionState {
    self.status.borrow().state
  }

  pub fn is_ready(&self) -> bool {
    self.state() == SessionState::Ready
  }

  /// New receiver for status changes (sees the current value first)
  pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
    self.status.clone()
  }
}

impl std::fmt::Debug for SessionHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SessionHandle")
      .field("client_id", &self.client_id)
      .field("state", &self.state())
      .finish()
  }
}

// ============================================================================
// Actor
// ============================================================================

pub struct SessionActor {
  client_id: ClientId,
  events: mpsc::Receiver<TransportEvent>,
  status: watch::Sender<SessionStatus>,
  cancel: CancellationToken,
}

impl SessionActor {
  /// Start the session: spawn transport initialization and the event loop.
  pub fn spawn(client_id: ClientId, transport: Arc<dyn Transport>, cancel: CancellationToken) -> SessionHandle {
    let (event_tx, event_rx) = mpsc::channel(16);
    let (status_tx, status_rx) = watch::channel(SessionStatus::default());

    let init_transport = transport.clone();
    let init_status = status_tx.clone();
    let init_id = client_id.clone();
    tokio::spawn(async move {
      if let Err(e) = init_transport.initialize(event_tx).await {
        warn!(client_id = %init_id, error = %e, "Transport initialization failed");
        init_status.send_modify(|s| s.last_error = Some(e.to_string()));
      }
    });

    let actor = Self {
      client_id: client_id.clone(),
      events: event_rx,
      status: status_tx,
      cancel,
    };
    tokio::spawn(actor.run());

    info!(client_id = %client_id, "Session created");

    SessionHandle {
      client_id,
      transport,
      status: status_rx,
    }
  }

  async fn run(mut self) {
    loop {
      tokio::select! {
        biased;

        _ = self.cancel.cancelled() => {
          debug!(client_id = %self.client_id, "Session task shutting down");
          break;
        }

        event = self.events.recv() => {
          match event {
            Some(event) => self.handle(event),
            None => {
              // Transport dropped its sender; the last status stays visible
              debug!(client_id = %self.client_id, "Transport event stream closed");
              break;
            }
          }
        }
      }
    }
  }

  fn handle(&self, event: TransportEvent) {
    let label = match &event {
      TransportEvent::PairingChallenge(_) => "pairing_challenge",
      TransportEvent::Ready => "ready",
      TransportEvent::AuthFailure(_) => "auth_failure",
    };
    if let TransportEvent::AuthFailure(message) = &event {
      warn!(client_id = %self.client_id, message = %message, "Transport auth failure");
    }

    let mut applied = false;
    self.status.send_if_modified(|status| {
      applied = status.apply(event);
      applied
    });

    if applied {
      info!(client_id = %self.client_id, event = label, state = ?self.status.borrow().state, "Session event");
    } else {
      warn!(client_id = %self.client_id, event = label, "Ignoring pairing challenge for ready session");
    }
  }
}
