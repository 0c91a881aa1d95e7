//! Messaging transport contract
//!
//! The transport owns the connection to the chat network (device pairing,
//! protocol, delivery). This crate only consumes its contract: it starts a
//! transport per client id, listens to its typed lifecycle events, and asks it
//! to send text and attachments.
//!
//! Lifecycle events are delivered over an `mpsc` channel handed to
//! [`Transport::initialize`], so the owning session consumes them as messages
//! instead of registering callbacks.

mod dry_run;

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use dry_run::{DryRunFactory, DryRunTransport};

use crate::domain::{
  client::{ChatId, ClientId},
  config::{TransportBackend, TransportConfig},
};

/// Lifecycle events emitted by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
  /// Out-of-band device-linking artifact (rendered as a QR code by the actor)
  PairingChallenge(String),
  /// Paired and able to send
  Ready,
  /// Pairing or restored credentials were rejected
  AuthFailure(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
  #[error("Transport initialization failed: {0}")]
  Init(String),
  #[error("Send failed: {0}")]
  Send(String),
  #[error("Attachment unreadable: {0}")]
  Attachment(String),
}

/// One tenant's connection to the messaging network
#[async_trait]
pub trait Transport: Send + Sync {
  /// Start connecting. Lifecycle events are pushed to `events` for as long
  /// as the transport lives; returning does not imply readiness.
  async fn initialize(&self, events: mpsc::Sender<TransportEvent>) -> Result<(), TransportError>;

  async fn send_text(&self, chat: &ChatId, text: &str) -> Result<(), TransportError>;

  async fn send_attachment(&self, chat: &ChatId, file: &Path) -> Result<(), TransportError>;
}

/// Creates the transport for a client id (once per client id per process)
pub trait TransportFactory: Send + Sync {
  fn create(&self, client_id: &ClientId) -> Arc<dyn Transport>;
}

/// Pick the transport factory for the configured backend.
pub fn factory_from_config(config: &TransportConfig) -> Arc<dyn TransportFactory> {
  match config.backend {
    TransportBackend::DryRun => Arc::new(DryRunFactory::new(config.pairing_delay_ms)),
  }
}
