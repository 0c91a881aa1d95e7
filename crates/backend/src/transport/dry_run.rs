//! Transport that logs instead of delivering.

use std::{
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Transport, TransportError, TransportEvent, TransportFactory};
use crate::domain::client::{ChatId, ClientId};

#[derive(Debug)]
pub struct DryRunTransport {
  client_id: ClientId,
  pairing_delay: Duration,
  sent: AtomicU64,
}

impl DryRunTransport {
  pub fn new(client_id: ClientId, pairing_delay: Duration) -> Self {
    Self {
      client_id,
      pairing_delay,
      sent: AtomicU64::new(0),
    }
  }

  /// Number of text and attachment sends accepted so far
  pub fn sent(&self) -> u64 {
    self.sent.load(Ordering::Relaxed)
  }
}

#[async_trait]
impl Transport for DryRunTransport {
  async fn initialize(&self, events: mpsc::Sender<TransportEvent>) -> Result<(), TransportError> {
    if self.pairing_delay.is_zero() {
      events
        .send(TransportEvent::Ready)
        .await
        .map_err(|_| TransportError::Init("session dropped before ready".to_string()))?;
      return Ok(());
    }

    let challenge = format!("dry-run-pairing:{}", self.client_id);
    events
      .send(TransportEvent::PairingChallenge(challenge))
      .await
      .map_err(|_| TransportError::Init("session dropped during pairing".to_string()))?;

    // Pairing completes in the background, like a real device link
    let delay = self.pairing_delay;
    let client_id = self.client_id.clone();
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      debug!(client_id = %client_id, "Dry-run pairing complete");
      let _ = events.send(TransportEvent::Ready).await;
    });

    Ok(())
  }

  async fn send_text(&self, chat: &ChatId, text: &str) -> Result<(), TransportError> {
    self.sent.fetch_add(1, Ordering::Relaxed);
    info!(client_id = %self.client_id, chat = %chat, chars = text.chars().count(), "dry-run: text message");
    Ok(())
  }

  async fn send_attachment(&self, chat: &ChatId, file: &Path) -> Result<(), TransportError> {
    let meta = tokio::fs::metadata(file)
      .await
      .map_err(|e| TransportError::Attachment(format!("{}: {}", file.display(), e)))?;
    self.sent.fetch_add(1, Ordering::Relaxed);
    info!(
      client_id = %self.client_id,
      chat = %chat,
      file = %file.display(),
      bytes = meta.len(),
      "dry-run: attachment"
    );
    Ok(())
  }
}

#[derive(Debug, Clone)]
pub struct DryRunFactory {
  pairing_delay: Duration,
}

impl DryRunFactory {
  pub fn new(pairing_delay_ms: u64) -> Self {
    Self {
      pairing_delay: Duration::from_millis(pairing_delay_ms),
    }
  }
}

impl TransportFactory for DryRunFactory {
  fn create(&self, client_id: &ClientId) -> Arc<dyn Transport> {
    Arc::new(DryRunTransport::new(client_id.clone(), self.pairing_delay))
  }
}
