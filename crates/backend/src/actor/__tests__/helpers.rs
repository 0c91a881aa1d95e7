//! Test helpers for actor integration tests.
//!
//! Provides `DispatchTestContext`, which wires a `SessionRegistry` and
//! `DispatchQueue` to a `RecordingTransport` so tests can assert exactly what
//! was sent, in which order, and how many sends overlapped.

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{
  actor::{
    DispatchQueue, Reporter, SessionRegistry, SessionState,
    message::{Job, JobSource},
  },
  domain::{
    client::{ChatId, ClientId},
    config::DispatchConfig,
  },
  ipc::ServerEvent,
  transport::{Transport, TransportError, TransportEvent, TransportFactory},
};

// ============================================================================
// Recording transport
// ============================================================================

/// One call observed by the recording transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
  Text { chat: String, text: String },
  Attachment { chat: String, path: PathBuf },
}

/// Transport that records sends and tracks how many overlap
pub struct RecordingTransport {
  sent: Mutex<Vec<Sent>>,
  sent_at: Mutex<Vec<Instant>>,
  in_flight: AtomicUsize,
  max_in_flight: AtomicUsize,
  send_delay: Duration,
  becomes_ready: bool,
  panic_on: Option<&'static str>,
}

impl RecordingTransport {
  pub fn new(send_delay: Duration, becomes_ready: bool) -> Arc<Self> {
    Arc::new(Self::build(send_delay, becomes_ready, None))
  }

  /// Ready transport whose `send_text` panics for exactly `text`
  pub fn panicking_on(text: &'static str) -> Arc<Self> {
    Arc::new(Self::build(Duration::ZERO, true, Some(text)))
  }

  fn build(send_delay: Duration, becomes_ready: bool, panic_on: Option<&'static str>) -> Self {
    Self {
      sent: Mutex::new(Vec::new()),
      sent_at: Mutex::new(Vec::new()),
      in_flight: AtomicUsize::new(0),
      max_in_flight: AtomicUsize::new(0),
      send_delay,
      becomes_ready,
      panic_on,
    }
  }

  /// When each text send was recorded
  pub fn text_times(&self) -> Vec<Instant> {
    self.sent_at.lock().expect("sent_at lock").clone()
  }

  pub fn sent(&self) -> Vec<Sent> {
    self.sent.lock().expect("sent lock").clone()
  }

  pub fn texts(&self) -> Vec<String> {
    self
      .sent()
      .into_iter()
      .filter_map(|s| match s {
        Sent::Text { text, .. } => Some(text),
        Sent::Attachment { .. } => None,
      })
      .collect()
  }

  pub fn max_in_flight(&self) -> usize {
    self.max_in_flight.load(Ordering::SeqCst)
  }

  async fn record(&self, sent: Sent) {
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    if !self.send_delay.is_zero() {
      tokio::time::sleep(self.send_delay).await;
    }
    self.sent.lock().expect("sent lock").push(sent);
    self.in_flight.fetch_sub(1, Ordering::SeqCst);
  }
}

#[async_trait]
impl Transport for RecordingTransport {
  async fn initialize(&self, events: mpsc::Sender<TransportEvent>) -> Result<(), TransportError> {
    if self.becomes_ready {
      events
        .send(TransportEvent::Ready)
        .await
        .map_err(|_| TransportError::Init("session gone".to_string()))?;
    } else {
      events
        .send(TransportEvent::PairingChallenge("scan-me".to_string()))
        .await
        .map_err(|_| TransportError::Init("session gone".to_string()))?;
    }
    Ok(())
  }

  async fn send_text(&self, chat: &ChatId, text: &str) -> Result<(), TransportError> {
    if self.panic_on == Some(text) {
      panic!("transport bug while sending {:?}", text);
    }
    self.sent_at.lock().expect("sent_at lock").push(Instant::now());
    self
      .record(Sent::Text {
        chat: chat.to_string(),
        text: text.to_string(),
      })
      .await;
    Ok(())
  }

  async fn send_attachment(&self, chat: &ChatId, file: &Path) -> Result<(), TransportError> {
    self
      .record(Sent::Attachment {
        chat: chat.to_string(),
        path: file.to_path_buf(),
      })
      .await;
    Ok(())
  }
}

/// Hands out the same recording transport for every client id
pub struct RecordingFactory(pub Arc<RecordingTransport>);

impl TransportFactory for RecordingFactory {
  fn create(&self, _client_id: &ClientId) -> Arc<dyn Transport> {
    self.0.clone()
  }
}

// ============================================================================
// Context
// ============================================================================

pub struct DispatchTestContext {
  pub transport: Arc<RecordingTransport>,
  pub sessions: Arc<SessionRegistry>,
  pub queue: DispatchQueue,
  pub reporter: Reporter,
  pub events: mpsc::Receiver<ServerEvent>,
  pub cancel: CancellationToken,
}

impl DispatchTestContext {
  pub fn new() -> Self {
    Self::with_transport(RecordingTransport::new(Duration::ZERO, true))
  }

  pub fn with_transport(transport: Arc<RecordingTransport>) -> Self {
    Self::with_post_job_delay(transport, 0)
  }

  pub fn with_post_job_delay(transport: Arc<RecordingTransport>, post_job_delay_ms: u64) -> Self {
    let cancel = CancellationToken::new();
    let sessions = Arc::new(SessionRegistry::new(
      Arc::new(RecordingFactory(transport.clone())),
      cancel.child_token(),
    ));
    let config = DispatchConfig {
      post_job_delay_ms,
      ..Default::default()
    };
    let queue = DispatchQueue::new(sessions.clone(), &config);
    let (tx, events) = mpsc::channel(1024);

    Self {
      transport,
      sessions,
      queue,
      reporter: Reporter::new(tx),
      events,
      cancel,
    }
  }

  /// Create the session for `raw` and wait until it reaches `state`.
  pub async fn session(&self, raw: &str, state: SessionState) -> ClientId {
    let client_id = ClientId::new(raw).expect("client id");
    let handle = self.sessions.get_or_create(&client_id);
    let mut rx = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| s.state == state))
      .await
      .expect("session state in time")
      .expect("session alive");
    client_id
  }

  pub fn uploaded(&self, client_id: &ClientId, name: &str, content: impl Into<Vec<u8>>) -> Job {
    Job::new(
      client_id.clone(),
      JobSource::Uploaded { name: name.to_string() },
      content.into(),
      self.reporter.clone(),
    )
  }

  pub fn watched(&self, client_id: &ClientId, path: &Path, processed: &Path) -> Job {
    let content = std::fs::read(path).expect("read watched file");
    Job::new(
      client_id.clone(),
      JobSource::Watched {
        path: path.to_path_buf(),
        processed_dir: processed.to_path_buf(),
      },
      content,
      self.reporter.clone(),
    )
  }

  pub async fn drain(&self) {
    tokio::time::timeout(Duration::from_secs(5), self.queue.idle())
      .await
      .expect("queue drained in time");
  }

  /// All log lines reported so far
  pub fn logs(&mut self) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(event) = self.events.try_recv() {
      if let ServerEvent::Log { message } = event {
        lines.push(message);
      }
    }
    lines
  }
}

impl Drop for DispatchTestContext {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

/// Build an envelope document.
pub fn envelope_xml(country_code: &str, mobile: &str, text: &str, path: Option<&Path>) -> String {
  let path = path
    .map(|p| format!("\n  <PATH>{}</PATH>", p.display()))
    .unwrap_or_default();
  format!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<ENVELOP>\n  <COUNTRYCODE>{}</COUNTRYCODE>\n  <MOBILE>{}</MOBILE>\n  <TEXT>{}</TEXT>{}\n</ENVELOP>\n",
    country_code, mobile, text, path
  )
}

/// Encode text as UTF-16 LE with a byte-order mark.
pub fn utf16le(text: &str) -> Vec<u8> {
  let mut bytes = vec![0xFF, 0xFE];
  for unit in text.encode_utf16() {
    bytes.extend_from_slice(&unit.to_le_bytes());
  }
  bytes
}
