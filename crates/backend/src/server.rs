//! Actor-facing server.
//!
//! Accepts TCP connections speaking the JSON-lines protocol in [`crate::ipc`].
//! Each connection is one actor: it claims at most one client id at a time,
//! attaches to that id's session, and may run one watch source and submit
//! uploads. Whatever the actor started is torn down when it disconnects; the
//! session itself stays alive for the next connection.
//!
//! # Lifecycle
//!
//! 1. `Server::bind()` binds the listener (failure here is fatal to the process)
//! 2. `Server::run()` accepts connections until cancelled
//! 3. Each connection splits into a reader loop and a writer task; everything
//!    that talks back to the actor does so through a [`Reporter`]
//! 4. On disconnect: stop the watch source, stop status forwarding, release
//!    the lock

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use futures::{SinkExt, StreamExt};
use tokio::{
  net::{TcpListener, TcpStream},
  sync::{mpsc, watch},
  task::JoinHandle,
};
use tokio_util::{
  codec::{Framed, LinesCodec},
  sync::CancellationToken,
};
use tracing::{debug, error, info, trace, warn};

use crate::{
  actor::{
    DispatchQueue, Reporter, SessionRegistry, SessionState, SessionStatus,
    upload,
    watcher::{WatchSource, WatchTarget},
  },
  domain::{client::ClientId, config::WatcherConfig},
  ipc::{ClientMessage, IpcError, ServerEvent, UploadedDocument},
  lock::ExclusivityLock,
};

// ============================================================================
// Server Configuration
// ============================================================================

/// Everything a connection needs, shared across connections
pub struct ServerContext {
  pub lock: ExclusivityLock,
  pub sessions: Arc<SessionRegistry>,
  pub queue: DispatchQueue,
  pub watcher: WatcherConfig,
}

// ============================================================================
// Server
// ============================================================================

pub struct Server {
  listener: TcpListener,
  ctx: Arc<ServerContext>,
}

impl Server {
  pub async fn bind(addr: SocketAddr, ctx: ServerContext) -> Result<Self, IpcError> {
    let listener = TcpListener::bind(addr).await?;
    Ok(Self {
      listener,
      ctx: Arc::new(ctx),
    })
  }

  pub fn local_addr(&self) -> Result<SocketAddr, IpcError> {
    Ok(self.listener.local_addr()?)
  }

  /// Accept connections until the cancellation token is triggered.
  pub async fn run(self, cancel: CancellationToken) -> Result<(), IpcError> {
    info!(addr = %self.local_addr()?, "Server listening");

    loop {
      tokio::select! {
        biased;

        _ = cancel.cancelled() => {
          info!("Server shutting down (cancelled)");
          break;
        }

        result = self.listener.accept() => {
          match result {
            Ok((stream, peer)) => {
              let ctx = Arc::clone(&self.ctx);
              let cancel = cancel.child_token();
              tokio::spawn(handle_connection(stream, peer, ctx, cancel));
            }
            Err(e) => {
              error!(error = %e, "Accept error");
            }
          }
        }
      }
    }

    Ok(())
  }
}

// ============================================================================
// Connection Handler
// ============================================================================

async fn handle_connection(
  stream: TcpStream,
  peer: SocketAddr,
  ctx: Arc<ServerContext>,
  cancel: CancellationToken,
) {
  info!(peer = %peer, "Actor connected");
  let framed = Framed::new(stream, LinesCodec::new());
  let (mut sink, mut lines) = framed.split();

  let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(64);
  let writer = tokio::spawn(async move {
    while let Some(event) = event_rx.recv().await {
      if let Err(e) = write_event(&mut sink, &event).await {
        debug!(peer = %peer, error = %e, "Stopped writing to actor");
        break;
      }
    }
  });

  let mut conn = Connection::new(ctx, Reporter::new(event_tx), cancel.clone());

  loop {
    let line = tokio::select! {
      biased;

      _ = cancel.cancelled() => break,

      next = lines.next() => match next {
        Some(Ok(line)) => line,
        Some(Err(e)) => {
          warn!(peer = %peer, error = %e, "Error reading from actor");
          break;
        }
        None => break,
      },
    };

    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    match serde_json::from_str::<ClientMessage>(trimmed) {
      Ok(message) => conn.handle(message).await,
      Err(e) => {
        warn!(peer = %peer, error = %e, "Invalid message JSON");
        conn.reporter.log(format!("Invalid message: {}", e));
      }
    }
  }

  conn.close().await;
  drop(conn);

  // Queued jobs may still hold reporters; nobody is reading anymore
  writer.abort();

  info!(peer = %peer, "Actor disconnected");
}

async fn write_event<S>(sink: &mut S, event: &ServerEvent) -> Result<(), IpcError>
where
  S: futures::Sink<String, Error = tokio_util::codec::LinesCodecError> + Unpin,
{
  let json = serde_json::to_string(event)?;
  sink.send(json).await?;
  Ok(())
}

/// Per-connection state
struct Connection {
  ctx: Arc<ServerContext>,
  reporter: Reporter,
  cancel: CancellationToken,
  client_id: Option<ClientId>,
  watch_cancel: Option<CancellationToken>,
  forwarder: Option<JoinHandle<()>>,
}

impl Connection {
  fn new(ctx: Arc<ServerContext>, reporter: Reporter, cancel: CancellationToken) -> Self {
    Self {
      ctx,
      reporter,
      cancel,
      client_id: None,
      watch_cancel: None,
      forwarder: None,
    }
  }

  async fn handle(&mut self, message: ClientMessage) {
    trace!(client_id = ?self.client_id, message = ?message, "Handling message");

    match message {
      ClientMessage::VerifyClientId {
        client_id,
        access_token,
      } => self.verify(&client_id, &access_token).await,
      ClientMessage::SetupClient => self.setup(),
      ClientMessage::StartWatching { source, processed } => self.start_watching(&source, &processed).await,
      ClientMessage::StopWatching => self.stop_watching().await,
      ClientMessage::Upload { documents } => self.upload(documents),
    }
  }

  async fn emit(&self, event: ServerEvent) {
    if self.reporter.send(event).await.is_err() {
      debug!("Actor writer gone, dropping event");
    }
  }

  fn require_client_id(&self) -> Option<ClientId> {
    if self.client_id.is_none() {
      self.reporter.log("Verify a client ID first.");
    }
    self.client_id.clone()
  }

  async fn verify(&mut self, raw_id: &str, token: &str) {
    let Some(client_id) = ClientId::new(raw_id) else {
      self.emit(ServerEvent::error("Client ID is required.")).await;
      return;
    };

    // Already held by this connection: the flag is ours, but the token must
    // still belong to the record's owner
    if self.client_id.as_ref() == Some(&client_id) {
      match self.ctx.lock.confirm(&client_id, token).await {
        Ok(_) => {
          self
            .emit(ServerEvent::ClientIdVerified {
              client_id: client_id.to_string(),
            })
            .await;
        }
        Err(e) => {
          warn!(client_id = %client_id, error = %e, "Re-verification of held client ID failed");
          self.emit(ServerEvent::error(e.to_string())).await;
        }
      }
      return;
    }

    // Switching ids on one connection gives up the previous one
    if self.client_id.is_some() {
      self.teardown().await;
    }

    match self.ctx.lock.claim(&client_id, token).await {
      Ok(granted) => {
        info!(client_id = %granted.client_id, owner = %granted.owner, "Client ID verified");
        self.client_id = Some(granted.client_id);
        self
          .emit(ServerEvent::ClientIdVerified {
            client_id: client_id.to_string(),
          })
          .await;
      }
      Err(e) => {
        warn!(client_id = %client_id, error = %e, "Client ID verification failed");
        self.emit(ServerEvent::error(e.to_string())).await;
      }
    }
  }

  fn setup(&mut self) {
    let Some(client_id) = self.require_client_id() else {
      return;
    };

    let session = self.ctx.sessions.get_or_create(&client_id);
    if let Some(previous) = self.forwarder.take() {
      previous.abort();
    }
    self.forwarder = Some(tokio::spawn(forward_status(
      client_id,
      session.subscribe(),
      self.reporter.clone(),
    )));
  }

  async fn start_watching(&mut self, source: &str, processed: &str) {
    let Some(client_id) = self.require_client_id() else {
      return;
    };
    if source.trim().is_empty() || processed.trim().is_empty() {
      self.reporter.log("Both source and processed folders are required.");
      return;
    }

    if let Some(previous) = self.watch_cancel.take() {
      debug!(client_id = %client_id, "Replacing existing watch source");
      previous.cancel();
    }

    let target = WatchTarget {
      client_id: client_id.clone(),
      source: PathBuf::from(source.trim()),
      processed: PathBuf::from(processed.trim()),
    };
    let token = self.cancel.child_token();

    match WatchSource::spawn(
      target,
      &self.ctx.watcher,
      self.ctx.queue.clone(),
      self.reporter.clone(),
      token.clone(),
    ) {
      Ok(_) => {
        self.watch_cancel = Some(token);
        self
          .emit(ServerEvent::Watching {
            source: source.trim().to_string(),
          })
          .await;
      }
      Err(e) => {
        warn!(client_id = %client_id, source = %source, error = %e, "Failed to start watch source");
        self.reporter.log(format!("Watcher error: {}", e));
      }
    }
  }

  async fn stop_watching(&mut self) {
    self.teardown().await;
    self.emit(ServerEvent::StoppedWatching).await;
  }

  fn upload(&self, documents: Vec<UploadedDocument>) {
    let Some(client_id) = self.require_client_id() else {
      return;
    };
    upload::ingest(&client_id, documents, &self.reporter, &self.ctx.queue);
  }

  /// Stop everything this connection started and give up its client id.
  async fn teardown(&mut self) {
    if let Some(token) = self.watch_cancel.take() {
      token.cancel();
    }
    if let Some(forwarder) = self.forwarder.take() {
      forwarder.abort();
    }

    let client_id = self.client_id.take();
    if let Err(e) = self.ctx.lock.release(client_id.as_ref()).await {
      error!(client_id = ?client_id, error = %e, "Failed to release client ID");
      self.reporter.log(format!("Failed to release client ID: {}", e));
    }
  }

  async fn close(&mut self) {
    self.teardown().await;
  }
}

/// Relay session status to the actor until the session is ready.
async fn forward_status(client_id: ClientId, mut status: watch::Receiver<SessionStatus>, reporter: Reporter) {
  let mut last_pairing: Option<String> = None;
  let mut last_error: Option<String> = None;

  loop {
    let current = status.borrow_and_update().clone();

    if current.last_error.is_some() && current.last_error != last_error {
      if let Some(message) = &current.last_error {
        reporter.log(format!("Authentication failure: {}", message));
      }
      last_error = current.last_error.clone();
    }

    match current.state {
      SessionState::Ready => {
        debug!(client_id = %client_id, "Session ready, forwarding done");
        let _ = reporter.send(ServerEvent::Ready).await;
        return;
      }
      SessionState::AwaitingPairing if current.pairing != last_pairing => {
        if let Some(challenge) = &current.pairing {
          let _ = reporter
            .send(ServerEvent::Qr {
              challenge: challenge.clone(),
            })
            .await;
        }
        last_pairing = current.pairing;
      }
      _ => {}
    }

    if status.changed().await.is_err() {
      debug!(client_id = %client_id, "Session status closed before ready");
      return;
    }
  }
}
