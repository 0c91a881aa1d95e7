//! Service lifecycle management.
//!
//! # Architecture
//!
//! ```text
//! Daemon (Supervisor)
//!   ├── Server (TCP listener, one task per actor connection)
//!   │     └── WatchSource (per connection, optional)
//!   ├── SessionRegistry
//!   │     └── SessionActor (per client id, spawned on first setup)
//!   └── DispatchQueue (single worker, spawned on demand)
//! ```
//!
//! # Lifecycle
//!
//! 1. Create master `CancellationToken`
//! 2. Build the exclusivity lock from config (memory or REST backend)
//! 3. Create the transport factory and `SessionRegistry` with a child token
//! 4. Create the `DispatchQueue`
//! 5. Bind the `Server` (failure is fatal)
//! 6. Run until ctrl-c or cancellation
//! 7. Graceful shutdown: cancel children, let the in-flight job finish

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
  actor::{DispatchQueue, SessionRegistry},
  domain::config::{Config, ConfigError},
  ipc::IpcError,
  lock::{ExclusivityLock, StoreError},
  server::{Server, ServerContext},
  transport,
};

/// How long shutdown waits for an in-flight job
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("Failed to set up lock store: {0}")]
  Lock(#[from] StoreError),
  #[error("Failed to bind {addr}: {source}")]
  Bind {
    addr: SocketAddr,
    #[source]
    source: IpcError,
  },
  #[error("Server error: {0}")]
  Server(#[from] IpcError),
}

// ============================================================================
// Configuration
// ============================================================================

/// Daemon runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  /// Address for the actor protocol
  pub bind: SocketAddr,
  /// Full configuration (dispatch, watcher, lock, transport)
  pub config: Config,
}

impl RuntimeConfig {
  /// Resolve the bind address from config (and `PORT`).
  pub fn from_config(config: Config) -> Result<Self, ConfigError> {
    Ok(Self {
      bind: config.server.bind_addr()?,
      config,
    })
  }
}

/// The Envelop service - wires components together and supervises shutdown.
pub struct Daemon {
  runtime_config: RuntimeConfig,
}

impl Daemon {
  pub fn new(runtime_config: RuntimeConfig) -> Self {
    Self { runtime_config }
  }

  /// Run until ctrl-c.
  pub async fn run(self) -> Result<(), DaemonError> {
    let cancel = CancellationToken::new();

    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
      if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        return;
      }
      info!("Received ctrl-c, shutting down...");
      cancel_for_signal.cancel();
    });

    self.run_until(cancel).await
  }

  /// Run until `cancel` fires.
  pub async fn run_until(self, cancel: CancellationToken) -> Result<(), DaemonError> {
    let config = &self.runtime_config.config;
    info!(bind = %self.runtime_config.bind, "Starting Envelop");

    let lock = ExclusivityLock::from_config(&config.lock)?;

    let factory = transport::factory_from_config(&config.transport);
    info!(backend = ?config.transport.backend, "Messaging transport configured");

    let sessions = Arc::new(SessionRegistry::new(factory, cancel.child_token()));
    let queue = DispatchQueue::new(Arc::clone(&sessions), &config.dispatch);

    let ctx = ServerContext {
      lock,
      sessions: Arc::clone(&sessions),
      queue: queue.clone(),
      watcher: config.watcher.clone(),
    };

    let addr = self.runtime_config.bind;
    let server = Server::bind(addr, ctx)
      .await
      .map_err(|source| DaemonError::Bind { addr, source })?;

    let result = server.run(cancel.child_token()).await;

    info!("Shutting down...");
    cancel.cancel();

    if tokio::time::timeout(DRAIN_TIMEOUT, queue.idle()).await.is_err() {
      warn!(stats = ?queue.stats(), "Dispatch queue still busy at shutdown");
    }

    info!(sessions = sessions.len(), stats = ?queue.stats(), "Shutdown complete");
    result.map_err(DaemonError::from)
  }
}
