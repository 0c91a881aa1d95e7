//! Exclusivity lock for client ids
//!
//! A client id may be held by only one live connection across the whole
//! deployment. The authoritative flag lives in an external record store, so
//! every claim re-reads central state; nothing is cached locally.
//!
//! The store is reached through two collaborator traits:
//!
//! - [`Authenticator`] exchanges an opaque access token for a verified user
//! - [`LockStore`] reads and flips the `is_running` flag of a lock record
//!
//! Both are treated as slow, fallible remote dependencies: every call is
//! bounded by a timeout and failures surface as [`LockError`] without touching
//! any local session or queue state.
//!
//! # Known gap
//!
//! There is no lease or heartbeat. A process that dies while holding a client
//! id leaves `is_running = true` until someone resets the record.

mod memory;
mod rest;

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::{debug, info, warn};

pub use memory::{InMemoryLockStore, StaticAuthenticator};
pub use rest::{RestAuthenticator, RestLockStore};

use crate::domain::{
  client::{ClientId, UserId},
  config::{LockBackend, LockConfig},
};

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Exchanges an access token for a verified identity
#[async_trait]
pub trait Authenticator: Send + Sync {
  async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

/// External lock record for one client id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
  pub client_id: ClientId,
  pub owner: UserId,
  pub is_running: bool,
}

/// Result of trying to flip a record from stopped to running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
  /// The flag was false and is now true
  Claimed,
  /// The flag was already true
  AlreadyRunning,
  /// No record exists for the client id
  Missing,
}

/// Record store holding the `is_running` flag per client id
#[async_trait]
pub trait LockStore: Send + Sync {
  /// Fetch the record for `client_id`, scoped to `owner`.
  async fn fetch(&self, client_id: &ClientId, owner: &UserId) -> Result<Option<LockRecord>, StoreError>;

  /// Set `is_running = true` only if it is currently false.
  async fn mark_running(&self, client_id: &ClientId) -> Result<ClaimOutcome, StoreError>;

  /// Set `is_running = false` unconditionally. An absent record is not an error.
  async fn mark_stopped(&self, client_id: &ClientId) -> Result<(), StoreError>;
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
  #[error("Authentication token is missing.")]
  MissingToken,
  #[error("Invalid session. Please log in again.")]
  InvalidToken,
  #[error("Auth service error: {0}")]
  Service(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("Request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("Store returned {status}: {body}")]
  Status { status: u16, body: String },
  #[error("Unexpected store response: {0}")]
  Decode(String),
  #[error("Store misconfigured: {0}")]
  Config(String),
}

/// Reasons a claim or release can fail
#[derive(Debug, thiserror::Error)]
pub enum LockError {
  #[error(transparent)]
  Auth(#[from] AuthError),
  #[error("Client ID {0} is invalid or not linked to your account.")]
  NotFound(ClientId),
  #[error("Client ID {0} is already in use.")]
  AlreadyInUse(ClientId),
  #[error("Database error: {0}")]
  Store(#[from] StoreError),
  #[error("Lock store did not answer within {0:?}")]
  Timeout(Duration),
}

// ============================================================================
// ExclusivityLock
// ============================================================================

/// Proof that a client id was claimed for a verified user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Granted {
  pub client_id: ClientId,
  pub owner: UserId,
}

/// Claims and releases client ids against the external store
#[derive(Clone)]
pub struct ExclusivityLock {
  auth: Arc<dyn Authenticator>,
  store: Arc<dyn LockStore>,
  timeout: Duration,
}

impl ExclusivityLock {
  pub fn new(auth: Arc<dyn Authenticator>, store: Arc<dyn LockStore>, timeout: Duration) -> Self {
    Self { auth, store, timeout }
  }

  /// Build the lock from configuration, choosing the backend.
  pub fn from_config(config: &LockConfig) -> Result<Self, StoreError> {
    let timeout = Duration::from_secs(config.timeout_secs);

    match config.backend {
      LockBackend::Memory => {
        let (auth, store) = memory::from_seeds(&config.memory.clients);
        info!(clients = config.memory.clients.len(), "Using in-memory lock store");
        Ok(Self::new(Arc::new(auth), Arc::new(store), timeout))
      }
      LockBackend::Rest => {
        let client = rest::RestClient::new(&config.rest, timeout)?;
        info!(url = %config.rest.url, table = %config.rest.table, "Using REST lock store");
        Ok(Self::new(
          Arc::new(RestAuthenticator::new(client.clone())),
          Arc::new(RestLockStore::new(client)),
          timeout,
        ))
      }
    }
  }

  /// Claim `client_id` for the user identified by `token`.
  ///
  /// Fails with `Auth` for a bad token, `NotFound` when the record does not
  /// exist for that user, and `AlreadyInUse` when another connection holds it.
  pub async fn claim(&self, client_id: &ClientId, token: &str) -> Result<Granted, LockError> {
    let (owner, record) = self.resolve(client_id, token).await?;

    if record.is_running {
      return Err(LockError::AlreadyInUse(client_id.clone()));
    }

    match self.bounded(self.store.mark_running(client_id)).await? {
      ClaimOutcome::Claimed => {
        info!(client_id = %client_id, owner = %owner, "Client ID claimed");
        Ok(Granted {
          client_id: client_id.clone(),
          owner,
        })
      }
      ClaimOutcome::AlreadyRunning => {
        warn!(client_id = %client_id, "Lost claim race for client ID");
        Err(LockError::AlreadyInUse(client_id.clone()))
      }
      ClaimOutcome::Missing => Err(LockError::NotFound(client_id.clone())),
    }
  }

  /// Check that `token` still identifies the owner of `client_id` without
  /// touching the running flag. Used when a holder verifies the same id again.
  pub async fn confirm(&self, client_id: &ClientId, token: &str) -> Result<UserId, LockError> {
    let (owner, _) = self.resolve(client_id, token).await?;
    Ok(owner)
  }

  /// Verify the token and read the record scoped to that identity.
  async fn resolve(&self, client_id: &ClientId, token: &str) -> Result<(UserId, LockRecord), LockError> {
    if token.trim().is_empty() {
      return Err(AuthError::MissingToken.into());
    }

    let owner = self.bounded(self.auth.verify(token)).await?;
    debug!(client_id = %client_id, owner = %owner, "Token verified");

    let record = self
      .bounded(self.store.fetch(client_id, &owner))
      .await?
      .ok_or_else(|| LockError::NotFound(client_id.clone()))?;

    Ok((owner, record))
  }

  /// Release `client_id`. A missing id or record is a no-op.
  pub async fn release(&self, client_id: Option<&ClientId>) -> Result<(), LockError> {
    let Some(client_id) = client_id else {
      return Ok(());
    };

    debug!(client_id = %client_id, "Releasing client ID");
    self.bounded(self.store.mark_stopped(client_id)).await?;
    info!(client_id = %client_id, "Client ID released");
    Ok(())
  }

  async fn bounded<T, E>(&self, fut: impl Future<Output = Result<T, E>>) -> Result<T, LockError>
  where
    LockError: From<E>,
  {
    match tokio::time::timeout(self.timeout, fut).await {
      Ok(result) => result.map_err(LockError::from),
      Err(_) => Err(LockError::Timeout(self.timeout)),
    }
  }
}

impl std::fmt::Debug for ExclusivityLock {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ExclusivityLock").field("timeout", &self.timeout).finish()
  }
}
