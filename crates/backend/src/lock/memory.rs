//! Process-local lock backend
//!
//! Keeps lock records in a `DashMap` so the flag flip in `mark_running` is a
//! single atomic entry update. Only exclusive within one process; used for
//! single-node deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{AuthError, Authenticator, ClaimOutcome, LockRecord, LockStore, StoreError};
use crate::domain::{
  client::{ClientId, UserId},
  config::MemoryClientSeed,
};

/// Token → identity table
#[derive(Debug, Default)]
pub struct StaticAuthenticator {
  tokens: DashMap<String, UserId>,
}

impl StaticAuthenticator {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&self, token: impl Into<String>, user: UserId) {
    self.tokens.insert(token.into(), user);
  }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
  async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
    self
      .tokens
      .get(token)
      .map(|user| user.value().clone())
      .ok_or(AuthError::InvalidToken)
  }
}

/// In-memory lock records keyed by client id
#[derive(Debug, Default)]
pub struct InMemoryLockStore {
  records: DashMap<ClientId, LockRecord>,
}

impl InMemoryLockStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a stopped record for `client_id` owned by `owner`.
  pub fn insert(&self, client_id: ClientId, owner: UserId) {
    self.records.insert(
      client_id.clone(),
      LockRecord {
        client_id,
        owner,
        is_running: false,
      },
    );
  }

  pub fn is_running(&self, client_id: &ClientId) -> Option<bool> {
    self.records.get(client_id).map(|r| r.is_running)
  }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
  async fn fetch(&self, client_id: &ClientId, owner: &UserId) -> Result<Option<LockRecord>, StoreError> {
    Ok(
      self
        .records
        .get(client_id)
        .filter(|record| &record.owner == owner)
        .map(|record| record.value().clone()),
    )
  }

  async fn mark_running(&self, client_id: &ClientId) -> Result<ClaimOutcome, StoreError> {
    let Some(mut record) = self.records.get_mut(client_id) else {
      return Ok(ClaimOutcome::Missing);
    };

    if record.is_running {
      Ok(ClaimOutcome::AlreadyRunning)
    } else {
      record.is_running = true;
      Ok(ClaimOutcome::Claimed)
    }
  }

  async fn mark_stopped(&self, client_id: &ClientId) -> Result<(), StoreError> {
    if let Some(mut record) = self.records.get_mut(client_id) {
      record.is_running = false;
    }
    Ok(())
  }
}

/// Build an authenticator/store pair from config seeds.
///
/// Seeds with a blank client id are skipped.
pub(super) fn from_seeds(seeds: &[MemoryClientSeed]) -> (StaticAuthenticator, InMemoryLockStore) {
  let auth = StaticAuthenticator::new();
  let store = InMemoryLockStore::new();

  for seed in seeds {
    let Some(client_id) = ClientId::new(&seed.client_id) else {
      continue;
    };
    let owner = UserId(seed.owner.clone());
    auth.insert(seed.token.clone(), owner.clone());
    store.insert(client_id, owner);
  }

  (auth, store)
}
