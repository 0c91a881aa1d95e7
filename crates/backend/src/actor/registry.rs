//! SessionRegistry - maps client ids to their SessionActors, spawning on demand
//!
//! Sessions are created on first setup and kept for the process lifetime, so a
//! reconnecting actor re-attaches to the already-paired transport. Concurrent
//! setups for the same client id race on the `DashMap` entry, so exactly one
//! transport is ever created per id.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::session::{SessionActor, SessionHandle};
use crate::{domain::client::ClientId, transport::TransportFactory};

pub struct SessionRegistry {
  sessions: DashMap<ClientId, SessionHandle>,
  factory: Arc<dyn TransportFactory>,
  /// Parent token; every session gets a child
  cancel: CancellationToken,
}

impl SessionRegistry {
  pub fn new(factory: Arc<dyn TransportFactory>, cancel: CancellationToken) -> Self {
    Self {
      sessions: DashMap::new(),
      factory,
      cancel,
    }
  }

  /// Return the session for `client_id`, creating and starting it if absent.
  pub fn get_or_create(&self, client_id: &ClientId) -> SessionHandle {
    match self.sessions.entry(client_id.clone()) {
      Entry::Occupied(entry) => {
        debug!(client_id = %client_id, "Attaching to existing session");
        entry.get().clone()
      }
      Entry::Vacant(entry) => {
        let transport = self.factory.create(client_id);
        let handle = SessionActor::spawn(client_id.clone(), transport, self.cancel.child_token());
        entry.insert(handle.clone());
        handle
      }
    }
  }

  /// Existing session without spawning
  pub fn get(&self, client_id: &ClientId) -> Option<SessionHandle> {
    self.sessions.get(client_id).map(|h| h.value().clone())
  }

  pub fn len(&self) -> usize {
    self.sessions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.sessions.is_empty()
  }
}

impl std::fmt::Debug for SessionRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("SessionRegistry")
      .field("sessions", &self.sessions.len())
      .finish()
  }
}
