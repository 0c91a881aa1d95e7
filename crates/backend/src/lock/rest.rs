//! REST lock backend
//!
//! Talks to a PostgREST-style record API and a GoTrue-style auth endpoint:
//!
//! - `GET  {url}/auth/v1/user` with the caller's bearer token → `{ "id": ... }`
//! - `GET  {url}/rest/v1/{table}?{client}=eq.{id}&{owner}=eq.{user}`
//! - `PATCH {url}/rest/v1/{table}?{client}=eq.{id}&{running}=eq.false`
//!
//! The claim PATCH is filtered on `running = false` and asks for the updated
//! rows back, so an empty result means someone else flipped the flag first.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use super::{AuthError, Authenticator, ClaimOutcome, LockRecord, LockStore, StoreError};
use crate::domain::{
  client::{ClientId, UserId},
  config::RestStoreConfig,
};

/// Shared HTTP client and resolved settings for both REST collaborators
#[derive(Debug, Clone)]
pub struct RestClient {
  http: reqwest::Client,
  base_url: String,
  service_key: String,
  table: String,
  client_id_column: String,
  owner_column: String,
  running_column: String,
}

impl RestClient {
  pub fn new(config: &RestStoreConfig, timeout: Duration) -> Result<Self, StoreError> {
    if config.url.trim().is_empty() {
      return Err(StoreError::Config("lock.rest.url is not set".to_string()));
    }

    let service_key = config.resolve_service_key().ok_or_else(|| {
      StoreError::Config(format!(
        "no service key configured (set lock.rest.service_key or {})",
        config.service_key_env
      ))
    })?;

    let http = reqwest::Client::builder().timeout(timeout).build()?;

    Ok(Self {
      http,
      base_url: config.url.trim_end_matches('/').to_string(),
      service_key,
      table: config.table.clone(),
      client_id_column: config.client_id_column.clone(),
      owner_column: config.owner_column.clone(),
      running_column: config.running_column.clone(),
    })
  }

  fn auth_url(&self) -> String {
    format!("{}/auth/v1/user", self.base_url)
  }

  fn table_url(&self, filters: &[(&str, String)]) -> Result<Url, StoreError> {
    let base = format!("{}/rest/v1/{}", self.base_url, self.table);
    Url::parse_with_params(&base, filters).map_err(|e| StoreError::Config(format!("bad store url: {}", e)))
  }

  fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
  }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
  let status = response.status();
  if status.is_success() {
    return Ok(response);
  }
  let body = response.text().await.unwrap_or_default();
  Err(StoreError::Status {
    status: status.as_u16(),
    body,
  })
}

// ============================================================================
// Authenticator
// ============================================================================

#[derive(Debug, Deserialize)]
struct AuthUser {
  id: String,
}

#[derive(Debug, Clone)]
pub struct RestAuthenticator {
  client: RestClient,
}

impl RestAuthenticator {
  pub fn new(client: RestClient) -> Self {
    Self { client }
  }
}

#[async_trait]
impl Authenticator for RestAuthenticator {
  async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
    let response = self
      .client
      .http
      .get(self.client.auth_url())
      .header("apikey", &self.client.service_key)
      .bearer_auth(token)
      .send()
      .await
      .map_err(|e| AuthError::Service(e.to_string()))?;

    match response.status() {
      StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(AuthError::InvalidToken),
      status if !status.is_success() => {
        let body = response.text().await.unwrap_or_default();
        return Err(AuthError::Service(format!("{}: {}", status.as_u16(), body)));
      }
      _ => {}
    }

    let user: AuthUser = response.json().await.map_err(|e| AuthError::Service(e.to_string()))?;
    if user.id.is_empty() {
      return Err(AuthError::InvalidToken);
    }
    trace!(user = %user.id, "Auth endpoint verified token");
    Ok(UserId(user.id))
  }
}

// ============================================================================
// Lock Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct RestLockStore {
  client: RestClient,
}

impl RestLockStore {
  pub fn new(client: RestClient) -> Self {
    Self { client }
  }

  fn running_body(&self, running: bool) -> Value {
    let mut body = serde_json::Map::new();
    body.insert(self.client.running_column.clone(), Value::Bool(running));
    Value::Object(body)
  }

  fn running_flag(&self, row: &Value) -> Result<bool, StoreError> {
    match row.get(&self.client.running_column) {
      Some(Value::Bool(b)) => Ok(*b),
      Some(Value::Null) | None => Ok(false),
      Some(other) => Err(StoreError::Decode(format!(
        "{} is not a boolean: {}",
        self.client.running_column, other
      ))),
    }
  }
}

#[async_trait]
impl LockStore for RestLockStore {
  async fn fetch(&self, client_id: &ClientId, owner: &UserId) -> Result<Option<LockRecord>, StoreError> {
    let c = &self.client;
    let url = c.table_url(&[
      ("select", c.running_column.clone()),
      (c.client_id_column.as_str(), RestClient::eq(client_id)),
      (c.owner_column.as_str(), RestClient::eq(owner)),
    ])?;

    let response = c
      .http
      .get(url)
      .header("apikey", &c.service_key)
      .bearer_auth(&c.service_key)
      .send()
      .await?;
    let rows: Vec<Value> = error_for_status(response).await?.json().await?;

    debug!(client_id = %client_id, rows = rows.len(), "Fetched lock record");

    match rows.first() {
      Some(row) => Ok(Some(LockRecord {
        client_id: client_id.clone(),
        owner: owner.clone(),
        is_running: self.running_flag(row)?,
      })),
      None => Ok(None),
    }
  }

  async fn mark_running(&self, client_id: &ClientId) -> Result<ClaimOutcome, StoreError> {
    let c = &self.client;
    let url = c.table_url(&[
      (c.client_id_column.as_str(), RestClient::eq(client_id)),
      (c.running_column.as_str(), RestClient::eq(false)),
    ])?;

    let response = c
      .http
      .patch(url)
      .header("apikey", &c.service_key)
      .bearer_auth(&c.service_key)
      .header("Prefer", "return=representation")
      .json(&self.running_body(true))
      .send()
      .await?;
    let rows: Vec<Value> = error_for_status(response).await?.json().await?;

    if rows.is_empty() {
      Ok(ClaimOutcome::AlreadyRunning)
    } else {
      Ok(ClaimOutcome::Claimed)
    }
  }

  async fn mark_stopped(&self, client_id: &ClientId) -> Result<(), StoreError> {
    let c = &self.client;
    let url = c.table_url(&[(c.client_id_column.as_str(), RestClient::eq(client_id))])?;

    let response = c
      .http
      .patch(url)
      .header("apikey", &c.service_key)
      .bearer_auth(&c.service_key)
      .header("Prefer", "return=minimal")
      .json(&self.running_body(false))
      .send()
      .await?;
    error_for_status(response).await?;
    Ok(())
  }
}
