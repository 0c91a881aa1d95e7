//! IPC module - the actor-facing wire protocol
//!
//! Newline-delimited JSON over TCP. Every object carries an `event` tag:
//!
//! ```text
//! → {"event":"verify_client_id","client_id":"acme-01","access_token":"..."}
//! ← {"event":"client_id_verified","client_id":"acme-01"}
//! → {"event":"setup_client"}
//! ← {"event":"qr","challenge":"..."}
//! ← {"event":"ready"}
//! → {"event":"start_watching","source":"/in","processed":"/in/done"}
//! ← {"event":"watching","source":"/in"}
//! ← {"event":"log","message":"New file detected: /in/0042.xml"}
//! ```
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, thiserror::Error)]
pub enum IpcError {
  #[error("Ser/de error: {0}")]
  Serde(String),
  #[error("IO error: {0}")]
  Io(String),
  #[error("Codec error: {0}")]
  Codec(String),
}

impl From<serde_json::Error> for IpcError {
  fn from(err: serde_json::Error) -> Self {
    IpcError::Serde(err.to_string())
  }
}

impl From<std::io::Error> for IpcError {
  fn from(err: std::io::Error) -> Self {
    IpcError::Io(err.to_string())
  }
}

impl From<tokio_util::codec::LinesCodecError> for IpcError {
  fn from(err: tokio_util::codec::LinesCodecError) -> Self {
    IpcError::Codec(err.to_string())
  }
}

// ============================================================================
// Inbound
// ============================================================================

/// One document in an upload batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedDocument {
  pub name: String,
  /// Base64 of the raw file bytes
  pub content: String,
}

/// Messages an actor sends to the service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ClientMessage {
  VerifyClientId {
    client_id: String,
    #[serde(default)]
    access_token: String,
  },
  SetupClient,
  StartWatching {
    #[serde(default)]
    source: String,
    #[serde(default)]
    processed: String,
  },
  StopWatching,
  Upload {
    documents: Vec<UploadedDocument>,
  },
}

// ============================================================================
// Outbound
// ============================================================================

/// Events the service pushes to an actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum ServerEvent {
  ClientIdVerified { client_id: String },
  ClientIdError { message: String },
  /// Pairing artifact to render as a QR code
  Qr { challenge: String },
  Ready,
  Watching { source: String },
  StoppedWatching,
  Log { message: String },
}

impl ServerEvent {
  pub fn error(message: impl Into<String>) -> Self {
    ServerEvent::ClientIdError {
      message: message.into(),
    }
  }

  pub fn log(message: impl Into<String>) -> Self {
    ServerEvent::Log {
      message: message.into(),
    }
  }
}
