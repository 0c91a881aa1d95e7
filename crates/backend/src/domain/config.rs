//! Configuration system for Envelop.
//!
//! Config priority: explicit path > user (~/.config/envelop/config.toml) > defaults.
//! A few values can also be overridden from the environment (`PORT`, the lock
//! store service key).

use std::{
  net::SocketAddr,
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dirs;

// ============================================================================
// Server Configuration
// ============================================================================

/// Actor-facing listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  /// Address the actor protocol listens on
  pub bind: String,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      bind: "127.0.0.1:3000".to_string(),
    }
  }
}

impl ServerConfig {
  /// Resolve the bind address, letting `PORT` replace the configured port.
  pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
    let mut addr: SocketAddr = self
      .bind
      .parse()
      .map_err(|_| ConfigError::Invalid(format!("server.bind is not a socket address: {}", self.bind)))?;

    if let Ok(port) = std::env::var("PORT") {
      let port: u16 = port
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("PORT is not a valid port: {}", port)))?;
      addr.set_port(port);
    }

    Ok(addr)
  }
}

// ============================================================================
// Dispatch Configuration
// ============================================================================

/// Dispatch worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
  /// Pause after each job that reached the transport (default: 3000)
  pub post_job_delay_ms: u64,

  /// Suffix appended to `country code + mobile` to form a chat id
  pub chat_suffix: String,
}

impl Default for DispatchConfig {
  fn default() -> Self {
    Self {
      post_job_delay_ms: 3000,
      chat_suffix: "@c.us".to_string(),
    }
  }
}

// ============================================================================
// Watcher Configuration
// ============================================================================

/// Watch source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
  /// Recognized document extension (without the dot, case-insensitive)
  pub extension: String,

  /// A file must stop changing for this long before it is picked up
  pub stability_threshold_ms: u64,

  /// How often pending files are checked for stability
  pub poll_interval_ms: u64,

  /// Pick up documents already present when watching starts
  pub include_existing: bool,
}

impl Default for WatcherConfig {
  fn default() -> Self {
    Self {
      extension: "xml".to_string(),
      stability_threshold_ms: 2000,
      poll_interval_ms: 100,
      include_existing: true,
    }
  }
}

// ============================================================================
// Lock Configuration
// ============================================================================

/// Which lock/auth backend to use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LockBackend {
  /// Process-local records seeded from config (single-process deployments, tests)
  #[default]
  Memory,
  /// PostgREST-style record store with a GoTrue-style auth endpoint
  Rest,
}

/// Exclusivity lock configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
  pub backend: LockBackend,

  /// Timeout for every auth/store call
  pub timeout_secs: u64,

  pub rest: RestStoreConfig,

  pub memory: MemoryStoreConfig,
}

impl Default for LockConfig {
  fn default() -> Self {
    Self {
      backend: LockBackend::Memory,
      timeout_secs: 10,
      rest: RestStoreConfig::default(),
      memory: MemoryStoreConfig::default(),
    }
  }
}

/// REST record store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestStoreConfig {
  /// Base URL of the project (e.g. "https://example.supabase.co")
  pub url: String,

  /// Service key. If not set, read from the env var named by `service_key_env`
  #[serde(skip_serializing_if = "Option::is_none")]
  pub service_key: Option<String>,

  pub service_key_env: String,

  /// Table holding the lock records
  pub table: String,

  pub client_id_column: String,
  pub owner_column: String,
  pub running_column: String,
}

impl Default for RestStoreConfig {
  fn default() -> Self {
    Self {
      url: String::new(),
      service_key: None,
      service_key_env: "ENVELOP_SERVICE_KEY".to_string(),
      table: "profiles".to_string(),
      client_id_column: "uniqe_user_id".to_string(),
      owner_column: "user_id".to_string(),
      running_column: "is_running".to_string(),
    }
  }
}

impl RestStoreConfig {
  /// Resolve the service key from config or environment
  pub fn resolve_service_key(&self) -> Option<String> {
    self
      .service_key
      .clone()
      .filter(|k| !k.is_empty())
      .or_else(|| std::env::var(&self.service_key_env).ok().filter(|k| !k.is_empty()))
  }
}

/// Seed records for the in-memory backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
  pub clients: Vec<MemoryClientSeed>,
}

/// One client id owned by one user, with the token that user authenticates with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryClientSeed {
  pub client_id: String,
  pub owner: String,
  pub token: String,
}

// ============================================================================
// Transport Configuration
// ============================================================================

/// Messaging transport backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransportBackend {
  /// Logs every send instead of delivering it
  #[default]
  DryRun,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
  pub backend: TransportBackend,

  /// Dry-run only: emit a pairing challenge and wait this long before ready.
  /// Zero means the session becomes ready immediately.
  pub pairing_delay_ms: u64,
}

impl Default for TransportConfig {
  fn default() -> Self {
    Self {
      backend: TransportBackend::DryRun,
      pairing_delay_ms: 0,
    }
  }
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Log level: error, warn, info, debug, trace
  pub level: String,

  /// Log file rotation: daily, hourly, never
  pub rotation: String,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      rotation: "daily".to_string(),
    }
  }
}

// ============================================================================
// Root Config
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub server: ServerConfig,
  pub dispatch: DispatchConfig,
  pub watcher: WatcherConfig,
  pub lock: LockConfig,
  pub transport: TransportConfig,
  pub log: LogConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("Failed to parse config {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },
  #[error("Invalid config: {0}")]
  Invalid(String),
}

impl Config {
  /// Load config from an explicit file. Errors are returned, not defaulted.
  pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.to_path_buf(),
      source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })
  }

  /// Load the user config, falling back to defaults when absent or invalid.
  pub fn load_global() -> Self {
    if let Some(path) = Self::user_config_path()
      && path.exists()
    {
      match Self::load_from(&path) {
        Ok(config) => {
          debug!(path = %path.display(), "Loaded user config");
          return config;
        }
        Err(e) => warn!(error = %e, "Ignoring invalid user config, using defaults"),
      }
    }

    Self::default()
  }

  /// Load an explicit path if given, otherwise the user config.
  pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
    match explicit {
      Some(path) => Self::load_from(path),
      None => Ok(Self::load_global()),
    }
  }

  pub fn user_config_path() -> Option<PathBuf> {
    Some(dirs::default_config_dir().join("config.toml"))
  }

  pub fn generate_template() -> String {
    let defaults = Self::default();

    format!(
      r#"# Envelop Configuration
# Place in ~/.config/envelop/config.toml or pass --config <file>

# ============================================================================
# Actor-facing listener
# ============================================================================

[server]
# Address for the JSON-lines actor protocol (PORT env var overrides the port)
bind = "{bind}"

# ============================================================================
# Dispatch worker
# ============================================================================

[dispatch]
# Pause after each job that reached the transport
post_job_delay_ms = {delay}

# Appended to country code + mobile number to form the chat id
chat_suffix = "{suffix}"

# ============================================================================
# Watch source
# ============================================================================

[watcher]
# Only files with this extension become jobs
extension = "{extension}"

# File must be unchanged for this long before it is picked up
stability_threshold_ms = {stability}
poll_interval_ms = {poll}

# Pick up documents already in the folder when watching starts
include_existing = {existing}

# ============================================================================
# Exclusivity lock
# ============================================================================

[lock]
# Backend: memory (seeded below) or rest
backend = "memory"
timeout_secs = {lock_timeout}

# [lock.rest]
# url = "https://your-project.supabase.co"
# service_key_env = "ENVELOP_SERVICE_KEY"
# table = "profiles"
# client_id_column = "uniqe_user_id"
# owner_column = "user_id"
# running_column = "is_running"

# [[lock.memory.clients]]
# client_id = "acme-01"
# owner = "user-1"
# token = "local-dev-token"

# ============================================================================
# Messaging transport
# ============================================================================

[transport]
backend = "dry-run"
pairing_delay_ms = 0

# ============================================================================
# Logging
# ============================================================================

[log]
# error, warn, info, debug, trace (RUST_LOG overrides)
level = "{level}"
# daily, hourly, never (file logging only)
rotation = "{rotation}"
"#,
      bind = defaults.server.bind,
      delay = defaults.dispatch.post_job_delay_ms,
      suffix = defaults.dispatch.chat_suffix,
      extension = defaults.watcher.extension,
      stability = defaults.watcher.stability_threshold_ms,
      poll = defaults.watcher.poll_interval_ms,
      existing = defaults.watcher.include_existing,
      lock_timeout = defaults.lock.timeout_secs,
      level = defaults.log.level,
      rotation = defaults.log.rotation,
    )
  }
}
