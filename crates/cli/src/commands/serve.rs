//! Serve command

use anyhow::{Context, Result};
use envelop::{Daemon, RuntimeConfig, config::Config};
use std::{net::SocketAddr, path::PathBuf};
use tracing::info;

/// Load config and run the dispatcher until ctrl-c
pub async fn cmd_serve(config_path: Option<PathBuf>, bind: Option<SocketAddr>) -> Result<()> {
  let config = Config::load(config_path.as_deref()).context("Failed to load config")?;

  let mut runtime = RuntimeConfig::from_config(config).context("Invalid server config")?;
  if let Some(addr) = bind {
    runtime.bind = addr;
  }

  info!(lock = ?runtime.config.lock.backend, transport = ?runtime.config.transport.backend, "Configuration loaded");
  Daemon::new(runtime).run().await.context("Failed to run dispatcher")?;

  Ok(())
}
