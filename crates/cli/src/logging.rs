//! Logging setup for the serve command and one-shot commands

use envelop::{config::Config, dirs};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_NAME: &str = "envelop.log";

/// Initialize logging for one-shot commands (console only)
pub fn init_cli_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::builder().with_default_directive(tracing::Level::WARN.into()).from_env_lossy())
    .with_target(false)
    .init();
}

/// Parse log level from config string
fn parse_log_level(level: &str) -> tracing::Level {
  match level.to_lowercase().as_str() {
    "off" | "error" => tracing::Level::ERROR,
    "warn" => tracing::Level::WARN,
    "debug" => tracing::Level::DEBUG,
    "trace" => tracing::Level::TRACE,
    _ => tracing::Level::INFO,
  }
}

/// Initialize logging for `envelop serve` from the `[log]` section.
///
/// Console with colors by default. With `to_file`, logs go to a rolling file
/// under the data dir and the returned guard must outlive the process.
pub fn init_serve_logging(config_path: Option<&Path>, to_file: bool) -> Option<WorkerGuard> {
  // An unreadable config is reported by the serve command itself
  let log = Config::load(config_path).map(|c| c.log).unwrap_or_default();

  // RUST_LOG wins over the configured level
  let env_filter = EnvFilter::builder()
    .with_default_directive(parse_log_level(&log.level).into())
    .from_env_lossy();

  if !to_file {
    tracing_subscriber::fmt()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_ansi(true)
      .init();
    return None;
  }

  let log_dir = dirs::default_log_dir();
  if let Err(e) = std::fs::create_dir_all(&log_dir) {
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    tracing::warn!(dir = %log_dir.display(), error = %e, "Cannot create log dir, logging to console");
    return None;
  }

  let appender = match log.rotation.as_str() {
    "hourly" => tracing_appender::rolling::hourly(&log_dir, LOG_FILE_NAME),
    "never" => tracing_appender::rolling::never(&log_dir, LOG_FILE_NAME),
    _ => tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME),
  };
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_target(true)
    .with_ansi(false)
    .with_writer(writer)
    .init();

  Some(guard)
}
