//! Envelop CLI - multi-tenant envelope dispatcher

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf};

mod commands;
mod logging;

use commands::{cmd_config_init, cmd_config_show, cmd_decode, cmd_serve};
use logging::{init_cli_logging, init_serve_logging};

#[derive(Parser)]
#[command(name = "envelop")]
#[command(about = "Dispatch XML message envelopes through per-client chat sessions")]
#[command(after_help = "\
QUICK START:
  envelop config init             # Write a commented config template
  envelop serve                   # Start the actor listener
  envelop decode invoice.xml      # Check an envelope offline

CONFIG LOCATION:
  ~/.config/envelop/config.toml (CONFIG_DIR or XDG_CONFIG_HOME override)")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

/// Subcommands for `envelop config`
#[derive(Subcommand)]
pub enum ConfigCommand {
  /// Show the effective configuration
  Show {
    /// Config file (default: user config)
    #[arg(long)]
    config: Option<PathBuf>,
  },
  /// Write the commented template to the user config path
  Init {
    /// Overwrite an existing file
    #[arg(long)]
    force: bool,
  },
}

#[derive(Subcommand)]
enum Commands {
  /// Run the dispatcher and listen for actors
  Serve {
    /// Config file (default: user config)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Listen address, overrides [server].bind
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Log to a rolling file in the data dir instead of the console
    #[arg(long)]
    log_file: bool,
  },
  /// Manage configuration
  Config {
    #[command(subcommand)]
    command: ConfigCommand,
  },
  /// Decode an envelope document and print the message request
  Decode {
    /// Envelope document (UTF-8 or UTF-16 LE)
    path: PathBuf,
    /// Print as JSON
    #[arg(long)]
    json: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();

  // Serve takes its level and rotation from config, everything else is console-only
  let _guard = match &cli.command {
    Commands::Serve { config, log_file, .. } => init_serve_logging(config.as_deref(), *log_file),
    _ => {
      init_cli_logging();
      None
    }
  };

  match cli.command {
    Commands::Serve { config, bind, .. } => cmd_serve(config, bind).await,
    Commands::Config { command } => match command {
      ConfigCommand::Show { config } => cmd_config_show(config.as_deref()),
      ConfigCommand::Init { force } => cmd_config_init(force),
    },
    Commands::Decode { path, json } => cmd_decode(&path, json).await,
  }
}
