//! Config commands

use anyhow::{Context, Result, bail};
use envelop::config::Config;
use std::path::Path;

/// Print the effective configuration as TOML
pub fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
  let config = Config::load(config_path).context("Failed to load config")?;

  match (config_path, Config::user_config_path()) {
    (Some(path), _) => println!("Using config: {}", path.display()),
    (None, Some(user)) if user.exists() => println!("Using user config: {}", user.display()),
    _ => println!("Using default configuration (no config file found)"),
  }
  println!();

  let toml_str = toml::to_string_pretty(&config).context("Failed to render config")?;
  println!("{}", toml_str);

  Ok(())
}

/// Write the commented template to the user config path
pub fn cmd_config_init(force: bool) -> Result<()> {
  let Some(path) = Config::user_config_path() else {
    bail!("Could not determine user config path");
  };

  if path.exists() && !force {
    bail!("Config file already exists: {} (use --force to overwrite)", path.display());
  }

  if let Some(parent) = path.parent() {
    std::fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
  }
  std::fs::write(&path, Config::generate_template()).with_context(|| format!("Failed to write {}", path.display()))?;

  println!("Created config: {}", path.display());
  println!("Edit [lock] and [transport] before running 'envelop serve'.");

  Ok(())
}
