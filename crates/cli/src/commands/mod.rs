//! CLI command implementations

mod config;
mod decode;
mod serve;

pub use config::{cmd_config_init, cmd_config_show};
pub use decode::cmd_decode;
pub use serve::cmd_serve;
