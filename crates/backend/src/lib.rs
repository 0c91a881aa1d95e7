pub mod actor;
pub mod lock;
pub mod transport;

mod server;

mod domain;
pub use domain::{client, config, envelope};

pub mod dirs;
pub mod ipc;

mod daemon;
pub use daemon::{Daemon, DaemonError, RuntimeConfig};
