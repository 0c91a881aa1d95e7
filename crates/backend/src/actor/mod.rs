//! Actor-based concurrency primitives
//!
//! Components communicate via message passing instead of shared state:
//!
//! - [`SessionActor`](session::SessionActor): one per client id, consumes its
//!   transport's lifecycle events and publishes a status
//! - [`SessionRegistry`]: maps client ids to sessions, spawning on demand
//! - [`DispatchQueue`]: the single FIFO every source feeds, drained by one worker
//! - [`WatchSource`](watcher::WatchSource): folder watcher producing jobs
//! - [`upload`]: turns uploaded documents into jobs
//!
//! ```text
//! WatchSource ─┐
//!              ├─▶ DispatchQueue ─▶ worker ─▶ SessionRegistry ─▶ Transport
//! upload ──────┘
//! ```
//!
//! Progress flows back to the originating connection through a [`Reporter`].

pub mod dispatch;
pub mod handle;
pub mod message;
pub mod registry;
pub mod session;
pub mod upload;
pub mod watcher;

#[cfg(test)]
mod __tests__;

pub use dispatch::{DispatchQueue, DispatchStats};
pub use handle::{Reporter, SendError};
pub use registry::SessionRegistry;
pub use session::{SessionHandle, SessionState, SessionStatus};
pub use watcher::{WatchSource, WatchTarget, WatcherError};
