//! The in-container side of downsync.
//!
//! The agent supervises the application, watches the target directories and
//! serves `watch` / `download_file` over a unix socket. [`connect`] is the
//! tunnel peer that bridges a `kubectl exec` session to that socket.

mod error;
pub mod exclude;
pub mod paths;
mod peer;
mod runtime;
pub mod service;
pub mod watch;

pub use error::AgentError;
pub use exclude::ExcludeMatcher;
pub use paths::{is_system_path, DEFAULT_SOCKET_PATH};
pub use peer::{connect, connect_blocking};
pub use runtime::{init_tracing, run, start_blocking, AgentOptions};
pub use service::AgentService;
