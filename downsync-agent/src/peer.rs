//! The tunnel peer: `downsync connect`, run under `kubectl exec -i` inside
//! the workload container.

use std::path::Path;

use downsync_tunnel::relay;
use tokio::net::UnixStream;

use crate::error::{io_err, AgentError};

/// Relay this process's stdin/stdout to the agent socket until the agent
/// side closes.
pub async fn connect(socket: &Path) -> Result<(), AgentError> {
    let stream = UnixStream::connect(socket)
        .await
        .map_err(|e| io_err(socket, e))?;
    tracing::debug!(socket = %socket.display(), "relaying tunnel to agent");
    relay(tokio::io::stdin(), tokio::io::stdout(), stream)
        .await
        .map_err(|e| io_err(socket, e))
}

/// Blocking entry point for the CLI.
pub fn connect_blocking(socket: &Path) -> Result<(), AgentError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    let result = runtime.block_on(connect(socket));
    // A stdin read may still be parked on a blocking thread; don't wait for it.
    runtime.shutdown_background();
    result
}
