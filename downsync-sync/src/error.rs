//! Error types for downsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use downsync_tunnel::RpcError;

/// All errors that can arise on the controller side.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Tunnel or RPC failure.
    #[error("rpc error: {0}")]
    Rpc(#[from] RpcError),

    /// `kubectl` could not be started.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// `kubectl` ran but reported failure.
    #[error("`{command}` exited with {status}: {stderr}")]
    Kubectl {
        command: String,
        status: String,
        stderr: String,
    },

    /// Pod listing JSON did not parse.
    #[error("pod list JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A pipe the tunnel needs was not captured.
    #[error("tunnel setup failed: {0}")]
    Tunnel(String),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
