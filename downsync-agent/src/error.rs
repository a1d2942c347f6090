use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the agent: watching, serving, and supervising the app.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("rpc error: {0}")]
    Rpc(#[from] downsync_tunnel::RpcError),

    #[error("agent socket already in use: {socket}")]
    SocketInUse { socket: PathBuf },

    #[error("no application command given")]
    MissingCommand,

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent runtime error: {0}")]
    Runtime(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> AgentError {
    AgentError::Io {
        path: path.into(),
        source,
    }
}
