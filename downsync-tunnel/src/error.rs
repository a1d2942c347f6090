use thiserror::Error;

/// Error surface for the tunnel transport and the RPC layer on top of it.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid chunk encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("request cancelled")]
    Cancelled,

    #[error("remote error: {0}")]
    Remote(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}
