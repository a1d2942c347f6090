//! Newline-delimited JSON wire format spoken over a tunnel.
//!
//! Requests carry a caller-chosen `id`; every response frame echoes it, so
//! several streaming calls can share one tunnel. A stream ends with exactly
//! one `end` or `error` frame.
//!
//! ```text
//! → {"id":1,"method":"watch","params":{"excludes":["*.tmp"]}}
//! ← {"id":1,"kind":"event","event":{"path":"/app/a.go","event_type":"MODIFY",...}}
//! → {"id":2,"method":"download_file","params":{"path":"/app/a.go"}}
//! ← {"id":2,"kind":"chunk","data":"cGFja2FnZSBtYWlu"}
//! ← {"id":2,"kind":"end"}
//! → {"id":1,"method":"cancel","params":{"target":1}}
//! ```

use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use downsync_core::FileEvent;
use serde::{Deserialize, Serialize};

use crate::error::RpcError;

/// Largest payload carried by one `chunk` frame.
pub const CHUNK_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct WatchRequest {
    #[serde(default)]
    pub excludes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Call {
    Watch(WatchRequest),
    DownloadFile(DownloadRequest),
    /// Stop the stream started by request `target`.
    Cancel { target: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    #[serde(flatten)]
    pub call: Call,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrameBody {
    Event { event: FileEvent },
    /// Base64 of at most [`CHUNK_SIZE`] bytes.
    Chunk { data: String },
    End,
    Error { message: String },
}

impl FrameBody {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FrameBody::End | FrameBody::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub id: u64,
    #[serde(flatten)]
    pub body: FrameBody,
}

impl Frame {
    pub fn event(id: u64, event: FileEvent) -> Self {
        Self {
            id,
            body: FrameBody::Event { event },
        }
    }

    pub fn chunk(id: u64, bytes: &[u8]) -> Self {
        Self {
            id,
            body: FrameBody::Chunk {
                data: STANDARD.encode(bytes),
            },
        }
    }

    pub fn end(id: u64) -> Self {
        Self {
            id,
            body: FrameBody::End,
        }
    }

    pub fn error(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            body: FrameBody::Error {
                message: message.into(),
            },
        }
    }
}

/// Decode the payload of a `chunk` frame.
pub fn decode_chunk(data: &str) -> Result<Vec<u8>, RpcError> {
    Ok(STANDARD.decode(data)?)
}

/// Serialize `message` as one protocol line, newline included.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, RpcError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
