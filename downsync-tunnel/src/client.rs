//! Multiplexed RPC client.
//!
//! One writer task drains outgoing request lines; one reader task routes
//! incoming frames to the stream that owns their request id. Per-stream
//! channels are unbounded: a session holds a watch stream open while it
//! drains a download on the same tunnel, and a full watch queue must never
//! stall delivery of the download's chunks.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use downsync_core::FileEvent;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;
use crate::protocol::{
    decode_chunk, encode_line, Call, DownloadRequest, Frame, FrameBody, RpcRequest, WatchRequest,
};

type PendingMap = Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<FrameBody>>>>;

/// Client side of a tunnel.
pub struct RpcClient {
    write_tx: mpsc::Sender<String>,
    pending: PendingMap,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl RpcClient {
    /// Start the reader and writer tasks over `transport`.
    ///
    /// Cancelling `cancel` (or dropping the client) stops both tasks and ends
    /// every open stream with [`RpcError::Cancelled`]. Must be called from
    /// within a Tokio runtime.
    pub fn connect<T>(transport: T, cancel: CancellationToken) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let cancel = cancel.child_token();
        let (reader, mut writer) = tokio::io::split(transport);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);

        {
            let connected = connected.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        line = write_rx.recv() => {
                            let Some(line) = line else { break };
                            let written = async {
                                writer.write_all(line.as_bytes()).await?;
                                writer.flush().await
                            };
                            if let Err(err) = written.await {
                                tracing::debug!(error = %err, "tunnel write failed");
                                connected.store(false, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                }
                let _ = writer.shutdown().await;
            });
        }

        {
            let pending = pending.clone();
            let connected = connected.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(reader).lines();
                loop {
                    let line = tokio::select! {
                        _ = cancel.cancelled() => break,
                        line = lines.next_line() => line,
                    };
                    match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            match serde_json::from_str::<Frame>(&line) {
                                Ok(frame) => route_frame(&pending, frame),
                                Err(err) => {
                                    tracing::warn!(error = %err, "dropping malformed frame");
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(err) => {
                            tracing::debug!(error = %err, "tunnel read failed");
                            break;
                        }
                    }
                }
                connected.store(false, Ordering::SeqCst);
                // Dropping the senders ends every open stream.
                lock(&pending).clear();
            });
        }

        Self {
            write_tx,
            pending,
            next_id: AtomicU64::new(1),
            connected,
            cancel,
        }
    }

    /// Subscribe to the agent's MODIFY events.
    pub async fn watch(&self, excludes: Vec<String>) -> Result<WatchStream, RpcError> {
        let inner = self
            .open(Call::Watch(WatchRequest { excludes }))
            .await?;
        Ok(WatchStream { inner })
    }

    /// Stream the contents of `path` on the agent's machine.
    pub async fn download_file(&self, path: &Path) -> Result<DownloadStream, RpcError> {
        let inner = self
            .open(Call::DownloadFile(DownloadRequest {
                path: path.to_path_buf(),
            }))
            .await?;
        Ok(DownloadStream { inner })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    /// Stop the reader and writer tasks.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn open(&self, call: Call) -> Result<FrameStream, RpcError> {
        if !self.is_connected() {
            return Err(RpcError::ChannelClosed("tunnel"));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.pending).insert(id, tx);

        let line = encode_line(&RpcRequest { id, call })?;
        if self.write_tx.send(line).await.is_err() {
            lock(&self.pending).remove(&id);
            return Err(RpcError::ChannelClosed("tunnel writer"));
        }

        Ok(FrameStream {
            id,
            rx,
            finished: false,
            pending: self.pending.clone(),
            write_tx: self.write_tx.clone(),
            cancel: self.cancel.clone(),
        })
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<FrameBody>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn route_frame(pending: &PendingMap, frame: Frame) {
    let terminal = frame.body.is_terminal();
    let tx = {
        let mut pending = lock(pending);
        if terminal {
            pending.remove(&frame.id)
        } else {
            pending.get(&frame.id).cloned()
        }
    };
    let Some(tx) = tx else {
        tracing::trace!(id = frame.id, "frame for unknown or finished request");
        return;
    };
    if tx.send(frame.body).is_err() {
        lock(pending).remove(&frame.id);
    }
}

/// Untyped frames for one request id.
struct FrameStream {
    id: u64,
    rx: mpsc::UnboundedReceiver<FrameBody>,
    finished: bool,
    pending: PendingMap,
    write_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl FrameStream {
    /// `None` after the terminal frame; a closed channel without a terminal
    /// frame is an error.
    async fn next_body(&mut self) -> Option<Result<FrameBody, RpcError>> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(FrameBody::End) => {
                self.finished = true;
                None
            }
            Some(FrameBody::Error { message }) => {
                self.finished = true;
                Some(Err(RpcError::Remote(message)))
            }
            Some(body) => Some(Ok(body)),
            None => {
                self.finished = true;
                if self.cancel.is_cancelled() {
                    Some(Err(RpcError::Cancelled))
                } else {
                    Some(Err(RpcError::ChannelClosed("tunnel")))
                }
            }
        }
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        lock(&self.pending).remove(&self.id);
        let call = Call::Cancel { target: self.id };
        if let Ok(line) = encode_line(&RpcRequest { id: self.id, call }) {
            let _ = self.write_tx.try_send(line);
        }
    }
}

/// Server-streamed file events from a `watch` call.
pub struct WatchStream {
    inner: FrameStream,
}

impl WatchStream {
    pub async fn next(&mut self) -> Option<Result<FileEvent, RpcError>> {
        match self.inner.next_body().await? {
            Ok(FrameBody::Event { event }) => Some(Ok(event)),
            Ok(other) => Some(Err(unexpected("watch", &other))),
            Err(err) => Some(Err(err)),
        }
    }
}

/// Server-streamed file chunks from a `download_file` call.
pub struct DownloadStream {
    inner: FrameStream,
}

impl DownloadStream {
    pub async fn next(&mut self) -> Option<Result<Vec<u8>, RpcError>> {
        match self.inner.next_body().await? {
            Ok(FrameBody::Chunk { data }) => Some(decode_chunk(&data)),
            Ok(other) => Some(Err(unexpected("download_file", &other))),
            Err(err) => Some(Err(err)),
        }
    }

    /// Drain the stream into memory.
    pub async fn collect(mut self) -> Result<Vec<u8>, RpcError> {
        let mut bytes = Vec::new();
        while let Some(chunk) = self.next().await {
            bytes.extend_from_slice(&chunk?);
        }
        Ok(bytes)
    }
}

fn unexpected(call: &str, body: &FrameBody) -> RpcError {
    RpcError::Protocol(format!("unexpected frame for {call}: {body:?}"))
}
