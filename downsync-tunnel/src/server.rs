//! Server side of the tunnel protocol.
//!
//! [`serve_connection`] reads request lines from one connection and runs each
//! call on its own task, so a long-lived `watch` never blocks a
//! `download_file` issued on the same tunnel. All frames go through a single
//! writer task.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use downsync_core::FileEvent;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;
use crate::protocol::{encode_line, Call, DownloadRequest, Frame, RpcRequest, WatchRequest};

/// The two streaming operations an agent exposes.
#[async_trait]
pub trait FileService: Send + Sync + 'static {
    type Error: Display + Send;

    /// Emit events into `sink` until the source ends or the sink closes.
    async fn watch(&self, request: WatchRequest, sink: FrameSink) -> Result<(), Self::Error>;

    /// Emit the file's bytes into `sink` as chunks, then return.
    async fn download_file(
        &self,
        request: DownloadRequest,
        sink: FrameSink,
    ) -> Result<(), Self::Error>;
}

/// Outgoing frame channel for one request id.
#[derive(Clone)]
pub struct FrameSink {
    id: u64,
    tx: mpsc::Sender<String>,
}

impl FrameSink {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn send_event(&self, event: FileEvent) -> Result<(), RpcError> {
        self.send(Frame::event(self.id, event)).await
    }

    pub async fn send_chunk(&self, bytes: &[u8]) -> Result<(), RpcError> {
        self.send(Frame::chunk(self.id, bytes)).await
    }

    /// Resolves once the connection's writer has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    async fn send(&self, frame: Frame) -> Result<(), RpcError> {
        let line = encode_line(&frame)?;
        self.tx
            .send(line)
            .await
            .map_err(|_| RpcError::ChannelClosed("connection writer"))
    }
}

/// Serve requests from `transport` until it reaches EOF or `shutdown` fires.
/// In-flight calls are aborted when the connection ends.
pub async fn serve_connection<T, S>(
    transport: T,
    service: Arc<S>,
    shutdown: CancellationToken,
) -> Result<(), RpcError>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    S: FileService,
{
    let (reader, mut writer) = tokio::io::split(transport);
    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(64);

    let writer_handle = tokio::spawn(async move {
        while let Some(line) = frame_rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await?;
        }
        writer.shutdown().await
    });

    let mut in_flight: HashMap<u64, JoinHandle<()>> = HashMap::new();
    let mut lines = BufReader::new(reader).lines();

    let result = loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break Ok(()),
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(err) => break Err(RpcError::Io(err)),
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(error = %err, "invalid request line");
                let id = request_id(&line).unwrap_or(0);
                let reply = match encode_line(&Frame::error(id, format!("invalid request: {err}"))) {
                    Ok(reply) => reply,
                    Err(err) => break Err(err),
                };
                if frame_tx.send(reply).await.is_err() {
                    break Ok(());
                }
                continue;
            }
        };

        in_flight.retain(|_, handle| !handle.is_finished());
        match request.call {
            Call::Cancel { target } => {
                if let Some(handle) = in_flight.remove(&target) {
                    tracing::debug!(id = target, "request cancelled by client");
                    handle.abort();
                }
            }
            call => {
                let sink = FrameSink {
                    id: request.id,
                    tx: frame_tx.clone(),
                };
                let handle = tokio::spawn(dispatch(service.clone(), call, sink));
                in_flight.insert(request.id, handle);
            }
        }
    };

    for (_, handle) in in_flight.drain() {
        handle.abort();
    }
    drop(frame_tx);
    match writer_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::debug!(error = %err, "connection writer stopped"),
        Err(err) => tracing::debug!(error = %err, "connection writer join failure"),
    }
    result
}

async fn dispatch<S: FileService>(service: Arc<S>, call: Call, sink: FrameSink) {
    let id = sink.id;
    let tx = sink.tx.clone();
    let outcome = match call {
        Call::Watch(request) => service.watch(request, sink).await,
        Call::DownloadFile(request) => service.download_file(request, sink).await,
        Call::Cancel { .. } => return,
    };
    let frame = match outcome {
        Ok(()) => Frame::end(id),
        Err(err) => {
            tracing::debug!(id, error = %err, "request failed");
            Frame::error(id, err.to_string())
        }
    };
    if let Ok(line) = encode_line(&frame) {
        let _ = tx.send(line).await;
    }
}

/// Best-effort id recovery from a line that failed to parse as a request.
fn request_id(line: &str) -> Option<u64> {
    serde_json::from_str::<serde_json::Value>(line)
        .ok()?
        .get("id")?
        .as_u64()
}
