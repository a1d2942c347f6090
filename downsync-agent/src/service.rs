//! The agent's [`FileService`]: watch subscriptions and file downloads.

use std::path::PathBuf;

use async_trait::async_trait;
use downsync_core::FileEvent;
use downsync_tunnel::{DownloadRequest, FileService, FrameSink, WatchRequest, CHUNK_SIZE};
use tokio::io::AsyncReadExt;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::{io_err, AgentError};
use crate::exclude::ExcludeMatcher;

pub struct AgentService {
    events: broadcast::Sender<FileEvent>,
    roots: Vec<PathBuf>,
}

impl AgentService {
    /// `events` is the watch loop's publisher; every `watch` call subscribes
    /// to it independently.
    pub fn new(events: broadcast::Sender<FileEvent>, roots: Vec<PathBuf>) -> Self {
        Self { events, roots }
    }
}

#[async_trait]
impl FileService for AgentService {
    type Error = AgentError;

    async fn watch(&self, request: WatchRequest, sink: FrameSink) -> Result<(), AgentError> {
        let filter = ExcludeMatcher::new(&self.roots, &request.excludes);
        let mut events = self.events.subscribe();
        tracing::info!(
            id = sink.id(),
            roots = ?self.roots,
            excludes = ?request.excludes,
            "watch subscriber attached"
        );

        loop {
            let received = tokio::select! {
                _ = sink.closed() => break,
                received = events.recv() => received,
            };
            match received {
                Ok(event) => {
                    if filter.matches(&event.path) {
                        continue;
                    }
                    sink.send_event(event).await?;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(id = sink.id(), skipped, "watch subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }

        tracing::info!(id = sink.id(), "watch subscriber detached");
        Ok(())
    }

    async fn download_file(
        &self,
        request: DownloadRequest,
        sink: FrameSink,
    ) -> Result<(), AgentError> {
        let path = request.path;
        let mut file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| io_err(&path, e))?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0usize;
        loop {
            let n = file.read(&mut buf).await.map_err(|e| io_err(&path, e))?;
            if n == 0 {
                break;
            }
            sink.send_chunk(&buf[..n]).await?;
            total += n;
        }
        tracing::debug!(path = %path.display(), bytes = total, "file served");
        Ok(())
    }
}
