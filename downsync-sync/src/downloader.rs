//! The uniform downloader surface driven by the dev loop.

use std::sync::Arc;

use async_trait::async_trait;
use downsync_core::BuildArtifact;
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;

#[async_trait]
pub trait Downloader: Send + Sync {
    /// Begin syncing for the given build outputs. Returns once work is
    /// scheduled; cancelling `cancel` ends it.
    async fn start(
        &self,
        builds: &[BuildArtifact],
        cancel: CancellationToken,
    ) -> Result<(), SyncError>;

    async fn stop(&self) -> Result<(), SyncError>;
}

#[async_trait]
impl<D: Downloader + ?Sized> Downloader for Arc<D> {
    async fn start(
        &self,
        builds: &[BuildArtifact],
        cancel: CancellationToken,
    ) -> Result<(), SyncError> {
        (**self).start(builds, cancel).await
    }

    async fn stop(&self) -> Result<(), SyncError> {
        (**self).stop().await
    }
}

/// Drives several downloaders in order, stopping at the first error.
#[derive(Default)]
pub struct DownloaderMux {
    members: Vec<Box<dyn Downloader>>,
}

impl DownloaderMux {
    pub fn new(members: Vec<Box<dyn Downloader>>) -> Self {
        Self { members }
    }

    pub fn push(&mut self, member: Box<dyn Downloader>) {
        self.members.push(member);
    }
}

#[async_trait]
impl Downloader for DownloaderMux {
    async fn start(
        &self,
        builds: &[BuildArtifact],
        cancel: CancellationToken,
    ) -> Result<(), SyncError> {
        for member in &self.members {
            member.start(builds, cancel.clone()).await?;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), SyncError> {
        for member in &self.members {
            member.stop().await?;
        }
        Ok(())
    }
}

/// Used when downstream sync is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDownloader;

#[async_trait]
impl Downloader for NoopDownloader {
    async fn start(
        &self,
        _builds: &[BuildArtifact],
        _cancel: CancellationToken,
    ) -> Result<(), SyncError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), SyncError> {
        Ok(())
    }
}
