//! Downstream downloader for pods in a Kubernetes namespace.
//!
//! `start` lists running pods, resolves a sync policy per container and
//! spawns one session per match. A session opens a tunnel into its
//! container, subscribes to the agent's watch stream and mirrors every
//! MODIFY event that maps to a local destination, skipping destinations
//! whose cached hash already matches.
//!
//! Sessions are independent: a tunnel that fails to open, or a stream that
//! dies, ends only its own session. Nothing after `start` returns reaches
//! the caller except through the session summaries.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use downsync_core::resolver::resolve;
use downsync_core::{ArtifactGraph, BuildArtifact, EventType, FileEvent, ImageTag, SyncPolicy};
use downsync_tunnel::RpcClient;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cluster::{kill_tunnel_process, Cluster, Tunnel};
use crate::downloader::Downloader;
use crate::error::SyncError;
use crate::hash_cache::SyncedHashCache;
use crate::mapping::local_destination;
use crate::writer::write_download;

/// Why a session stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Cancelled,
    StreamClosed,
    Failed(String),
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Cancelled => write!(f, "cancelled"),
            SessionEnd::StreamClosed => write!(f, "watch stream closed"),
            SessionEnd::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub pod: String,
    pub container: String,
    pub started_at: DateTime<Utc>,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub end: SessionEnd,
}

/// One container to mirror.
#[derive(Debug, Clone)]
struct SessionTarget {
    pod: String,
    container: String,
    image: ImageTag,
    policy: SyncPolicy,
}

pub struct KubernetesDownloader {
    cluster: Arc<dyn Cluster>,
    namespace: String,
    peer_command: Vec<String>,
    graph: ArtifactGraph,
    cache: Arc<SyncedHashCache>,
    sessions: Mutex<Vec<JoinHandle<SessionSummary>>>,
}

impl KubernetesDownloader {
    pub fn new(
        cluster: Arc<dyn Cluster>,
        namespace: impl Into<String>,
        peer_command: Vec<String>,
        graph: ArtifactGraph,
        cache: Arc<SyncedHashCache>,
    ) -> Self {
        Self {
            cluster,
            namespace: namespace.into(),
            peer_command,
            graph,
            cache,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Wait for every session spawned so far to end.
    pub async fn join_sessions(&self) -> Vec<SessionSummary> {
        let handles: Vec<_> = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            sessions.drain(..).collect()
        };
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await {
                Ok(summary) => summaries.push(summary),
                Err(err) => tracing::error!(error = %err, "sync session task join failure"),
            }
        }
        summaries
    }

    async fn discover(&self, builds: &[BuildArtifact]) -> Result<Vec<SessionTarget>, SyncError> {
        let pods = self.cluster.list_pods(&self.namespace).await?;
        let mut targets = Vec::new();
        for pod in pods {
            for container in pod.containers {
                let Some(policy) = resolve(&self.graph, builds, &container.image) else {
                    continue;
                };
                targets.push(SessionTarget {
                    pod: pod.name.clone(),
                    container: container.name,
                    image: container.image,
                    policy: policy.clone(),
                });
            }
        }
        Ok(targets)
    }
}

#[async_trait]
impl Downloader for KubernetesDownloader {
    async fn start(
        &self,
        builds: &[BuildArtifact],
        cancel: CancellationToken,
    ) -> Result<(), SyncError> {
        let targets = self.discover(builds).await?;
        tracing::info!(
            namespace = %self.namespace,
            sessions = targets.len(),
            "starting downstream sync"
        );

        let mut spawned = Vec::with_capacity(targets.len());
        for target in targets {
            let session = Session {
                cluster: self.cluster.clone(),
                namespace: self.namespace.clone(),
                peer_command: self.peer_command.clone(),
                cache: self.cache.clone(),
                cancel: cancel.child_token(),
                target,
            };
            spawned.push(tokio::spawn(session.run()));
        }
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(spawned);
        Ok(())
    }

    /// Sessions end through the token given to `start`.
    async fn stop(&self) -> Result<(), SyncError> {
        Ok(())
    }
}

struct Session {
    cluster: Arc<dyn Cluster>,
    namespace: String,
    peer_command: Vec<String>,
    cache: Arc<SyncedHashCache>,
    cancel: CancellationToken,
    target: SessionTarget,
}

impl Session {
    async fn run(self) -> SessionSummary {
        let mut summary = SessionSummary {
            pod: self.target.pod.clone(),
            container: self.target.container.clone(),
            started_at: Utc::now(),
            downloaded: 0,
            skipped: 0,
            failed: 0,
            end: SessionEnd::StreamClosed,
        };
        let end = self.mirror(&mut summary).await;
        summary.end = end;
        self.cancel.cancel();

        tracing::info!(
            pod = %summary.pod,
            container = %summary.container,
            started_at = %summary.started_at.to_rfc3339(),
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            end = %summary.end,
            "sync session ended"
        );
        summary
    }

    async fn mirror(&self, summary: &mut SessionSummary) -> SessionEnd {
        let target = &self.target;
        let opened = tokio::select! {
            _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
            opened = self.cluster.open_tunnel(
                &self.namespace,
                &target.pod,
                &target.container,
                &self.peer_command,
            ) => opened,
        };
        let Tunnel { transport, process } = match opened {
            Ok(tunnel) => tunnel,
            Err(err) => {
                tracing::warn!(
                    pod = %target.pod,
                    container = %target.container,
                    error = %err,
                    "failed to open tunnel"
                );
                return SessionEnd::Failed(err.to_string());
            }
        };
        tracing::info!(
            pod = %target.pod,
            container = %target.container,
            image = %target.image,
            "tunnel open"
        );

        let client = RpcClient::connect(transport, self.cancel.clone());
        let end = self.follow(&client, summary).await;
        client.shutdown();
        if let Some(process) = process {
            kill_tunnel_process(process).await;
        }
        end
    }

    async fn follow(&self, client: &RpcClient, summary: &mut SessionSummary) -> SessionEnd {
        let mut watch = match client.watch(self.target.policy.excludes.clone()).await {
            Ok(watch) => watch,
            Err(err) => return SessionEnd::Failed(err.to_string()),
        };

        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Cancelled,
                next = watch.next() => next,
            };
            match next {
                None => return SessionEnd::StreamClosed,
                Some(Err(_)) if self.cancel.is_cancelled() => return SessionEnd::Cancelled,
                Some(Err(err)) => return SessionEnd::Failed(err.to_string()),
                Some(Ok(event)) => self.apply(client, &event, summary).await,
            }
        }
    }

    /// Mirror one event to every destination it maps to.
    async fn apply(&self, client: &RpcClient, event: &FileEvent, summary: &mut SessionSummary) {
        if event.event_type != EventType::Modify {
            return;
        }
        let Some(hash) = &event.content_hash else {
            tracing::debug!(path = %event.path.display(), "modify event without hash");
            return;
        };

        for entry in &self.target.policy.entries {
            let Some(destination) = local_destination(entry, &event.path) else {
                continue;
            };
            if !self.cache.record_if_changed(&destination, hash) {
                tracing::info!(destination = %destination.display(), "already synced");
                summary.skipped += 1;
                continue;
            }
            tracing::info!(
                destination = %destination.display(),
                remote = %event.path.display(),
                "downloading"
            );
            match download(client, &event.path, &destination).await {
                Ok(bytes) => {
                    tracing::debug!(destination = %destination.display(), bytes, "download complete");
                    summary.downloaded += 1;
                }
                Err(err) => {
                    tracing::warn!(
                        destination = %destination.display(),
                        remote = %event.path.display(),
                        error = %err,
                        "download failed"
                    );
                    summary.failed += 1;
                }
            }
        }
    }
}

async fn download(client: &RpcClient, remote: &Path, destination: &Path) -> Result<u64, SyncError> {
    let stream = client.download_file(remote).await?;
    write_download(destination, stream).await
}
