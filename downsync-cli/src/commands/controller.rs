//! `downsync controller`: mirror matching containers until ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;

use downsync_core::config::{self, CONFIG_FILE_NAME};
use downsync_core::BuildArtifact;
use downsync_sync::{
    Downloader, DownloaderMux, KubectlCluster, KubernetesDownloader, NoopDownloader,
    SyncedHashCache,
};

#[derive(Args, Debug)]
pub struct ControllerArgs {
    /// Controller config file.
    #[arg(long, default_value = CONFIG_FILE_NAME)]
    pub config: PathBuf,

    /// Extra build output as `image=tag`; may be repeated.
    #[arg(long = "build", value_name = "IMAGE=TAG", value_parser = parse_build)]
    pub builds: Vec<BuildArtifact>,

    /// Override the namespace from the config file.
    #[arg(long)]
    pub namespace: Option<String>,
}

fn parse_build(raw: &str) -> std::result::Result<BuildArtifact, String> {
    config::parse_build(raw).map_err(|e| e.to_string())
}

impl ControllerArgs {
    pub fn run(self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start tokio runtime")?;
        runtime.block_on(self.run_async())
    }

    async fn run_async(self) -> Result<()> {
        let mut cfg = config::load_at(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        if let Some(namespace) = self.namespace {
            cfg.namespace = namespace;
        }
        let mut builds = cfg.builds.clone();
        builds.extend(self.builds);

        let graph = cfg.artifact_graph().context("invalid artifacts in config")?;
        let has_policy = cfg.artifacts.iter().any(|a| a.downstream_sync.is_some());

        let cancel = CancellationToken::new();
        let mut mux = DownloaderMux::default();
        let kubernetes = if has_policy {
            let cluster = Arc::new(KubectlCluster::new(
                cfg.kubectl.clone(),
                cfg.kube_context.clone(),
            ));
            let downloader = Arc::new(KubernetesDownloader::new(
                cluster,
                cfg.namespace.clone(),
                cfg.peer_command.clone(),
                graph,
                Arc::new(SyncedHashCache::new()),
            ));
            mux.push(Box::new(downloader.clone()));
            Some(downloader)
        } else {
            tracing::info!("no artifact has a downstream_sync policy; sync disabled");
            mux.push(Box::new(NoopDownloader));
            None
        };

        mux.start(&builds, cancel.clone())
            .await
            .context("failed to start downstream sync")?;

        tokio::signal::ctrl_c()
            .await
            .context("ctrl-c handler failed")?;
        tracing::info!("received ctrl-c, stopping downstream sync");
        cancel.cancel();
        mux.stop().await.context("failed to stop downstream sync")?;

        if let Some(kubernetes) = kubernetes {
            let summaries = kubernetes.join_sessions().await;
            let downloaded: usize = summaries.iter().map(|s| s.downloaded).sum();
            println!(
                "{} session(s) ended, {} file(s) downloaded",
                summaries.len(),
                downloaded
            );
        }
        Ok(())
    }
}
