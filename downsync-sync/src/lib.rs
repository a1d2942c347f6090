//! downsync controller side.
//!
//! - [`downloader`]: the `Downloader` trait, mux and no-op variant
//! - [`controller`]: `KubernetesDownloader`, one session per matching container
//! - [`cluster`]: pod discovery and remote exec (`kubectl`)
//! - [`hash_cache`]: last synced hash per destination
//! - [`mapping`]: remote path → local destination
//! - [`writer`]: atomic destination writes

pub mod cluster;
pub mod controller;
pub mod downloader;
pub mod error;
pub mod hash_cache;
pub mod mapping;
pub mod writer;

pub use cluster::{Cluster, Container, KubectlCluster, Pod, Tunnel};
pub use controller::{KubernetesDownloader, SessionEnd, SessionSummary};
pub use downloader::{Downloader, DownloaderMux, NoopDownloader};
pub use error::SyncError;
pub use hash_cache::SyncedHashCache;
