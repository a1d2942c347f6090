//! Controller configuration, stored as YAML.
//!
//! # Layout
//!
//! ```yaml
//! namespace: dev
//! kube_context: kind-dev        # optional
//! kubectl: kubectl              # optional, binary to invoke
//! peer_command: ["/downsync/downsync", "connect"]
//! artifacts:
//!   - image: gcr.io/acme/api
//!     downstream_sync:
//!       excludes: ["*.tmp"]
//!       entries:
//!         - remote_src: /app/src
//!           local_dst: ./src
//! builds:
//!   - image_name: gcr.io/acme/api
//!     tag: gcr.io/acme/api:4f1c2e
//! ```
//!
//! `builds` is normally supplied by the build pipeline; the CLI can append
//! extra entries with `--build image=tag`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{io_err, ConfigError};
use crate::types::{Artifact, ArtifactGraph, BuildArtifact, ImageName, ImageTag};

/// Default file name looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "downsync.yaml";

/// Command executed inside a container to reach the agent's socket.
pub const DEFAULT_PEER_COMMAND: &[&str] = &["/downsync/downsync", "connect"];

fn default_namespace() -> String {
    "default".to_string()
}

fn default_kubectl() -> PathBuf {
    PathBuf::from("kubectl")
}

fn default_peer_command() -> Vec<String> {
    DEFAULT_PEER_COMMAND.iter().map(|s| s.to_string()).collect()
}

/// Root of the controller YAML config.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControllerConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub kube_context: Option<String>,
    #[serde(default = "default_kubectl")]
    pub kubectl: PathBuf,
    #[serde(default = "default_peer_command")]
    pub peer_command: Vec<String>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub builds: Vec<BuildArtifact>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            kube_context: None,
            kubectl: default_kubectl(),
            peer_command: default_peer_command(),
            artifacts: vec![],
            builds: vec![],
        }
    }
}

impl ControllerConfig {
    /// Index the declared artifacts by image name.
    ///
    /// Returns `ConfigError::DuplicateArtifact` when an image is declared twice.
    pub fn artifact_graph(&self) -> Result<ArtifactGraph, ConfigError> {
        let mut seen = HashSet::new();
        for artifact in &self.artifacts {
            if !seen.insert(&artifact.image) {
                return Err(ConfigError::DuplicateArtifact(artifact.image.0.clone()));
            }
        }
        Ok(ArtifactGraph::new(self.artifacts.iter().cloned()))
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load the controller config from `path`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(path: &Path) -> Result<ControllerConfig, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Parse an `image=tag` build reference.
pub fn parse_build(raw: &str) -> Result<BuildArtifact, ConfigError> {
    match raw.split_once('=') {
        Some((image, tag)) if !image.trim().is_empty() && !tag.trim().is_empty() => {
            Ok(BuildArtifact {
                image_name: ImageName::from(image.trim()),
                tag: ImageTag::from(tag.trim()),
            })
        }
        _ => Err(ConfigError::InvalidBuild(raw.to_string())),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
