//! Domain types for downstream sync.
//!
//! All local filesystem paths use `PathBuf`. Remote paths (paths inside the
//! workload) are also `PathBuf` but are never touched on the local machine.
//! Every type is serde-serializable; the YAML config and the JSON wire
//! protocol share these definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Canonical image name of a build artifact (e.g. `gcr.io/acme/api`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageName(pub String);

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ImageName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ImageName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Fully qualified image reference produced by a build, as reported by a
/// running container (e.g. `gcr.io/acme/api:4f1c2e`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageTag(pub String);

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ImageTag {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ImageTag {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Lowercase hex SHA-256 digest of a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ContentHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContentHash {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Sync policy
// ---------------------------------------------------------------------------

/// One remote-to-local directory mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEntry {
    /// Directory inside the workload. `"."` matches every path.
    pub remote_src: PathBuf,
    /// Local directory that mirrors `remote_src`.
    pub local_dst: PathBuf,
}

/// Downstream sync rules declared for one build artifact.
///
/// Immutable once resolved; a new graph is built when the artifact set
/// changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SyncPolicy {
    #[serde(default)]
    pub entries: Vec<SyncEntry>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// A build artifact as declared in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub image: ImageName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downstream_sync: Option<SyncPolicy>,
}

/// One build output: the artifact's image name and the tag it was pushed as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub image_name: ImageName,
    pub tag: ImageTag,
}

/// Image name → artifact, rebuilt whenever the artifact set changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactGraph {
    artifacts: HashMap<ImageName, Artifact>,
}

impl ArtifactGraph {
    pub fn new(artifacts: impl IntoIterator<Item = Artifact>) -> Self {
        Self {
            artifacts: artifacts
                .into_iter()
                .map(|artifact| (artifact.image.clone(), artifact))
                .collect(),
        }
    }

    pub fn get(&self, image: &ImageName) -> Option<&Artifact> {
        self.artifacts.get(image)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

// ---------------------------------------------------------------------------
// File events
// ---------------------------------------------------------------------------

/// Event vocabulary produced by the agent's classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Create,
    Modify,
    Delete,
    Rename,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Create => write!(f, "CREATE"),
            EventType::Modify => write!(f, "MODIFY"),
            EventType::Delete => write!(f, "DELETE"),
            EventType::Rename => write!(f, "RENAME"),
        }
    }
}

/// A single classified filesystem change inside the workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEvent {
    /// Absolute path inside the workload.
    pub path: PathBuf,
    pub event_type: EventType,
    /// Present only on `Modify` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,
    /// Assigned monotonically by the agent; not consumed downstream.
    #[serde(default)]
    pub sequence: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
