//! downsync core library: domain types, controller config, policy resolution.
//!
//! - [`types`]: newtypes, sync policies, artifact graph, file events
//! - [`config`]: YAML controller config load / save
//! - [`resolver`]: container image → sync policy
//! - [`error`]: [`ConfigError`]

pub mod config;
pub mod error;
pub mod resolver;
pub mod types;

pub use config::ControllerConfig;
pub use error::ConfigError;
pub use types::{
    Artifact, ArtifactGraph, BuildArtifact, ContentHash, EventType, FileEvent, ImageName,
    ImageTag, SyncEntry, SyncPolicy,
};
