//! Error types for downsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from loading controller config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load: includes file path and line context from serde_yaml.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The config file did not exist at the expected path.
    #[error("config not found at {path}")]
    ConfigNotFound { path: PathBuf },

    /// A `--build` argument was not of the form `image=tag`.
    #[error("invalid build reference '{0}'; expected image=tag")]
    InvalidBuild(String),

    /// Two artifacts declared the same image name.
    #[error("artifact image '{0}' is declared more than once")]
    DuplicateArtifact(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
