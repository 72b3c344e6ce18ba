//! Discovery service error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that stop a run before any connector is contacted.
///
/// Everything after startup (failed scopes, skipped connectors, rejected
/// sends) is reported in the [`RunReport`](crate::RunReport) instead.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid YAML for the expected shape.
    #[error("cannot parse config {origin}: {source}")]
    ConfigParse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    /// Config parsed but holds an unusable value.
    #[error("invalid config: {message}")]
    ConfigInvalid { message: String },
}

impl DiscoveryError {
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            DiscoveryError::ConfigRead { .. }
                | DiscoveryError::ConfigParse { .. }
                | DiscoveryError::ConfigInvalid { .. }
        )
    }
}
