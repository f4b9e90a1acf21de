//! Daemon errors

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DaemonError>;

#[derive(Debug, Error)]
pub enum DaemonError {
    // ==================== Configuration Errors ====================
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ==================== Startup Errors ====================
    #[error("recovery failed: {0}")]
    Recovery(#[source] grandma_core::Error),

    #[error(transparent)]
    Core(#[from] grandma_core::Error),

    #[error(transparent)]
    Cluster(#[from] grandma_cluster::ClusterError),
}
