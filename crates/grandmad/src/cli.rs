//! CLI argument parsing for the Grandma daemon
//!
//! Flags override the matching config file keys.

use crate::config::DaemonConfig;
use crate::error::Result;
use clap::{Parser, ValueEnum};
use grandma_cluster::ClusterMode;
use std::path::PathBuf;

/// Grandma - durable delayed notification scheduling
///
/// Accepts notification requests with a delay, persists them and delivers
/// them when due. Several instances can share the load as one master and
/// any number of slaves.
#[derive(Parser, Debug)]
#[command(name = "grandmad")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, env = "GRANDMA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Instance name
    #[arg(short, long, env = "GRANDMA_NAME")]
    pub name: Option<String>,

    /// Deployment mode
    #[arg(long, env = "GRANDMA_MODE")]
    pub mode: Option<DeploymentMode>,

    /// Cluster listen address (slave mode)
    #[arg(long, env = "GRANDMA_NETWORK_ADDR")]
    pub network_addr: Option<String>,

    /// Slave addresses (comma-separated, master mode)
    #[arg(long, value_delimiter = ',', env = "GRANDMA_SLAVES")]
    pub slaves: Vec<String>,

    /// Data directory for persisted records
    #[arg(short, long, env = "GRANDMA_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,
}

/// Deployment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeploymentMode {
    Standalone,
    Master,
    Slave,
}

impl From<DeploymentMode> for ClusterMode {
    fn from(mode: DeploymentMode) -> Self {
        match mode {
            DeploymentMode::Standalone => ClusterMode::Standalone,
            DeploymentMode::Master => ClusterMode::Master,
            DeploymentMode::Slave => ClusterMode::Slave,
        }
    }
}

impl Cli {
    /// Read the config file (if any) and apply flag overrides
    pub fn load_config(&self) -> Result<DaemonConfig> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::from_file(path)?,
            None => DaemonConfig::default(),
        };

        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if let Some(addr) = &self.network_addr {
            config.network_addr = addr.clone();
        }
        if !self.slaves.is_empty() {
            config.slaves = self.slaves.clone();
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = Some(dir.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let cli = Cli::parse_from(["grandmad"]);
        let config = cli.load_config().unwrap();
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grandma.yaml");
        std::fs::write(&path, "name: From-File\nqueue_length: 50\n").unwrap();

        let cli = Cli::parse_from([
            "grandmad",
            "--config",
            path.to_str().unwrap(),
            "--name",
            "From-Flag",
            "--mode",
            "master",
            "--slaves",
            "10.0.0.2:12345,10.0.0.3:12345",
        ]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.name, "From-Flag");
        assert_eq!(config.queue_length, 50);
        assert_eq!(config.mode, ClusterMode::Master);
        assert_eq!(config.slaves.len(), 2);
    }

    #[test]
    fn test_master_flag_needs_slaves() {
        let cli = Cli::parse_from(["grandmad", "--mode", "master"]);
        assert!(cli.load_config().is_err());
    }
}
