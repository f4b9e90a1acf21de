//! Daemon configuration file
//!
//! A YAML document; every key is optional and unknown keys are rejected.
//!
//! ```yaml
//! name: Grandma-Sharon
//! mode: master
//! slaves: ["10.0.0.2:12345", "10.0.0.3:12345"]
//! secret: GrandmaService
//! queue_length: 1000
//! msg_types: [106, 107, 109]
//! data_dir: /var/lib/grandma
//! ```

use crate::error::{DaemonError, Result};
use grandma_cluster::{ClusterConfig, ClusterMode, DEFAULT_NODE_NAME};
use grandma_core::{NotificationKind, MAX_DELAY_MS};
use grandma_scheduler::config::DEFAULT_HORIZON_MS;
use grandma_scheduler::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Accepted range for `queue_length`
pub const QUEUE_LENGTH_RANGE: std::ops::RangeInclusive<usize> = 10..=1_000_000;

/// Daemon settings as read from the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Instance name, announced to peers and used as storage namespace
    pub name: String,

    pub mode: ClusterMode,

    /// Cluster listen address (slave mode)
    pub network_addr: String,

    /// Slave addresses (master mode)
    pub slaves: Vec<String>,

    /// Shared cluster secret; empty disables authentication
    pub secret: Option<String>,

    /// Capacity of every send queue and the delivery queue
    pub queue_length: usize,

    /// Supported message kinds
    pub msg_types: Vec<i64>,

    /// Delays above this are held for this long
    pub ttl_max_ms: i64,

    /// Where records are persisted; in-memory when unset
    pub data_dir: Option<PathBuf>,

    pub handshake_timeout_ms: u64,

    pub ack_timeout_ms: u64,

    pub reconnect_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let cluster = ClusterConfig::standalone();
        Self {
            name: DEFAULT_NODE_NAME.to_string(),
            mode: ClusterMode::Standalone,
            network_addr: "0.0.0.0:12345".to_string(),
            slaves: vec![],
            secret: None,
            queue_length: cluster.queue_length,
            msg_types: NotificationKind::ALL.iter().map(|k| k.code() as i64).collect(),
            ttl_max_ms: DEFAULT_HORIZON_MS,
            data_dir: None,
            handshake_timeout_ms: cluster.handshake_timeout.as_millis() as u64,
            ack_timeout_ms: cluster.ack_timeout.as_millis() as u64,
            reconnect_interval_ms: cluster.reconnect_interval.as_millis() as u64,
        }
    }
}

impl DaemonConfig {
    /// Load and validate a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| DaemonError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DaemonError::InvalidConfig("name must not be empty".into()));
        }
        if !QUEUE_LENGTH_RANGE.contains(&self.queue_length) {
            return Err(DaemonError::InvalidConfig(format!(
                "queue_length {} outside {}..={}",
                self.queue_length,
                QUEUE_LENGTH_RANGE.start(),
                QUEUE_LENGTH_RANGE.end()
            )));
        }
        if self.msg_types.is_empty() {
            return Err(DaemonError::InvalidConfig("msg_types must not be empty".into()));
        }
        self.supported_kinds()?;
        if self.ttl_max_ms <= 0 || self.ttl_max_ms > MAX_DELAY_MS {
            return Err(DaemonError::InvalidConfig(format!(
                "ttl_max_ms {} outside 1..={}",
                self.ttl_max_ms, MAX_DELAY_MS
            )));
        }
        if self.mode == ClusterMode::Master && self.slaves.is_empty() {
            return Err(DaemonError::InvalidConfig(
                "master mode needs at least one slave".into(),
            ));
        }
        Ok(())
    }

    /// `msg_types` as kinds
    pub fn supported_kinds(&self) -> Result<Vec<NotificationKind>> {
        self.msg_types
            .iter()
            .map(|code| {
                NotificationKind::from_code(*code).ok_or_else(|| {
                    DaemonError::InvalidConfig(format!("unknown message type {}", code))
                })
            })
            .collect()
    }

    pub fn cluster_config(&self) -> Result<ClusterConfig> {
        let base = match self.mode {
            ClusterMode::Standalone => ClusterConfig::standalone(),
            ClusterMode::Master => ClusterConfig::master(self.slaves.clone()),
            ClusterMode::Slave => ClusterConfig::slave(self.network_addr.clone()),
        };
        let config = base
            .node_name(self.name.clone())
            .secret(self.secret.clone())
            .queue_length(self.queue_length)
            .supported_kinds(self.supported_kinds()?)
            .handshake_timeout(Duration::from_millis(self.handshake_timeout_ms))
            .ack_timeout(Duration::from_millis(self.ack_timeout_ms))
            .reconnect_interval(Duration::from_millis(self.reconnect_interval_ms));
        config.validate()?;
        Ok(config)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
            .horizon_ms(self.ttl_max_ms)
            .delivery_queue_length(self.queue_length)
    }
}
