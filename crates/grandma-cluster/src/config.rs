//! Cluster configuration

use crate::error::{ClusterError, Result};
use crate::handshake::{HandshakeConfig, DEFAULT_HANDSHAKE_TIMEOUT};
use grandma_core::NotificationKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default node name
pub const DEFAULT_NODE_NAME: &str = "Grandma-Sharon";

/// Cluster operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClusterMode {
    /// Single node, every request scheduled locally
    #[default]
    Standalone,
    /// Dials the configured slaves and distributes work to them
    Master,
    /// Accepts work from a master
    Slave,
}

/// Load bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Load a slave starts with
    pub slave_initial: u32,
    /// Load the master starts with; slaves busier than this lose to the master
    pub master_initial: u32,
    /// Reserved per request in flight
    pub increment: u32,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            slave_initial: 100,
            master_initial: 320,
            increment: 3,
        }
    }
}

/// Cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Operating mode
    pub mode: ClusterMode,

    /// Name announced in handshakes; also names the storage namespace
    pub node_name: String,

    /// Listen address (slave mode)
    pub network_addr: String,

    /// Slave addresses to dial (master mode)
    pub slaves: Vec<String>,

    /// Shared secret slaves demand from their master
    pub secret: Option<String>,

    /// Capacity of each per-slave send queue
    pub queue_length: usize,

    /// Kinds this node accepts
    pub supported_kinds: Vec<NotificationKind>,

    /// Bound on every handshake read
    pub handshake_timeout: Duration,

    /// How long a forwarded request waits for its acknowledgement
    pub ack_timeout: Duration,

    /// Bound on dialing a slave
    pub connect_timeout: Duration,

    /// Period of the master's heartbeat and reconnect loop
    pub reconnect_interval: Duration,

    /// Delay before the first reconnect round
    pub reconnect_initial_delay: Duration,

    /// Period of a slave's heartbeats to its master
    pub slave_heartbeat_interval: Duration,

    /// Pause before a failed or rejected send is retried
    pub retry_delay: Duration,

    /// Load bookkeeping
    pub load: LoadConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::standalone()
    }
}

impl ClusterConfig {
    /// Single node, no network
    pub fn standalone() -> Self {
        Self {
            mode: ClusterMode::Standalone,
            node_name: DEFAULT_NODE_NAME.to_string(),
            network_addr: "0.0.0.0:7070".to_string(),
            slaves: vec![],
            secret: None,
            queue_length: 1000,
            supported_kinds: NotificationKind::ALL.to_vec(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            ack_timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(5),
            reconnect_interval: Duration::from_secs(5),
            reconnect_initial_delay: Duration::from_secs(5),
            slave_heartbeat_interval: Duration::from_secs(1),
            retry_delay: Duration::from_millis(100),
            load: LoadConfig::default(),
        }
    }

    /// Master dialing `slaves`
    pub fn master(slaves: Vec<impl Into<String>>) -> Self {
        Self {
            mode: ClusterMode::Master,
            slaves: slaves.into_iter().map(Into::into).collect(),
            ..Self::standalone()
        }
    }

    /// Slave listening on `addr`
    pub fn slave(addr: impl Into<String>) -> Self {
        Self {
            mode: ClusterMode::Slave,
            network_addr: addr.into(),
            ..Self::standalone()
        }
    }

    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = name.into();
        self
    }

    pub fn secret(mut self, secret: Option<String>) -> Self {
        self.secret = secret.filter(|s| !s.is_empty());
        self
    }

    pub fn queue_length(mut self, len: usize) -> Self {
        self.queue_length = len;
        self
    }

    pub fn supported_kinds(mut self, kinds: Vec<NotificationKind>) -> Self {
        self.supported_kinds = kinds;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn reconnect_initial_delay(mut self, delay: Duration) -> Self {
        self.reconnect_initial_delay = delay;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn load(mut self, load: LoadConfig) -> Self {
        self.load = load;
        self
    }

    pub fn is_master(&self) -> bool {
        matches!(self.mode, ClusterMode::Master)
    }

    pub fn is_slave(&self) -> bool {
        matches!(self.mode, ClusterMode::Slave)
    }

    pub fn supports(&self, kind: NotificationKind) -> bool {
        self.supported_kinds.contains(&kind)
    }

    /// Handshake settings for this node
    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig::new(self.node_name.clone())
            .with_secret(self.secret.clone())
            .with_timeout(self.handshake_timeout)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_name.is_empty() {
            return Err(ClusterError::InvalidConfig("node name is empty".into()));
        }
        if self.queue_length == 0 {
            return Err(ClusterError::InvalidConfig(
                "queue length must be positive".into(),
            ));
        }
        if self.supported_kinds.is_empty() {
            return Err(ClusterError::InvalidConfig(
                "no supported message kinds".into(),
            ));
        }
        if self.load.increment == 0 {
            return Err(ClusterError::InvalidConfig(
                "load increment must be positive".into(),
            ));
        }
        for (name, value) in [
            ("handshake_timeout", self.handshake_timeout),
            ("ack_timeout", self.ack_timeout),
            ("connect_timeout", self.connect_timeout),
            ("reconnect_interval", self.reconnect_interval),
            ("slave_heartbeat_interval", self.slave_heartbeat_interval),
        ] {
            if value.is_zero() {
                return Err(ClusterError::InvalidConfig(format!(
                    "{} must be positive",
                    name
                )));
            }
        }

        match self.mode {
            ClusterMode::Master if self.slaves.is_empty() => Err(ClusterError::InvalidConfig(
                "master mode needs at least one slave address".into(),
            )),
            ClusterMode::Slave if self.network_addr.is_empty() => Err(
                ClusterError::InvalidConfig("slave mode needs a network address".into()),
            ),
            _ => Ok(()),
        }
    }
}
