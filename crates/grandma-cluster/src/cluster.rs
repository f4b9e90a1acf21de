//! Cluster startup by mode

use crate::config::{ClusterConfig, ClusterMode};
use crate::error::Result;
use crate::master::Master;
use crate::router::Router;
use crate::slave::Slave;
use grandma_scheduler::Scheduler;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

/// What this node runs besides its scheduler
#[derive(Debug)]
pub enum Role {
    Standalone,
    Master(Arc<Master>),
    Slave(Arc<Slave>),
}

/// A started node: its router plus the cluster loops for its mode
#[derive(Debug)]
pub struct Cluster {
    router: Arc<Router>,
    role: Role,
}

impl Cluster {
    /// Start the loops for `config.mode` on top of `scheduler`
    pub async fn start(
        config: ClusterConfig,
        scheduler: Arc<Scheduler>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<Self> {
        config.validate()?;
        let supported = config.supported_kinds.clone();

        let (router, role) = match config.mode {
            ClusterMode::Standalone => (
                Router::standalone(scheduler, supported),
                Role::Standalone,
            ),
            ClusterMode::Master => {
                let increment = config.load.increment;
                let master = Master::start(config, shutdown_tx).await?;
                let router = Router::distributed(
                    scheduler,
                    master.registry().clone(),
                    supported,
                    increment,
                );
                (router, Role::Master(master))
            }
            ClusterMode::Slave => {
                let slave = Slave::start(config, scheduler.clone(), shutdown_tx).await?;
                (Router::standalone(scheduler, supported), Role::Slave(slave))
            }
        };

        info!(mode = ?role_mode(&role), "Cluster started");
        Ok(Self {
            router: Arc::new(router),
            role,
        })
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Wait for the cluster loops to stop after shutdown
    pub async fn join(&self) {
        match &self.role {
            Role::Standalone => {}
            Role::Master(master) => master.join().await,
            Role::Slave(slave) => slave.join().await,
        }
    }
}

fn role_mode(role: &Role) -> ClusterMode {
    match role {
        Role::Standalone => ClusterMode::Standalone,
        Role::Master(_) => ClusterMode::Master,
        Role::Slave(_) => ClusterMode::Slave,
    }
}
