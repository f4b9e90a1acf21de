//! Node wiring
//!
//! Startup order: open storage, build the scheduler, start the delivery
//! worker, replay unsent records, start the ticker, then the cluster loops
//! for the configured mode. Recovery failures abort startup.

use crate::config::DaemonConfig;
use crate::error::{DaemonError, Result};
use grandma_cluster::{Cluster, ClusterMode, Placement, Router};
use grandma_core::{
    Deliver, Dispatcher, MemoryRecordStore, RecordStore, RedbRecordStore, SocketPush,
};
use grandma_scheduler::{spawn_ticker, DeliveryWorker, RecoveryReport, Scheduler, SystemClock};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Name of the record database inside the data directory
pub const DATABASE_FILE: &str = "grandma.redb";

/// A running Grandma node
pub struct Server {
    config: DaemonConfig,
    scheduler: Arc<Scheduler>,
    worker: Arc<DeliveryWorker>,
    cluster: Cluster,
    recovery: RecoveryReport,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Start every component of a node
    pub async fn start(
        config: DaemonConfig,
        deliver: Arc<dyn Deliver>,
        socket: Arc<dyn SocketPush>,
    ) -> Result<Self> {
        config.validate()?;
        let cluster_config = config.cluster_config()?;
        let (shutdown_tx, _) = broadcast::channel(4);

        let store: Arc<dyn RecordStore> = match &config.data_dir {
            Some(dir) => Arc::new(RedbRecordStore::open(dir.join(DATABASE_FILE), &config.name)?),
            None => {
                info!("No data directory configured, records kept in memory");
                Arc::new(MemoryRecordStore::new(&config.name))
            }
        };
        let scheduler = Arc::new(Scheduler::new(
            config.scheduler_config(),
            store,
            Arc::new(SystemClock),
        )?);

        let worker = Arc::new(DeliveryWorker::new(
            scheduler.delivery_queue(),
            Dispatcher::new(deliver, socket),
        ));
        let mut tasks = vec![worker.clone().spawn(shutdown_tx.subscribe())];

        let recovery = match scheduler.recover().await {
            Ok(report) => report,
            Err(e) => {
                let _ = shutdown_tx.send(());
                return Err(DaemonError::Recovery(e));
            }
        };
        tasks.push(spawn_ticker(scheduler.clone(), shutdown_tx.subscribe()));

        let cluster = match Cluster::start(cluster_config, scheduler.clone(), shutdown_tx.clone()).await {
            Ok(cluster) => cluster,
            Err(e) => {
                let _ = shutdown_tx.send(());
                return Err(e.into());
            }
        };

        info!(
            name = %config.name,
            mode = ?config.mode,
            namespace = %scheduler.namespace(),
            recovered = recovery.total,
            "Grandma node started"
        );

        Ok(Self {
            config,
            scheduler,
            worker,
            cluster,
            recovery,
            shutdown_tx,
            tasks,
        })
    }

    /// Submit a notification request
    pub async fn submit(
        &self,
        kind: i64,
        endpoint: impl Into<String>,
        body: impl Into<String>,
        delay_ms: i64,
    ) -> grandma_cluster::Result<Placement> {
        self.cluster.router().submit(kind, endpoint, body, delay_ms).await
    }

    pub fn router(&self) -> &Arc<Router> {
        self.cluster.router()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn worker(&self) -> &Arc<DeliveryWorker> {
        &self.worker
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    pub fn mode(&self) -> ClusterMode {
        self.config.mode
    }

    /// What startup recovery replayed
    pub fn recovery(&self) -> RecoveryReport {
        self.recovery
    }

    /// Get a shutdown handle that can be used to trigger shutdown from outside
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown_tx: self.shutdown_tx.clone(),
        }
    }

    /// Wait until every loop has stopped
    pub async fn wait(self) {
        for task in self.tasks {
            let _ = task.await;
        }
        self.cluster.join().await;
        info!(
            delivered = self.worker.delivered(),
            failed = self.worker.failed(),
            pending = self.scheduler.pending_count(),
            "Server shutdown complete"
        );
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.config.name)
            .field("mode", &self.config.mode)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

/// Handle for triggering server shutdown from outside
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    shutdown_tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
