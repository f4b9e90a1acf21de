//! Master side of the cluster
//!
//! At startup the master dials every configured slave and handshakes as the
//! initiator. Slaves that answer get a node with the initial slave load; the
//! rest are installed closed and left to the reconnect loop. Each node then
//! runs a read loop (acknowledgements) and a send loop (forwarded requests).
//! The reconnect loop heartbeats live slaves and rehandshakes closed ones.

use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};
use crate::framing::{BoxedReader, BoxedWriter, FrameReader, FrameWriter};
use crate::handshake::{self, HandshakeConfig, PeerIdentity};
use crate::node::{AckReply, Generation, Node};
use crate::protocol::ClusterMessage;
use crate::registry::Registry;
use crate::sender::{spawn_sender, SenderSettings};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// A handshaken connection, ready to attach
pub struct Connection {
    pub peer: PeerIdentity,
    pub reader: FrameReader<BoxedReader>,
    pub writer: FrameWriter<BoxedWriter>,
}

/// Dial `addr` and handshake as the initiator
pub async fn dial(
    addr: &str,
    connect_timeout: Duration,
    handshake: &HandshakeConfig,
) -> Result<Connection> {
    let stream = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ClusterError::ConnectionFailed(format!("{}: connect timed out", addr)))?
        .map_err(|e| ClusterError::ConnectionFailed(format!("{}: {}", addr, e)))?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(addr, error = %e, "Failed to set TCP_NODELAY");
    }

    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(Box::new(read_half) as BoxedReader);
    let mut writer = FrameWriter::new(Box::new(write_half) as BoxedWriter);
    let peer = handshake::initiate(&mut reader, &mut writer, handshake).await?;

    Ok(Connection {
        peer,
        reader,
        writer,
    })
}

/// Running master
pub struct Master {
    config: ClusterConfig,
    registry: Arc<Registry>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Master {
    /// Connect to the configured slaves and start all loops
    ///
    /// Fails with [`ClusterError::NoSlavesConnected`] if not a single slave
    /// completes the handshake.
    pub async fn start(
        config: ClusterConfig,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let handshake = config.handshake_config();
        let registry = Arc::new(Registry::new(config.load.master_initial));
        let master = Arc::new(Self {
            registry,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            config,
        });

        for addr in &master.config.slaves {
            match dial(addr, master.config.connect_timeout, &handshake).await {
                Ok(conn) => {
                    let node = master.registry.insert(
                        |slot| Node::new(slot, addr.clone(), master.config.queue_length),
                        master.config.load.slave_initial,
                        false,
                    );
                    master.install(&node, conn).await;
                }
                Err(e) => {
                    warn!(addr = %addr, error = %e, "Slave unreachable, will retry");
                    master.registry.insert(
                        |slot| Node::new(slot, addr.clone(), master.config.queue_length),
                        master.config.load.slave_initial,
                        true,
                    );
                }
            }
        }

        if master.registry.connected_count() == 0 {
            error!(slaves = master.config.slaves.len(), "No slave connected");
            return Err(ClusterError::NoSlavesConnected);
        }

        let settings = SenderSettings::from(&master.config);
        for node in master.registry.nodes() {
            let handle = spawn_sender(
                node,
                master.registry.clone(),
                settings,
                master.shutdown_tx.subscribe(),
            );
            master.tasks.lock().push(handle);
        }
        let handle = master.clone().spawn_reconnect_loop();
        master.tasks.lock().push(handle);

        info!(
            node = %master.config.node_name,
            connected = master.registry.connected_count(),
            total = master.registry.len(),
            "Master started"
        );
        Ok(master)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Wait for every loop to finish after shutdown was signalled
    pub async fn join(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Attach `conn` to `node` and start reading from it
    async fn install(&self, node: &Arc<Node>, conn: Connection) {
        let generation = node.attach(&conn.peer.name, conn.writer).await;
        let handle = spawn_reader(
            node.clone(),
            self.registry.clone(),
            conn.reader,
            generation,
            self.shutdown_tx.subscribe(),
        );
        let mut tasks = self.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// One heartbeat and reconnect round
    pub async fn maintain(&self) {
        let handshake = self.config.handshake_config();

        for node in self.registry.nodes() {
            if self.registry.is_closed(node.slot()) {
                continue;
            }
            if let Err(failure) = node.send(&ClusterMessage::Heartbeat).await {
                debug!(slot = node.slot(), error = %failure.error, "Heartbeat failed");
                if let Some(generation) = failure.generation {
                    self.registry.disconnect(node.slot(), generation).await;
                }
            }
        }

        for slot in self.registry.pending_reconnect() {
            let Some(node) = self.registry.node(slot) else {
                continue;
            };
            match dial(node.addr(), self.config.connect_timeout, &handshake).await {
                Ok(conn) => {
                    // Reopen first so an immediate EOF closes the slot again
                    self.registry.reconnected(slot);
                    self.install(&node, conn).await;
                }
                Err(e) => {
                    debug!(slot, addr = %node.addr(), error = %e, "Reconnect failed");
                }
            }
        }
    }

    fn spawn_reconnect_loop(self: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep(self.config.reconnect_initial_delay) => {}
                _ = shutdown_rx.recv() => return,
            }

            let mut ticker = interval(self.config.reconnect_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.maintain().await,
                    _ = shutdown_rx.recv() => {
                        info!("Reconnect loop shutting down");
                        break;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for Master {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Master")
            .field("node", &self.config.node_name)
            .field("registry", &self.registry)
            .finish()
    }
}

/// Read acknowledgements from one slave connection
///
/// On EOF the connection of `generation` is detached and its slot closed.
pub fn spawn_reader(
    node: Arc<Node>,
    registry: Arc<Registry>,
    mut reader: FrameReader<BoxedReader>,
    generation: Generation,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let slot = node.slot();
        loop {
            let frame = tokio::select! {
                frame = reader.read_frame() => frame,
                _ = shutdown_rx.recv() => return,
            };
            let Some(frame) = frame else {
                registry.disconnect(slot, generation).await;
                return;
            };

            match ClusterMessage::decode(&frame) {
                Ok(ClusterMessage::Consumed { schedule_id }) => {
                    node.complete_ack(AckReply::Consumed(schedule_id));
                }
                Ok(ClusterMessage::Rejected { reason }) => {
                    node.complete_ack(AckReply::Rejected(reason));
                }
                Ok(ClusterMessage::Finished) => {
                    debug!(slot, "Slave schedule finished");
                }
                Ok(ClusterMessage::Heartbeat) => {
                    trace!(slot, "Heartbeat from slave");
                }
                Ok(ClusterMessage::Forward(_)) => {
                    warn!(slot, "Slave sent a forward request, ignoring");
                }
                Err(e) => {
                    warn!(slot, error = %e, "Malformed message from slave");
                }
            }
        }
    })
}
