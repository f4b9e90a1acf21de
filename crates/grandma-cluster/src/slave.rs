//! Slave side of the cluster
//!
//! A slave listens for its master, handshakes as the responder and keeps one
//! master link at a time; a new handshake replaces the previous link.
//! Forwarded requests are processed in wire order: each is scheduled locally
//! and answered with `consumed` (or `rejected`), and a `finished` message
//! follows when the schedule fires.

use crate::config::ClusterConfig;
use crate::error::Result;
use crate::framing::{BoxedReader, BoxedWriter, FrameReader, FrameWriter};
use crate::handshake;
use crate::node::{Generation, Node};
use crate::protocol::{ClusterMessage, UNKNOWN_SCHEDULE_ID};
use grandma_core::{RecordId, ScheduleRequest};
use grandma_scheduler::Scheduler;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Running slave
pub struct Slave {
    config: ClusterConfig,
    scheduler: Arc<Scheduler>,
    master: Arc<Node>,
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Slave {
    /// Bind the listener and start accepting masters
    pub async fn start(
        config: ClusterConfig,
        scheduler: Arc<Scheduler>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let listener = TcpListener::bind(&config.network_addr).await?;
        let local_addr = listener.local_addr()?;

        let slave = Arc::new(Self {
            // Replies go out directly on the link, the send queue stays empty
            master: Arc::new(Node::new(0, "master", 1)),
            config,
            scheduler,
            local_addr,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let accept = slave.clone().spawn_accept_loop(listener);
        let heartbeat = slave.clone().spawn_heartbeat_loop();
        slave.tasks.lock().extend([accept, heartbeat]);

        info!(
            node = %slave.config.node_name,
            addr = %local_addr,
            auth = slave.config.secret.is_some(),
            "Slave listening for master"
        );
        Ok(slave)
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Link to the current master
    pub fn master(&self) -> &Arc<Node> {
        &self.master
    }

    pub async fn join(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    fn spawn_accept_loop(self: Arc<Self>, listener: TcpListener) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => match result {
                        Ok((stream, addr)) => {
                            debug!(%addr, "Inbound connection");
                            let slave = self.clone();
                            tokio::spawn(async move { slave.accept(stream, addr).await });
                        }
                        Err(e) => error!(error = %e, "Error accepting connection"),
                    },
                    _ = shutdown_rx.recv() => {
                        info!("Slave listener shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Handshake an inbound connection and make it the master link
    async fn accept(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%addr, error = %e, "Failed to set TCP_NODELAY");
        }
        let (read_half, write_half) = stream.into_split();
        let mut reader = FrameReader::new(Box::new(read_half) as BoxedReader);
        let mut writer = FrameWriter::new(Box::new(write_half) as BoxedWriter);

        let handshake = self.config.handshake_config();
        let peer = match handshake::respond(&mut reader, &mut writer, &handshake).await {
            Ok(peer) => peer,
            Err(failure) => {
                warn!(%addr, %failure, status = failure.status_code(), "Master handshake failed");
                let _ = writer.shutdown().await;
                return;
            }
        };

        let generation = self.master.attach(&peer.name, writer).await;
        info!(%addr, master = %peer.name, generation, "Master connected");

        let shutdown_rx = self.shutdown_tx.subscribe();
        self.read_loop(reader, generation, shutdown_rx).await;
    }

    async fn read_loop(
        &self,
        mut reader: FrameReader<BoxedReader>,
        generation: Generation,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        loop {
            let frame = tokio::select! {
                frame = reader.read_frame() => frame,
                _ = shutdown_rx.recv() => return,
            };
            let Some(frame) = frame else {
                if self.master.detach(generation).await {
                    warn!(generation, "Master disconnected");
                }
                return;
            };

            match ClusterMessage::decode(&frame) {
                Ok(ClusterMessage::Forward(request)) => {
                    let reply = self.consume(request).await;
                    if let Err(failure) = self.master.send(&reply).await {
                        warn!(error = %failure.error, "Failed to acknowledge forward");
                        if let Some(generation) = failure.generation {
                            self.master.detach(generation).await;
                        }
                        return;
                    }
                }
                Ok(ClusterMessage::Heartbeat) => trace!("Heartbeat from master"),
                Ok(other) => warn!(tag = other.tag(), "Unexpected message from master"),
                Err(e) => warn!(error = %e, "Malformed message from master"),
            }
        }
    }

    /// Schedule a forwarded request and build the reply for the master
    async fn consume(&self, request: ScheduleRequest) -> ClusterMessage {
        if !self.config.supports(request.kind()) {
            let e = grandma_core::Error::UnsupportedType(request.kind().code());
            return ClusterMessage::Rejected {
                reason: e.to_string(),
            };
        }

        match self.scheduler.create(&request).await {
            Ok(schedule) => {
                let (schedule_id, completion) = schedule.into_parts();
                let master = self.master.clone();
                tokio::spawn(async move {
                    if completion.await.is_ok() {
                        if let Err(failure) = master.send(&ClusterMessage::Finished).await {
                            debug!(schedule_id, error = %failure.error, "Could not report finished schedule");
                        }
                    }
                });
                debug!(schedule_id, kind = %request.kind(), "Forwarded request scheduled");
                consumed_reply(schedule_id)
            }
            Err(e) => {
                error!(error = %e, "Failed to schedule forwarded request");
                ClusterMessage::Rejected {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn spawn_heartbeat_loop(self: Arc<Self>) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(self.config.slave_heartbeat_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(failure) = self.master.send(&ClusterMessage::Heartbeat).await {
                            if let Some(generation) = failure.generation {
                                debug!(error = %failure.error, "Heartbeat to master failed");
                                self.master.detach(generation).await;
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    }
}

/// Acknowledge a scheduled record. Ids beyond the wire range are reported
/// as [`UNKNOWN_SCHEDULE_ID`]; the record itself is kept and will fire.
fn consumed_reply(schedule_id: RecordId) -> ClusterMessage {
    match i32::try_from(schedule_id) {
        Ok(schedule_id) => ClusterMessage::Consumed { schedule_id },
        Err(_) => {
            error!(schedule_id, "Schedule id exceeds wire range, acknowledging without id");
            ClusterMessage::Consumed {
                schedule_id: UNKNOWN_SCHEDULE_ID,
            }
        }
    }
}

impl std::fmt::Debug for Slave {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slave")
            .field("node", &self.config.node_name)
            .field("addr", &self.local_addr)
            .field("master", &self.master)
            .finish()
    }
}
