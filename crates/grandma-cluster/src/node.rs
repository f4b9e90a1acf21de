//! Cluster peers
//!
//! A [`Node`] is the master's handle on one slave (or a slave's handle on its
//! master). It owns the write half of the live connection, the outbound send
//! queue and the acknowledgement waiters. Load and ranking live in the
//! [`Registry`](crate::registry::Registry).
//!
//! Each attached connection gets a new generation number. Read loops carry
//! the generation they were started with, so a stale loop can never detach a
//! newer connection.

use crate::error::ClusterError;
use crate::framing::{BoxedWriter, FrameWriter};
use crate::protocol::ClusterMessage;
use grandma_core::{ScheduleRequest, SendQueue};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{oneshot, Mutex as AsyncMutex, Notify};
use tracing::debug;

/// Index of a node in the registry; stable for the node's lifetime
pub type SlotId = usize;

/// Connection generation
pub type Generation = u64;

/// Reply to a forwarded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckReply {
    /// Persisted on the slave under this schedule id
    Consumed(i32),
    /// Slave could not accept it
    Rejected(String),
}

/// A failed write, tagged with the connection it failed on
#[derive(Debug)]
pub struct SendFailure {
    /// `None` when no connection was attached
    pub generation: Option<Generation>,
    pub error: ClusterError,
}

impl SendFailure {
    fn closed(name: String) -> Self {
        Self {
            generation: None,
            error: ClusterError::NodeClosed(name),
        }
    }
}

impl From<SendFailure> for ClusterError {
    fn from(f: SendFailure) -> Self {
        f.error
    }
}

struct Link {
    generation: Generation,
    writer: FrameWriter<BoxedWriter>,
}

/// One cluster peer
pub struct Node {
    slot: SlotId,
    addr: String,
    name: RwLock<String>,
    link: AsyncMutex<Option<Link>>,
    generation: AtomicU64,
    acks: Mutex<VecDeque<oneshot::Sender<AckReply>>>,
    queue: SendQueue<ScheduleRequest>,
    connected: Notify,
}

impl Node {
    pub fn new(slot: SlotId, addr: impl Into<String>, queue_length: usize) -> Self {
        let addr = addr.into();
        Self {
            slot,
            name: RwLock::new(addr.clone()),
            addr,
            link: AsyncMutex::new(None),
            generation: AtomicU64::new(0),
            acks: Mutex::new(VecDeque::new()),
            queue: SendQueue::new(queue_length),
            connected: Notify::new(),
        }
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    /// Address the node is dialed at
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Name announced in the last handshake (the address until then)
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Outbound requests waiting for this node
    pub fn queue(&self) -> &SendQueue<ScheduleRequest> {
        &self.queue
    }

    /// Install a freshly handshaken connection, replacing any previous one
    pub async fn attach(&self, name: &str, writer: FrameWriter<BoxedWriter>) -> Generation {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = {
            let mut link = self.link.lock().await;
            let previous = link.replace(Link { generation, writer });
            if previous.is_some() {
                self.acks.lock().clear();
            }
            previous
        };
        *self.name.write() = name.to_string();

        if let Some(mut old) = previous {
            let _ = old.writer.shutdown().await;
        }
        self.connected.notify_waiters();
        debug!(slot = self.slot, peer = name, generation, "Connection attached");
        generation
    }

    /// Drop the connection if it is still generation `generation`
    ///
    /// Pending acknowledgement waiters are released with an error. Returns
    /// whether anything was detached.
    pub async fn detach(&self, generation: Generation) -> bool {
        let old = {
            let mut link = self.link.lock().await;
            if link.as_ref().map(|l| l.generation) == Some(generation) {
                self.acks.lock().clear();
                link.take()
            } else {
                None
            }
        };
        let Some(mut old) = old else {
            return false;
        };

        let _ = old.writer.shutdown().await;
        debug!(slot = self.slot, generation, "Connection detached");
        true
    }

    /// Current connection generation, if connected
    pub async fn generation(&self) -> Option<Generation> {
        self.link.lock().await.as_ref().map(|l| l.generation)
    }

    pub async fn is_connected(&self) -> bool {
        self.link.lock().await.is_some()
    }

    /// Wait until a connection is attached
    pub async fn wait_connected(&self) {
        loop {
            let notified = self.connected.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_connected().await {
                return;
            }
            notified.await;
        }
    }

    /// Write a message without expecting a reply
    ///
    /// On failure the caller detaches the generation named in the error.
    pub async fn send(&self, message: &ClusterMessage) -> Result<(), SendFailure> {
        let payload = message.encode().map_err(|error| SendFailure {
            generation: None,
            error,
        })?;
        let mut link = self.link.lock().await;
        let Some(link) = link.as_mut() else {
            return Err(SendFailure::closed(self.name()));
        };
        link.writer
            .write_frame(&payload)
            .await
            .map_err(|e| SendFailure {
                generation: Some(link.generation),
                error: ClusterError::Io(e),
            })
    }

    /// Forward a request and register a waiter for its acknowledgement
    ///
    /// The waiter is queued under the same lock as the write, so waiters line
    /// up in wire order and replies are matched first-in first-out.
    pub async fn forward(
        &self,
        request: &ScheduleRequest,
    ) -> Result<oneshot::Receiver<AckReply>, SendFailure> {
        let payload = ClusterMessage::Forward(request.clone())
            .encode()
            .map_err(|error| SendFailure {
                generation: None,
                error,
            })?;

        let mut link = self.link.lock().await;
        let Some(link) = link.as_mut() else {
            return Err(SendFailure::closed(self.name()));
        };

        let (tx, rx) = oneshot::channel();
        self.acks.lock().push_back(tx);
        if let Err(e) = link.writer.write_frame(&payload).await {
            self.acks.lock().pop_back();
            return Err(SendFailure {
                generation: Some(link.generation),
                error: ClusterError::Io(e),
            });
        }
        Ok(rx)
    }

    /// Hand a reply to the oldest waiter
    ///
    /// A waiter that already gave up still consumes its reply, so later
    /// replies stay matched to their own requests.
    pub fn complete_ack(&self, reply: AckReply) -> bool {
        let waiter = self.acks.lock().pop_front();
        match waiter {
            Some(tx) => tx.send(reply).is_ok(),
            None => {
                debug!(slot = self.slot, ?reply, "Acknowledgement without waiter");
                false
            }
        }
    }

    /// Acknowledgements still outstanding
    pub fn pending_acks(&self) -> usize {
        self.acks.lock().len()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("slot", &self.slot)
            .field("addr", &self.addr)
            .field("name", &*self.name.read())
            .field("queued", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::FrameReader;
    use std::time::Duration;
    use tokio::io::duplex;

    fn writer(stream: tokio::io::DuplexStream) -> FrameWriter<BoxedWriter> {
        FrameWriter::new(Box::new(stream))
    }

    #[tokio::test]
    async fn test_forward_and_ack_in_order() {
        let node = Node::new(0, "127.0.0.1:7001", 10);
        let (a, b) = duplex(4096);
        node.attach("slave-1", writer(a)).await;
        let mut wire = FrameReader::new(b);

        let first = ScheduleRequest::new(106, "a@b.c", "1", 5000).unwrap();
        let second = ScheduleRequest::new(106, "a@b.c", "2", 5000).unwrap();
        let rx1 = node.forward(&first).await.unwrap();
        let rx2 = node.forward(&second).await.unwrap();
        assert_eq!(node.pending_acks(), 2);

        for expected in [&first, &second] {
            let frame = wire.read_frame().await.unwrap();
            assert_eq!(
                ClusterMessage::decode(&frame).unwrap(),
                ClusterMessage::Forward(expected.clone())
            );
        }

        assert!(node.complete_ack(AckReply::Consumed(11)));
        assert!(node.complete_ack(AckReply::Consumed(12)));
        assert_eq!(rx1.await.unwrap(), AckReply::Consumed(11));
        assert_eq!(rx2.await.unwrap(), AckReply::Consumed(12));
    }

    #[tokio::test]
    async fn test_abandoned_waiter_keeps_alignment() {
        let node = Node::new(0, "x", 10);
        let (a, _b) = duplex(4096);
        node.attach("slave", writer(a)).await;

        let req = ScheduleRequest::new(106, "a@b.c", "x", 5000).unwrap();
        let timed_out = node.forward(&req).await.unwrap();
        let live = node.forward(&req).await.unwrap();
        drop(timed_out);

        // Late reply for the abandoned request is swallowed
        assert!(!node.complete_ack(AckReply::Consumed(1)));
        assert!(node.complete_ack(AckReply::Consumed(2)));
        assert_eq!(live.await.unwrap(), AckReply::Consumed(2));
    }

    #[tokio::test]
    async fn test_stale_generation_cannot_detach() {
        let node = Node::new(3, "x", 10);
        let (a, _b) = duplex(64);
        let first = node.attach("slave", writer(a)).await;
        let (c, _d) = duplex(64);
        let second = node.attach("slave", writer(c)).await;
        assert!(second > first);

        assert!(!node.detach(first).await);
        assert!(node.is_connected().await);
        assert!(node.detach(second).await);
        assert!(!node.is_connected().await);
    }

    #[tokio::test]
    async fn test_detach_releases_waiters() {
        let node = Node::new(0, "x", 10);
        let (a, _b) = duplex(4096);
        let generation = node.attach("slave", writer(a)).await;
        let req = ScheduleRequest::new(106, "a@b.c", "x", 5000).unwrap();
        let rx = node.forward(&req).await.unwrap();

        node.detach(generation).await;
        assert!(rx.await.is_err());
        let failure = node.forward(&req).await.unwrap_err();
        assert_eq!(failure.generation, None);
        assert!(matches!(failure.error, ClusterError::NodeClosed(_)));
    }

    #[tokio::test]
    async fn test_wait_connected() {
        let node = std::sync::Arc::new(Node::new(0, "x", 10));
        let waiter = {
            let node = node.clone();
            tokio::spawn(async move { node.wait_connected().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        let (a, _b) = duplex(64);
        node.attach("slave", writer(a)).await;
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
