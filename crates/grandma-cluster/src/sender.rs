//! Per-slave send loop
//!
//! One long-lived task per slave pops its send queue and writes each request
//! out without waiting for the previous acknowledgement. Every write spawns a
//! waiter bounded by the ack timeout:
//!
//! - consumed: the load reserved at routing time is released
//! - rejected, timed out or connection lost: the request goes back to the
//!   front of the queue, keeping its reservation
//!
//! A failed write closes the slot and requeues the request; the reconnect
//! loop brings the slave back.

use crate::config::ClusterConfig;
use crate::error::ClusterError;
use crate::node::{AckReply, Node, SlotId};
use crate::registry::Registry;
use grandma_core::{ScheduleRequest, SendQueue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Timing for a send loop
#[derive(Debug, Clone, Copy)]
pub struct SenderSettings {
    pub increment: u32,
    pub ack_timeout: Duration,
    pub retry_delay: Duration,
}

impl From<&ClusterConfig> for SenderSettings {
    fn from(config: &ClusterConfig) -> Self {
        Self {
            increment: config.load.increment,
            ack_timeout: config.ack_timeout,
            retry_delay: config.retry_delay,
        }
    }
}

/// Put `request` back at the front, waiting while the queue is full
pub async fn requeue_front(
    queue: &SendQueue<ScheduleRequest>,
    mut request: ScheduleRequest,
    retry_delay: Duration,
) {
    loop {
        match queue.push_front(request) {
            Ok(()) => return,
            Err(full) => {
                request = full.item;
                sleep(retry_delay).await;
            }
        }
    }
}

/// Start the send loop for `node`
pub fn spawn_sender(
    node: Arc<Node>,
    registry: Arc<Registry>,
    settings: SenderSettings,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let slot = node.slot();
        debug!(slot, addr = %node.addr(), "Send loop started");

        loop {
            tokio::select! {
                _ = node.wait_connected() => {}
                _ = shutdown_rx.recv() => break,
            }

            let request = tokio::select! {
                request = node.queue().pop() => request,
                _ = shutdown_rx.recv() => break,
            };

            let failure = match node.forward(&request).await {
                Ok(ack) => {
                    spawn_ack_waiter(node.clone(), registry.clone(), settings, request, ack);
                    continue;
                }
                Err(failure) => failure,
            };

            match failure.error {
                ClusterError::MessageTooLarge { size, max } => {
                    error!(slot, size, max, "Request too large to forward, dropping");
                    registry.adjust(slot, -(settings.increment as i64));
                    continue;
                }
                ref e => {
                    warn!(slot, peer = %node.name(), error = %e, "Forward failed, requeueing");
                }
            }
            if let Some(generation) = failure.generation {
                registry.disconnect(slot, generation).await;
            }
            requeue_front(node.queue(), request, settings.retry_delay).await;

            tokio::select! {
                _ = sleep(settings.retry_delay) => {}
                _ = shutdown_rx.recv() => break,
            }
        }

        info!(slot, queued = node.queue().len(), "Send loop stopped");
    })
}

fn spawn_ack_waiter(
    node: Arc<Node>,
    registry: Arc<Registry>,
    settings: SenderSettings,
    request: ScheduleRequest,
    ack: oneshot::Receiver<AckReply>,
) {
    tokio::spawn(async move {
        let slot: SlotId = node.slot();
        match timeout(settings.ack_timeout, ack).await {
            Ok(Ok(AckReply::Consumed(schedule_id))) => {
                registry.adjust(slot, -(settings.increment as i64));
                debug!(slot, schedule_id, load = ?registry.load(slot), "Slave consumed request");
            }
            Ok(Ok(AckReply::Rejected(reason))) => {
                warn!(slot, peer = %node.name(), %reason, "Slave rejected request, requeueing");
                sleep(settings.retry_delay).await;
                requeue_front(node.queue(), request, settings.retry_delay).await;
            }
            Ok(Err(_)) => {
                debug!(slot, "Connection lost before acknowledgement, requeueing");
                requeue_front(node.queue(), request, settings.retry_delay).await;
            }
            Err(_) => {
                warn!(
                    slot,
                    peer = %node.name(),
                    timeout_ms = settings.ack_timeout.as_millis() as u64,
                    "Acknowledgement timed out, requeueing"
                );
                requeue_front(node.queue(), request, settings.retry_delay).await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::{BoxedWriter, FrameReader, FrameWriter};
    use crate::protocol::ClusterMessage;
    use tokio::io::duplex;

    fn settings() -> SenderSettings {
        SenderSettings {
            increment: 3,
            ack_timeout: Duration::from_millis(100),
            retry_delay: Duration::from_millis(10),
        }
    }

    fn request(body: &str) -> ScheduleRequest {
        ScheduleRequest::new(106, "a@b.c", body, 5_000).unwrap()
    }

    async fn wait_for(mut check: impl FnMut() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !check() {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_requeue_front_goes_first() {
        let queue = SendQueue::new(4);
        queue.push_back(request("b")).unwrap();
        requeue_front(&queue, request("a"), Duration::from_millis(1)).await;
        assert_eq!(queue.try_pop().unwrap().body(), "a");
    }

    #[tokio::test]
    async fn test_consumed_ack_releases_reservation() {
        let registry = Arc::new(Registry::new(320));
        let node = registry.insert(|slot| Node::new(slot, "slave", 10), 100, false);
        let (a, b) = duplex(4096);
        node.attach("slave", FrameWriter::new(Box::new(a) as BoxedWriter)).await;
        let mut wire = FrameReader::new(b);

        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_sender(node.clone(), registry.clone(), settings(), rx);

        // Reservation as the router takes it
        registry.adjust(0, 3);
        node.queue().push_back(request("hi")).unwrap();

        let frame = wire.read_frame().await.unwrap();
        assert!(matches!(ClusterMessage::decode(&frame).unwrap(), ClusterMessage::Forward(_)));
        assert_eq!(registry.load(0), Some(103));

        node.complete_ack(AckReply::Consumed(7));
        wait_for(|| registry.load(0) == Some(100)).await;

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_ack_timeout_requeues() {
        let registry = Arc::new(Registry::new(320));
        let node = registry.insert(|slot| Node::new(slot, "slave", 10), 100, false);
        let (a, b) = duplex(4096);
        node.attach("slave", FrameWriter::new(Box::new(a) as BoxedWriter)).await;
        let mut wire = FrameReader::new(b);

        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_sender(node.clone(), registry.clone(), settings(), rx);
        node.queue().push_back(request("slow")).unwrap();

        // Never acknowledged: sent once, then again after the timeout
        for _ in 0..2 {
            let frame = wire.read_frame().await.unwrap();
            match ClusterMessage::decode(&frame).unwrap() {
                ClusterMessage::Forward(req) => assert_eq!(req.body(), "slow"),
                other => panic!("unexpected {:?}", other),
            }
        }

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_is_resent() {
        let registry = Arc::new(Registry::new(320));
        let node = registry.insert(|slot| Node::new(slot, "slave", 10), 100, false);
        let (a, b) = duplex(4096);
        node.attach("slave", FrameWriter::new(Box::new(a) as BoxedWriter)).await;
        let mut wire = FrameReader::new(b);

        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_sender(node.clone(), registry.clone(), settings(), rx);
        node.queue().push_back(request("retry")).unwrap();

        wire.read_frame().await.unwrap();
        node.complete_ack(AckReply::Rejected("disk full".into()));
        let frame = wire.read_frame().await.unwrap();
        assert!(matches!(ClusterMessage::decode(&frame).unwrap(), ClusterMessage::Forward(_)));

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_write_failure_closes_slot() {
        let registry = Arc::new(Registry::new(320));
        let node = registry.insert(|slot| Node::new(slot, "slave", 10), 100, false);
        let (a, b) = duplex(64);
        node.attach("slave", FrameWriter::new(Box::new(a) as BoxedWriter)).await;
        drop(b);

        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_sender(node.clone(), registry.clone(), settings(), rx);
        node.queue().push_back(request("lost")).unwrap();

        wait_for(|| registry.is_closed(0)).await;
        assert_eq!(registry.pending_reconnect(), vec![0]);
        wait_for(|| node.queue().len() == 1).await;

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
