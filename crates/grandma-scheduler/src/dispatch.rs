//! Delivery worker
//!
//! Pops due messages off the delivery queue and dispatches each on its own
//! task. Failures are logged and not retried.

use crate::schedule::DueMessage;
use grandma_core::{Dispatched, Dispatcher, SendQueue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct WorkerStats {
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Drains the delivery queue into the senders
pub struct DeliveryWorker {
    queue: Arc<SendQueue<DueMessage>>,
    dispatcher: Dispatcher,
    stats: Arc<WorkerStats>,
}

impl DeliveryWorker {
    pub fn new(queue: Arc<SendQueue<DueMessage>>, dispatcher: Dispatcher) -> Self {
        Self {
            queue,
            dispatcher,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    /// Dispatch one message and record the outcome
    pub async fn dispatch(&self, message: DueMessage) {
        dispatch_one(&self.dispatcher, &self.stats, message).await;
    }

    /// Messages handed to a sender without error
    pub fn delivered(&self) -> u64 {
        self.stats.delivered.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.stats.failed.load(Ordering::Relaxed)
    }

    /// Run until shutdown
    pub fn spawn(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Delivery worker started");
            loop {
                tokio::select! {
                    message = self.queue.pop() => {
                        let dispatcher = self.dispatcher.clone();
                        let stats = self.stats.clone();
                        tokio::spawn(async move {
                            dispatch_one(&dispatcher, &stats, message).await;
                        });
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Delivery worker shutting down");
                        break;
                    }
                }
            }
        })
    }
}

async fn dispatch_one(dispatcher: &Dispatcher, stats: &WorkerStats, message: DueMessage) {
    match dispatcher
        .dispatch(message.kind, &message.endpoint, &message.body)
        .await
    {
        Ok(Dispatched::Skipped) => {
            debug!(id = message.id, "Delete schedule consumed");
        }
        Ok(outcome) => {
            stats.delivered.fetch_add(1, Ordering::Relaxed);
            debug!(id = message.id, kind = %message.kind, ?outcome, "Delivered");
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                id = message.id,
                kind = %message.kind,
                endpoint = %message.endpoint,
                error = %e,
                "Delivery failed"
            );
        }
    }
}
