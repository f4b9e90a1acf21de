//! Default delivery collaborators
//!
//! The daemon ships without concrete senders; due notifications are written
//! to the log. Deployments embed the library and pass their own
//! [`Deliver`]/[`SocketPush`] implementations to [`Server::start`](crate::Server::start).

use async_trait::async_trait;
use grandma_core::{Deliver, DeliveryError, NotificationKind, SocketPush};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Logs every delivery instead of sending it
#[derive(Debug, Default)]
pub struct LogDeliverer {
    delivered: AtomicU64,
    pushed: AtomicU64,
}

impl LogDeliverer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Deliver for LogDeliverer {
    async fn deliver(
        &self,
        kind: NotificationKind,
        endpoint: &str,
        body: &str,
    ) -> Result<(), DeliveryError> {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        info!(%kind, endpoint, body_len = body.len(), "Notification due");
        Ok(())
    }
}

#[async_trait]
impl SocketPush for LogDeliverer {
    async fn push_to_socket(
        &self,
        conn_id: &str,
        key: &str,
        body: &str,
    ) -> Result<(), DeliveryError> {
        self.pushed.fetch_add(1, Ordering::Relaxed);
        info!(conn_id, key, body_len = body.len(), "Socket notification due");
        Ok(())
    }
}
