//! Delivery collaborators
//!
//! The concrete senders (SMTP, push gateways, SMS, REST callbacks) and the
//! real-time socket fan-out live outside this workspace. They plug in through
//! [`Deliver`] and [`SocketPush`]; [`Dispatcher`] picks one by kind.

use crate::message::NotificationKind;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Delivery failure reported by a collaborator
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid endpoint or body: {0}")]
    InvalidEndpoint(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("improper response: {0}")]
    ImproperResponse(String),

    #[error("{0}")]
    Other(String),
}

/// Hand a due notification to its sender
#[async_trait]
pub trait Deliver: Send + Sync {
    async fn deliver(
        &self,
        kind: NotificationKind,
        endpoint: &str,
        body: &str,
    ) -> Result<(), DeliveryError>;
}

/// Push a message to a live in-app socket connection
#[async_trait]
pub trait SocketPush: Send + Sync {
    async fn push_to_socket(
        &self,
        conn_id: &str,
        key: &str,
        body: &str,
    ) -> Result<(), DeliveryError>;
}

/// What a dispatch did with a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Delete kind, nothing sent
    Skipped,
    /// Pushed to a socket connection
    Socket,
    /// Handed to the sender
    Delivered,
}

/// Split a socket endpoint `"<connId>.<key>"`
pub fn parse_socket_endpoint(endpoint: &str) -> Result<(&str, &str), DeliveryError> {
    let mut parts = endpoint.split('.');
    match (parts.next(), parts.next()) {
        (Some(conn_id), Some(key)) => Ok((conn_id, key)),
        _ => Err(DeliveryError::InvalidEndpoint(format!(
            "socket endpoint {:?} is not <connId>.<key>",
            endpoint
        ))),
    }
}

/// Routes due notifications to the right collaborator
#[derive(Clone)]
pub struct Dispatcher {
    deliver: Arc<dyn Deliver>,
    socket: Arc<dyn SocketPush>,
}

impl Dispatcher {
    pub fn new(deliver: Arc<dyn Deliver>, socket: Arc<dyn SocketPush>) -> Self {
        Self { deliver, socket }
    }

    pub async fn dispatch(
        &self,
        kind: NotificationKind,
        endpoint: &str,
        body: &str,
    ) -> Result<Dispatched, DeliveryError> {
        match kind {
            NotificationKind::Delete => Ok(Dispatched::Skipped),
            NotificationKind::Socket => {
                let (conn_id, key) = parse_socket_endpoint(endpoint)?;
                self.socket.push_to_socket(conn_id, key, body).await?;
                Ok(Dispatched::Socket)
            }
            _ => {
                self.deliver.deliver(kind, endpoint, body).await?;
                Ok(Dispatched::Delivered)
            }
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
