//! Cluster error types

use crate::handshake::HandshakeFailure;
use thiserror::Error;

/// Result type for cluster operations
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Cluster errors
#[derive(Debug, Error)]
pub enum ClusterError {
    // ==================== Configuration Errors ====================
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ==================== Membership Errors ====================
    #[error("no slave node connected")]
    NoSlavesConnected,

    #[error("node not found: slot {0}")]
    NodeNotFound(usize),

    #[error("node closed: {0}")]
    NodeClosed(String),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeFailure),

    // ==================== Protocol Errors ====================
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    // ==================== Network Errors ====================
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ==================== Scheduling Errors ====================
    #[error(transparent)]
    Core(#[from] grandma_core::Error),
}

impl ClusterError {
    /// Check if this error is retriable
    pub fn is_retriable(&self) -> bool {
        match self {
            ClusterError::NodeClosed(_)
            | ClusterError::ConnectionFailed(_)
            | ClusterError::ConnectionClosed
            | ClusterError::Timeout
            | ClusterError::Io(_) => true,
            ClusterError::Handshake(failure) => failure.is_retriable(),
            ClusterError::Core(e) => matches!(e, grandma_core::Error::QueueFull { .. }),
            _ => false,
        }
    }

    /// Check if the target send queue was full
    pub fn is_queue_full(&self) -> bool {
        matches!(
            self,
            ClusterError::Core(grandma_core::Error::QueueFull { .. })
        )
    }

    /// Check if the request itself was rejected
    pub fn is_validation(&self) -> bool {
        matches!(self, ClusterError::Core(e) if e.is_validation())
    }
}

impl From<tokio::time::error::Elapsed> for ClusterError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        ClusterError::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable() {
        assert!(ClusterError::Timeout.is_retriable());
        assert!(ClusterError::NodeClosed("slave-1".into()).is_retriable());
        assert!(ClusterError::from(grandma_core::Error::QueueFull { capacity: 10 }).is_retriable());
        assert!(!ClusterError::NoSlavesConnected.is_retriable());
        assert!(!ClusterError::from(HandshakeFailure::Refused).is_retriable());
    }

    #[test]
    fn test_classification() {
        let full = ClusterError::from(grandma_core::Error::QueueFull { capacity: 10 });
        assert!(full.is_queue_full());
        assert!(!full.is_validation());

        let invalid = ClusterError::from(grandma_core::Error::EmptyEndpoint);
        assert!(invalid.is_validation());
        assert_eq!(invalid.to_string(), "no endpoint provided");
    }
}
