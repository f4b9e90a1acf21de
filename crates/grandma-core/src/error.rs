//! Core error types

use thiserror::Error;

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors shared by every Grandma crate
#[derive(Debug, Error)]
pub enum Error {
    // ==================== Configuration Errors ====================
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // ==================== Validation Errors ====================
    #[error("type not exists: {0}")]
    InvalidType(i64),

    #[error("message type not supported: {0}")]
    UnsupportedType(u16),

    #[error("negative expiration time: {0} ms")]
    NegativeDelay(i64),

    #[error("expiration time too big: {delay_ms} ms (max {max_ms} ms)")]
    DelayTooLarge { delay_ms: i64, max_ms: i64 },

    #[error("no endpoint provided")]
    EmptyEndpoint,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    // ==================== Queue Errors ====================
    #[error("queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    // ==================== Storage Errors ====================
    #[error("storage error: {0}")]
    Storage(String),

    #[error("record not found: {0}")]
    RecordNotFound(u32),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error was caused by a malformed request
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidType(_)
                | Error::UnsupportedType(_)
                | Error::NegativeDelay(_)
                | Error::DelayTooLarge { .. }
                | Error::EmptyEndpoint
                | Error::InvalidEndpoint(_)
                | Error::InvalidPayload(_)
        )
    }

    /// Check if this error is a storage failure
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Io(_))
    }
}

impl From<redb::Error> for Error {
    fn from(e: redb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<postcard::Error> for Error {
    fn from(e: postcard::Error) -> Self {
        Error::Storage(format!("record encoding: {}", e))
    }
}
