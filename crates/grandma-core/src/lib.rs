//! # Grandma Core
//!
//! Shared building blocks for the Grandma scheduling services:
//!
//! - **Messages**: notification kinds, validated schedule requests and their
//!   line-delimited wire payload
//! - **Send queue**: bounded ring buffer with front reinsertion and async pop
//! - **Storage**: durable pending/sent records per node namespace (redb or memory)
//! - **Delivery**: collaborator traits for the external senders
//!
//! ```rust,ignore
//! use grandma_core::{ScheduleRequest, SendQueue};
//!
//! let req = ScheduleRequest::new(106, "someone@example.com", "hello", 60_000)?;
//! let queue = SendQueue::new(1000);
//! queue.push_back(req)?;
//! ```

pub mod delivery;
pub mod error;
pub mod message;
pub mod queue;
pub mod storage;

pub use delivery::{Deliver, DeliveryError, Dispatched, Dispatcher, SocketPush};
pub use error::{Error, Result};
pub use message::{NotificationKind, ScheduleRequest, MAX_DELAY_MS};
pub use queue::{QueueFull, QueueStatsSnapshot, SendQueue};
pub use storage::{
    DurableRecord, MemoryRecordStore, RecordId, RecordStore, RedbRecordStore,
};
