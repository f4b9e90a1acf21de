//! # Grandma Scheduler
//!
//! Durable delayed delivery. Accepted requests are persisted, indexed into
//! 100 ms buckets and fired by a 60 ms ticker running on a virtual clock that
//! trails wall time. Fired messages flow through a bounded delivery queue to
//! the [`DeliveryWorker`].
//!
//! ```text
//! create ─► RecordStore (pending) ─► Keystore ─tick─► fire ─► delivery queue ─► DeliveryWorker
//!                                                      └─► RecordStore (sent)
//! ```

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod keystore;
pub mod recovery;
pub mod schedule;
pub mod ticker;

pub use clock::{Clock, ManualClock, SystemClock, VirtualClock};
pub use config::SchedulerConfig;
pub use dispatch::DeliveryWorker;
pub use keystore::Keystore;
pub use recovery::RecoveryReport;
pub use schedule::{DueMessage, Schedule, Scheduler, SchedulerStatsSnapshot};
pub use ticker::spawn_ticker;
