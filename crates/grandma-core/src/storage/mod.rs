//! Durable record storage
//!
//! Every accepted schedule is written as a pending record before it is
//! indexed in memory, and flagged sent when it fires. On restart the
//! unsent records are replayed.
//!
//! Records are partitioned by namespace, derived from the running node's
//! name, so that each named instance owns a disjoint record set.
//!
//! Backends:
//!
//! - **redb**: pure Rust, ACID, one table per namespace
//! - **memory**: for tests and ephemeral nodes

mod memory;
mod redb_store;

pub use memory::MemoryRecordStore;
pub use redb_store::RedbRecordStore;

use crate::error::Result;
use crate::message::NotificationKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Identifier of a durable record; also the schedule id
pub type RecordId = u32;

/// A persisted schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableRecord {
    pub id: RecordId,
    pub kind: NotificationKind,
    pub endpoint: String,
    pub body: String,
    /// Absolute due time, ms since the Unix epoch
    pub due_at_ms: i64,
    pub sent: bool,
}

/// Durable storage collaborator used by the scheduler
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a pending record and return its id
    async fn insert_pending(
        &self,
        kind: NotificationKind,
        endpoint: &str,
        body: &str,
        due_at_ms: i64,
    ) -> Result<RecordId>;

    /// Flag a record as sent
    async fn mark_sent(&self, id: RecordId) -> Result<()>;

    /// All records of this namespace not yet sent, by ascending id
    async fn list_unsent(&self) -> Result<Vec<DurableRecord>>;

    /// Namespace this store reads and writes
    fn namespace(&self) -> &str;
}

/// Map a node name to its record namespace
///
/// Non-alphanumeric characters become `_`, so `"Grandma-Sharon 2"` owns
/// namespace `"Grandma_Sharon_2"`.
pub fn namespace_for(node_name: &str) -> String {
    node_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_for() {
        assert_eq!(namespace_for("Grandma-Sharon"), "Grandma_Sharon");
        assert_eq!(namespace_for("node 1.eu"), "node_1_eu");
        assert_eq!(namespace_for("plain"), "plain");
    }
}
