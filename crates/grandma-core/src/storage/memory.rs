//! In-memory record store

use super::{namespace_for, DurableRecord, RecordId, RecordStore};
use crate::error::{Error, Result};
use crate::message::NotificationKind;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Record store that lives as long as the process
#[derive(Debug)]
pub struct MemoryRecordStore {
    namespace: String,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: RecordId,
    records: BTreeMap<RecordId, DurableRecord>,
}

impl MemoryRecordStore {
    pub fn new(node_name: &str) -> Self {
        Self {
            namespace: namespace_for(node_name),
            inner: Mutex::new(Inner {
                next_id: 1,
                records: BTreeMap::new(),
            }),
        }
    }

    /// Seed a record as if it had been persisted by an earlier run
    pub fn insert_record(&self, record: DurableRecord) {
        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.max(record.id + 1);
        inner.records.insert(record.id, record);
    }

    /// Fetch a record by id
    pub fn get(&self, id: RecordId) -> Option<DurableRecord> {
        self.inner.lock().records.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn insert_pending(
        &self,
        kind: NotificationKind,
        endpoint: &str,
        body: &str,
        due_at_ms: i64,
    ) -> Result<RecordId> {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.records.insert(
            id,
            DurableRecord {
                id,
                kind,
                endpoint: endpoint.to_string(),
                body: body.to_string(),
                due_at_ms,
                sent: false,
            },
        );
        Ok(id)
    }

    async fn mark_sent(&self, id: RecordId) -> Result<()> {
        let mut inner = self.inner.lock();
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(Error::RecordNotFound(id))?;
        record.sent = true;
        Ok(())
    }

    async fn list_unsent(&self) -> Result<Vec<DurableRecord>> {
        Ok(self
            .inner
            .lock()
            .records
            .values()
            .filter(|r| !r.sent)
            .cloned()
            .collect())
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_mark_sent() {
        let store = MemoryRecordStore::new("test node");
        assert_eq!(store.namespace(), "test_node");

        let a = store
            .insert_pending(NotificationKind::Email, "a@b.c", "hi", 1000)
            .await
            .unwrap();
        let b = store
            .insert_pending(NotificationKind::Sms, "+1555", "yo", 2000)
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(store.list_unsent().await.unwrap().len(), 2);

        store.mark_sent(a).await.unwrap();
        let unsent = store.list_unsent().await.unwrap();
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].id, b);
        assert_eq!(unsent[0].due_at_ms, 2000);
    }

    #[tokio::test]
    async fn test_mark_unknown_record() {
        let store = MemoryRecordStore::new("n");
        assert!(matches!(
            store.mark_sent(99).await,
            Err(Error::RecordNotFound(99))
        ));
    }

    #[tokio::test]
    async fn test_seeded_records_advance_ids() {
        let store = MemoryRecordStore::new("n");
        store.insert_record(DurableRecord {
            id: 10,
            kind: NotificationKind::Rest,
            endpoint: "GET http://x text/plain".into(),
            body: String::new(),
            due_at_ms: 5,
            sent: false,
        });
        let id = store
            .insert_pending(NotificationKind::Rest, "e", "b", 6)
            .await
            .unwrap();
        assert_eq!(id, 11);
    }
}
