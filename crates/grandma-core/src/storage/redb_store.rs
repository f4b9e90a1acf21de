//! redb-based record storage
//!
//! Pure Rust implementation using redb - zero C dependencies. Each namespace
//! gets its own table `records_<namespace>`; values are postcard-encoded
//! [`DurableRecord`]s keyed by record id.

use super::{namespace_for, DurableRecord, RecordId, RecordStore};
use crate::error::{Error, Result};
use crate::message::NotificationKind;
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

fn storage_err(e: impl std::fmt::Display) -> Error {
    Error::Storage(e.to_string())
}

/// redb-backed record store
///
/// Write transactions are serialized by redb, so id allocation (last key + 1)
/// and insertion happen atomically.
#[derive(Clone)]
pub struct RedbRecordStore {
    db: Arc<Database>,
    namespace: String,
    table: String,
}

impl RedbRecordStore {
    /// Open (or create) the database file and the namespace table
    pub fn open(path: impl AsRef<Path>, node_name: &str) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path).map_err(storage_err)?;
        let namespace = namespace_for(node_name);
        let store = Self {
            db: Arc::new(db),
            table: format!("records_{}", namespace),
            namespace,
        };

        // Create the table if it doesn't exist
        let write_txn = store.db.begin_write().map_err(storage_err)?;
        {
            let _ = write_txn
                .open_table(store.definition())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;

        info!(
            path = %path.display(),
            namespace = %store.namespace,
            "Opened redb record storage"
        );
        Ok(store)
    }

    fn definition(&self) -> TableDefinition<'_, RecordId, &'static [u8]> {
        TableDefinition::new(&self.table)
    }

    fn update<F>(&self, id: RecordId, f: F) -> Result<()>
    where
        F: FnOnce(&mut DurableRecord),
    {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        {
            let mut table = write_txn
                .open_table(self.definition())
                .map_err(storage_err)?;
            let bytes = table
                .get(id)
                .map_err(storage_err)?
                .map(|guard| guard.value().to_vec())
                .ok_or(Error::RecordNotFound(id))?;

            let mut record: DurableRecord = postcard::from_bytes(&bytes)?;
            f(&mut record);
            let bytes = postcard::to_allocvec(&record)?;
            table
                .insert(id, bytes.as_slice())
                .map_err(storage_err)?;
        }
        write_txn.commit().map_err(storage_err)?;
        Ok(())
    }

    fn insert_blocking(
        &self,
        kind: NotificationKind,
        endpoint: &str,
        body: &str,
        due_at_ms: i64,
    ) -> Result<RecordId> {
        let write_txn = self.db.begin_write().map_err(storage_err)?;
        let id = {
            let mut table = write_txn
                .open_table(self.definition())
                .map_err(storage_err)?;
            let id = match table.last().map_err(storage_err)? {
                Some((key, _)) => key.value() + 1,
                None => 1,
            };

            let record = DurableRecord {
                id,
                kind,
                endpoint: endpoint.to_string(),
                body: body.to_string(),
                due_at_ms,
                sent: false,
            };
            let bytes = postcard::to_allocvec(&record)?;
            table
                .insert(id, bytes.as_slice())
                .map_err(storage_err)?;
            id
        };
        write_txn.commit().map_err(storage_err)?;
        Ok(id)
    }

    /// Run a write transaction on the blocking pool
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&RedbRecordStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| Error::Storage(format!("storage task join: {}", e)))?
    }
}

#[async_trait]
impl RecordStore for RedbRecordStore {
    async fn insert_pending(
        &self,
        kind: NotificationKind,
        endpoint: &str,
        body: &str,
        due_at_ms: i64,
    ) -> Result<RecordId> {
        let endpoint = endpoint.to_string();
        let body = body.to_string();
        let id = self
            .blocking(move |store| store.insert_blocking(kind, &endpoint, &body, due_at_ms))
            .await?;

        debug!(id, due_at_ms, namespace = %self.namespace, "Inserted pending record");
        Ok(id)
    }

    async fn mark_sent(&self, id: RecordId) -> Result<()> {
        self.blocking(move |store| store.update(id, |record| record.sent = true))
            .await
    }

    async fn list_unsent(&self) -> Result<Vec<DurableRecord>> {
        let read_txn = self.db.begin_read().map_err(storage_err)?;
        let table = read_txn
            .open_table(self.definition())
            .map_err(storage_err)?;

        let mut records = Vec::new();
        for entry in table.iter().map_err(storage_err)? {
            let (_, value) = entry.map_err(storage_err)?;
            let record: DurableRecord = postcard::from_bytes(value.value())?;
            if !record.sent {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }
}
