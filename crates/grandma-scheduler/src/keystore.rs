//! Time-bucketed schedule index
//!
//! Schedules are indexed by bucket key (`due_ms / bucket_ms`). Each bucket
//! keeps its ids in insertion order, and a reverse map records which bucket
//! every id lives in, so an id is in exactly one bucket at a time. Empty
//! buckets are pruned. Both maps sit under a single lock.

use grandma_core::RecordId;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::trace;

#[derive(Debug, Default)]
struct Inner {
    buckets: BTreeMap<i64, Vec<RecordId>>,
    index: HashMap<RecordId, i64>,
}

impl Inner {
    fn unlink(&mut self, id: RecordId) -> Option<i64> {
        let key = self.index.remove(&id)?;
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.retain(|&other| other != id);
            if bucket.is_empty() {
                self.buckets.remove(&key);
            }
        }
        Some(key)
    }
}

/// Bucket index of pending schedules
#[derive(Debug)]
pub struct Keystore {
    bucket_ms: i64,
    inner: Mutex<Inner>,
}

impl Keystore {
    pub fn new(bucket_ms: i64) -> Self {
        Self {
            bucket_ms: bucket_ms.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Bucket key for an absolute due time
    pub fn key_for(&self, due_at_ms: i64) -> i64 {
        due_at_ms.div_euclid(self.bucket_ms)
    }

    /// Index `id` at `due_at_ms`, moving it if it is already indexed
    pub fn put(&self, id: RecordId, due_at_ms: i64) -> i64 {
        let key = self.key_for(due_at_ms);
        let mut inner = self.inner.lock();
        inner.unlink(id);
        inner.buckets.entry(key).or_default().push(id);
        inner.index.insert(id, key);
        trace!(id, key, "Indexed schedule");
        key
    }

    /// Drop `id` from the index; returns whether it was present
    pub fn remove(&self, id: RecordId) -> bool {
        self.inner.lock().unlink(id).is_some()
    }

    /// Bucket key currently holding `id`
    pub fn key_of(&self, id: RecordId) -> Option<i64> {
        self.inner.lock().index.get(&id).copied()
    }

    /// Remove and return every id in buckets with key `<= key`
    ///
    /// Buckets come out in ascending key order, ids within a bucket in
    /// insertion order.
    pub fn take_due(&self, key: i64) -> Vec<RecordId> {
        let mut inner = self.inner.lock();
        let later = match key.checked_add(1) {
            Some(next) => inner.buckets.split_off(&next),
            None => BTreeMap::new(),
        };
        let due = std::mem::replace(&mut inner.buckets, later);

        let mut ids = Vec::new();
        for (_, bucket) in due {
            for id in bucket {
                inner.index.remove(&id);
                ids.push(id);
            }
        }
        ids
    }

    /// Number of indexed schedules
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().index.is_empty()
    }

    /// Number of non-empty buckets
    pub fn bucket_count(&self) -> usize {
        self.inner.lock().buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_put_and_take() {
        let ks = Keystore::new(100);
        assert_eq!(ks.put(1, 1_050), 10);
        assert_eq!(ks.put(2, 1_099), 10);
        assert_eq!(ks.put(3, 1_100), 11);

        assert!(ks.take_due(9).is_empty());
        assert_eq!(ks.take_due(10), vec![1, 2]);
        assert_eq!(ks.len(), 1);
        assert_eq!(ks.key_of(1), None);
        assert_eq!(ks.key_of(3), Some(11));
    }

    #[test]
    fn test_put_twice_relocates() {
        let ks = Keystore::new(100);
        ks.put(7, 500);
        ks.put(7, 2_000);
        assert_eq!(ks.len(), 1);
        assert_eq!(ks.bucket_count(), 1);
        assert_eq!(ks.key_of(7), Some(20));
        assert!(ks.take_due(19).is_empty());
        assert_eq!(ks.take_due(20), vec![7]);
    }

    #[test]
    fn test_take_due_catches_up_skipped_buckets() {
        let ks = Keystore::new(100);
        ks.put(3, 1_200);
        ks.put(1, 1_000);
        ks.put(2, 1_100);
        assert_eq!(ks.take_due(50), vec![1, 2, 3]);
        assert!(ks.is_empty());
        assert_eq!(ks.bucket_count(), 0);
    }

    #[test]
    fn test_remove_prunes_bucket() {
        let ks = Keystore::new(100);
        ks.put(1, 100);
        assert!(ks.remove(1));
        assert!(!ks.remove(1));
        assert_eq!(ks.bucket_count(), 0);
    }

    #[test]
    fn test_take_due_at_max_key() {
        let ks = Keystore::new(1);
        ks.put(1, i64::MAX);
        assert_eq!(ks.take_due(i64::MAX), vec![1]);
    }

    proptest! {
        #[test]
        fn test_every_id_fires_once(ops in prop::collection::vec((0u32..20, 0i64..10_000), 1..200)) {
            let ks = Keystore::new(100);
            let mut expected = std::collections::HashMap::new();
            for (id, due) in &ops {
                ks.put(*id, *due);
                expected.insert(*id, due / 100);
            }
            prop_assert_eq!(ks.len(), expected.len());

            let mut fired = Vec::new();
            for key in 0..=100 {
                for id in ks.take_due(key) {
                    prop_assert_eq!(expected.get(&id).copied(), Some(key));
                    fired.push(id);
                }
            }
            fired.sort();
            let mut ids: Vec<_> = expected.keys().copied().collect();
            ids.sort();
            prop_assert_eq!(fired, ids);
            prop_assert!(ks.is_empty());
        }
    }
}
