//! Schedule creation and firing
//!
//! Every accepted request is first written as a pending durable record, then
//! either fired right away (due within the immediate threshold) or indexed in
//! the [`Keystore`]. Firing hands the message to the delivery queue, flags
//! the record sent and completes the schedule's signal. A schedule fires at
//! most once per process.

use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::keystore::Keystore;
use grandma_core::{
    DurableRecord, Error, NotificationKind, RecordId, RecordStore, Result, ScheduleRequest,
    SendQueue,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// A due message on its way to the senders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueMessage {
    pub id: RecordId,
    pub kind: NotificationKind,
    pub endpoint: String,
    pub body: String,
}

/// Handle to an accepted schedule
#[derive(Debug)]
pub struct Schedule {
    id: RecordId,
    due_at_ms: i64,
    completion: oneshot::Receiver<()>,
}

impl Schedule {
    /// Durable record id
    pub fn id(&self) -> RecordId {
        self.id
    }

    /// Absolute due time, ms since the Unix epoch
    pub fn due_at_ms(&self) -> i64 {
        self.due_at_ms
    }

    /// Wait until the schedule has been handed to delivery
    ///
    /// Returns `false` if the scheduler went away first.
    pub async fn completed(self) -> bool {
        self.completion.await.is_ok()
    }

    /// Split into id and completion receiver
    pub fn into_parts(self) -> (RecordId, oneshot::Receiver<()>) {
        (self.id, self.completion)
    }
}

struct Pending {
    message: DueMessage,
    completion: Option<oneshot::Sender<()>>,
}

/// Scheduler statistics
#[derive(Debug, Clone, Default)]
pub struct SchedulerStatsSnapshot {
    pub created: u64,
    pub fired: u64,
    pub recovered: u64,
    pub deferred: u64,
}

#[derive(Debug, Default)]
struct SchedulerStats {
    created: AtomicU64,
    fired: AtomicU64,
    recovered: AtomicU64,
    deferred: AtomicU64,
}

/// Durable delayed-delivery scheduler
pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    keystore: Keystore,
    pending: Mutex<HashMap<RecordId, Pending>>,
    delivery: Arc<SendQueue<DueMessage>>,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let delivery = Arc::new(SendQueue::new(config.delivery_queue_length));
        Ok(Self {
            keystore: Keystore::new(config.bucket_ms),
            config,
            store,
            clock,
            pending: Mutex::new(HashMap::new()),
            delivery,
            stats: SchedulerStats::default(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn keystore(&self) -> &Keystore {
        &self.keystore
    }

    /// Queue feeding the delivery worker
    pub fn delivery_queue(&self) -> Arc<SendQueue<DueMessage>> {
        self.delivery.clone()
    }

    /// Store namespace this scheduler owns
    pub fn namespace(&self) -> &str {
        self.store.namespace()
    }

    /// Delay clamped to the horizon
    pub fn clamp_delay(&self, delay_ms: i64) -> i64 {
        delay_ms.clamp(0, self.config.horizon_ms)
    }

    /// Accept a request: persist it, then fire or index it
    ///
    /// Storage failures are returned to the caller; nothing is indexed then.
    pub async fn create(&self, request: &ScheduleRequest) -> Result<Schedule> {
        let now = self.clock.now_ms();
        let due_at_ms = now + self.clamp_delay(request.delay_ms());

        let id = self
            .store
            .insert_pending(
                request.kind(),
                request.endpoint(),
                request.body(),
                due_at_ms,
            )
            .await?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(
            id,
            Pending {
                message: DueMessage {
                    id,
                    kind: request.kind(),
                    endpoint: request.endpoint().to_string(),
                    body: request.body().to_string(),
                },
                completion: Some(tx),
            },
        );
        self.stats.created.fetch_add(1, Ordering::Relaxed);

        if request.delay_ms() < self.config.immediate_threshold_ms {
            debug!(id, kind = %request.kind(), "Schedule due now, firing");
            self.fire(id).await;
        } else {
            let key = self.keystore.put(id, due_at_ms);
            debug!(id, kind = %request.kind(), due_at_ms, key, "Schedule created");
        }

        Ok(Schedule {
            id,
            due_at_ms,
            completion: rx,
        })
    }

    /// Move a pending schedule to fire `delay_ms` from now
    pub async fn reschedule(&self, id: RecordId, delay_ms: i64) -> Result<i64> {
        if delay_ms < 0 {
            return Err(Error::NegativeDelay(delay_ms));
        }
        if !self.pending.lock().contains_key(&id) {
            return Err(Error::RecordNotFound(id));
        }

        let due_at_ms = self.clock.now_ms() + self.clamp_delay(delay_ms);
        if delay_ms < self.config.immediate_threshold_ms {
            self.keystore.remove(id);
            self.fire(id).await;
        } else {
            self.keystore.put(id, due_at_ms);
        }
        Ok(due_at_ms)
    }

    pub(crate) async fn store_unsent(&self) -> Result<Vec<DurableRecord>> {
        self.store.list_unsent().await
    }

    /// Register a record replayed from storage without writing it again
    pub(crate) fn adopt(&self, record: DurableRecord) {
        self.pending.lock().insert(
            record.id,
            Pending {
                message: DueMessage {
                    id: record.id,
                    kind: record.kind,
                    endpoint: record.endpoint,
                    body: record.body,
                },
                completion: None,
            },
        );
        self.stats.recovered.fetch_add(1, Ordering::Relaxed);
    }

    /// Hand a schedule to delivery
    ///
    /// Returns `false` if the id is unknown (already fired) or the delivery
    /// queue is full, in which case the schedule is put back one retry period
    /// later.
    ///
    /// A failed sent flag is logged and not retried: the message is already
    /// queued for delivery, and recovery after a restart fires the record a
    /// second time. Delivery is at-least-once across restarts.
    pub async fn fire(&self, id: RecordId) -> bool {
        let Some(mut pending) = self.pending.lock().remove(&id) else {
            return false;
        };

        if let Err(full) = self.delivery.push_back(pending.message.clone()) {
            warn!(
                id,
                capacity = full.capacity,
                "Delivery queue full, deferring schedule"
            );
            let retry_ms = self.config.full_queue_retry.as_millis() as i64;
            self.pending.lock().insert(id, pending);
            self.keystore.put(id, self.clock.now_ms() + retry_ms);
            self.stats.deferred.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if let Err(e) = self.store.mark_sent(id).await {
            error!(id, error = %e, "Failed to flag record as sent");
        }
        self.stats.fired.fetch_add(1, Ordering::Relaxed);

        if let Some(tx) = pending.completion.take() {
            let _ = tx.send(());
        }
        true
    }

    /// Fire everything in buckets up to and including `key`
    pub async fn fire_due(&self, key: i64) -> usize {
        let ids = self.keystore.take_due(key);
        self.fire_all(ids).await
    }

    /// Fire drained ids in order, returning how many reached delivery
    pub async fn fire_all(&self, ids: Vec<RecordId>) -> usize {
        let mut fired = 0;
        for id in ids {
            if self.fire(id).await {
                fired += 1;
            }
        }
        fired
    }

    /// Whether `id` is still waiting to fire
    pub fn is_pending(&self, id: RecordId) -> bool {
        self.pending.lock().contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn stats(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            created: self.stats.created.load(Ordering::Relaxed),
            fired: self.stats.fired.load(Ordering::Relaxed),
            recovered: self.stats.recovered.load(Ordering::Relaxed),
            deferred: self.stats.deferred.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("namespace", &self.store.namespace())
            .field("pending", &self.pending_count())
            .field("indexed", &self.keystore.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use grandma_core::MemoryRecordStore;

    const NOW: i64 = 1_700_000_000_000;

    fn scheduler(queue_len: usize) -> (Arc<MemoryRecordStore>, Arc<ManualClock>, Scheduler) {
        let store = Arc::new(MemoryRecordStore::new("test"));
        let clock = Arc::new(ManualClock::new(NOW));
        let config = SchedulerConfig::default().delivery_queue_length(queue_len);
        let scheduler = Scheduler::new(config, store.clone(), clock.clone()).unwrap();
        (store, clock, scheduler)
    }

    #[tokio::test]
    async fn test_create_indexes_future_schedule() {
        let (store, _, scheduler) = scheduler(10);
        let req = ScheduleRequest::new(106, "a@b.c", "hi", 5_000).unwrap();
        let schedule = scheduler.create(&req).await.unwrap();

        assert_eq!(schedule.due_at_ms(), NOW + 5_000);
        assert_eq!(
            scheduler.keystore().key_of(schedule.id()),
            Some((NOW + 5_000) / 100)
        );
        assert!(scheduler.delivery_queue().is_empty());

        let record = store.get(schedule.id()).unwrap();
        assert!(!record.sent);
        assert_eq!(record.due_at_ms, NOW + 5_000);
    }

    #[tokio::test]
    async fn test_short_delay_fires_immediately() {
        let (store, _, scheduler) = scheduler(10);
        let req = ScheduleRequest::new(109, "+1555", "now", 999).unwrap();
        let schedule = scheduler.create(&req).await.unwrap();
        let id = schedule.id();

        assert!(schedule.completed().await);
        assert!(scheduler.keystore().is_empty());
        assert!(store.get(id).unwrap().sent);

        let msg = scheduler.delivery_queue().try_pop().unwrap();
        assert_eq!(msg.kind, NotificationKind::Sms);
        assert_eq!(msg.endpoint, "+1555");
    }

    #[tokio::test]
    async fn test_fire_is_once() {
        let (_, _, scheduler) = scheduler(10);
        let req = ScheduleRequest::new(106, "a@b.c", "hi", 5_000).unwrap();
        let id = scheduler.create(&req).await.unwrap().id();

        assert!(scheduler.fire(id).await);
        assert!(!scheduler.fire(id).await);
        assert_eq!(scheduler.delivery_queue().len(), 1);
    }

    /// Memory store that cannot flag records sent
    struct StuckStore(MemoryRecordStore);

    #[async_trait::async_trait]
    impl RecordStore for StuckStore {
        async fn insert_pending(
            &self,
            kind: NotificationKind,
            endpoint: &str,
            body: &str,
            due_at_ms: i64,
        ) -> Result<RecordId> {
            self.0.insert_pending(kind, endpoint, body, due_at_ms).await
        }

        async fn mark_sent(&self, _id: RecordId) -> Result<()> {
            Err(Error::Storage("disk full".into()))
        }

        async fn list_unsent(&self) -> Result<Vec<DurableRecord>> {
            self.0.list_unsent().await
        }

        fn namespace(&self) -> &str {
            self.0.namespace()
        }
    }

    #[tokio::test]
    async fn test_failed_sent_flag_still_delivers_and_replays() {
        let store = Arc::new(StuckStore(MemoryRecordStore::new("test")));
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            store.clone(),
            Arc::new(ManualClock::new(NOW)),
        )
        .unwrap();

        let req = ScheduleRequest::new(106, "a@b.c", "hi", 0).unwrap();
        let schedule = scheduler.create(&req).await.unwrap();
        let id = schedule.id();
        assert!(schedule.completed().await);
        assert_eq!(scheduler.delivery_queue().len(), 1);

        // Still unsent, so a restart replays it
        let unsent = store.list_unsent().await.unwrap();
        assert_eq!(unsent.len(), 1);
        assert_eq!(unsent[0].id, id);
    }

    #[tokio::test]
    async fn test_full_delivery_queue_defers() {
        let (store, _, scheduler) = scheduler(1);
        let a = ScheduleRequest::new(106, "a@b.c", "1", 0).unwrap();
        scheduler.create(&a).await.unwrap();

        let b = ScheduleRequest::new(106, "a@b.c", "2", 0).unwrap();
        let schedule = scheduler.create(&b).await.unwrap();
        let id = schedule.id();

        assert!(scheduler.is_pending(id));
        assert!(scheduler.keystore().key_of(id).is_some());
        assert!(!store.get(id).unwrap().sent);
        assert_eq!(scheduler.stats().deferred, 1);

        scheduler.delivery_queue().try_pop().unwrap();
        let key = scheduler.keystore().key_of(id).unwrap();
        assert_eq!(scheduler.fire_due(key).await, 1);
        assert!(schedule.completed().await);
    }

    #[tokio::test]
    async fn test_reschedule() {
        let (_, _, scheduler) = scheduler(10);
        let req = ScheduleRequest::new(106, "a@b.c", "hi", 5_000).unwrap();
        let id = scheduler.create(&req).await.unwrap().id();

        let due = scheduler.reschedule(id, 60_000).await.unwrap();
        assert_eq!(due, NOW + 60_000);
        assert_eq!(scheduler.keystore().key_of(id), Some((NOW + 60_000) / 100));
        assert_eq!(scheduler.keystore().len(), 1);

        assert!(matches!(
            scheduler.reschedule(999, 10).await,
            Err(Error::RecordNotFound(999))
        ));
    }
}
