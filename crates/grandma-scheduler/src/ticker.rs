//! Periodic driver that fires due buckets

use crate::clock::{Clock, VirtualClock};
use crate::schedule::Scheduler;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

/// Advance `clock` one tick and drain every bucket now due
///
/// The drained ids are fired on a spawned task, so store writes never hold
/// up the next tick. Returns the fan-out task, which yields the number
/// fired, or `None` when nothing was due.
pub fn tick(scheduler: &Arc<Scheduler>, clock: &mut VirtualClock) -> Option<JoinHandle<usize>> {
    let key = clock.advance(scheduler.clock().now_ms());
    let ids = scheduler.keystore().take_due(key);
    if ids.is_empty() {
        return None;
    }

    let scheduler = scheduler.clone();
    Some(tokio::spawn(async move {
        let due = ids.len();
        let fired = scheduler.fire_all(ids).await;
        debug!(key, due, fired, "Fired due schedules");
        fired
    }))
}

/// Run the ticker until shutdown
pub fn spawn_ticker(
    scheduler: Arc<Scheduler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let config = scheduler.config().clone();
        let mut clock = VirtualClock::new(&config, scheduler.clock().now_ms());
        let mut ticker = interval(config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

        info!(
            tick_ms = config.step_ms(),
            resync_every = config.resync_every,
            "Scheduler ticker started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick(&scheduler, &mut clock);
                }
                _ = shutdown_rx.recv() => {
                    info!("Scheduler ticker shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SchedulerConfig;
    use async_trait::async_trait;
    use grandma_core::{
        DurableRecord, MemoryRecordStore, NotificationKind, RecordId, RecordStore,
        ScheduleRequest,
    };
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_tick_fires_only_when_due() {
        let wall = Arc::new(ManualClock::new(100_000));
        let scheduler = Arc::new(
            Scheduler::new(
                SchedulerConfig::default(),
                Arc::new(MemoryRecordStore::new("t")),
                wall.clone(),
            )
            .unwrap(),
        );

        let req = ScheduleRequest::new(106, "a@b.c", "hi", 2_000).unwrap();
        let id = scheduler.create(&req).await.unwrap().id();

        let mut clock = VirtualClock::new(scheduler.config(), wall.now_ms());
        // Virtual time starts 1 s behind wall time
        for _ in 0..10 {
            wall.advance(60);
            assert!(tick(&scheduler, &mut clock).is_none());
        }
        assert!(scheduler.is_pending(id));

        let mut fired = 0;
        for _ in 0..60 {
            wall.advance(60);
            if let Some(fan_out) = tick(&scheduler, &mut clock) {
                fired += fan_out.await.unwrap();
            }
        }
        assert_eq!(fired, 1);
        assert!(!scheduler.is_pending(id));
        assert_eq!(scheduler.delivery_queue().len(), 1);
    }

    /// Memory store whose sent flag takes a while to commit
    struct SlowStore {
        inner: MemoryRecordStore,
        delay: Duration,
    }

    #[async_trait]
    impl RecordStore for SlowStore {
        async fn insert_pending(
            &self,
            kind: NotificationKind,
            endpoint: &str,
            body: &str,
            due_at_ms: i64,
        ) -> grandma_core::Result<RecordId> {
            self.inner.insert_pending(kind, endpoint, body, due_at_ms).await
        }

        async fn mark_sent(&self, id: RecordId) -> grandma_core::Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.mark_sent(id).await
        }

        async fn list_unsent(&self) -> grandma_core::Result<Vec<DurableRecord>> {
            self.inner.list_unsent().await
        }

        fn namespace(&self) -> &str {
            self.inner.namespace()
        }
    }

    #[tokio::test]
    async fn test_slow_store_does_not_delay_next_tick() {
        let wall = Arc::new(ManualClock::new(100_000));
        let store = Arc::new(SlowStore {
            inner: MemoryRecordStore::new("t"),
            delay: Duration::from_millis(200),
        });
        let scheduler = Arc::new(
            Scheduler::new(SchedulerConfig::default(), store, wall.clone()).unwrap(),
        );

        let mut ids = Vec::new();
        for i in 0..3 {
            let req = ScheduleRequest::new(106, "a@b.c", format!("{}", i), 1_500).unwrap();
            ids.push(scheduler.create(&req).await.unwrap().id());
        }

        let mut clock = VirtualClock::new(scheduler.config(), wall.now_ms());
        wall.advance(2_000);
        let mut fan_out = None;
        while fan_out.is_none() {
            fan_out = tick(&scheduler, &mut clock);
        }
        let fan_out = fan_out.unwrap();

        // Next ticks run while the first bucket is still committing
        let started = Instant::now();
        for _ in 0..5 {
            wall.advance(60);
            assert!(tick(&scheduler, &mut clock).is_none());
        }
        assert!(started.elapsed() < Duration::from_millis(100));
        assert!(!fan_out.is_finished());

        assert_eq!(fan_out.await.unwrap(), 3);
        for id in ids {
            assert!(!scheduler.is_pending(id));
        }
        assert_eq!(scheduler.delivery_queue().len(), 3);
    }

    #[tokio::test]
    async fn test_spawned_ticker_stops_on_shutdown() {
        let scheduler = Arc::new(
            Scheduler::new(
                SchedulerConfig::default(),
                Arc::new(MemoryRecordStore::new("t")),
                Arc::new(crate::clock::SystemClock),
            )
            .unwrap(),
        );
        let (tx, rx) = broadcast::channel(1);
        let handle = spawn_ticker(scheduler, rx);
        tx.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
