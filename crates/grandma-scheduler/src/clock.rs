//! Wall and virtual clocks

use crate::config::SchedulerConfig;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall time in ms since the Unix epoch
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> i64;
}

/// The system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default()
    }
}

/// A clock moved by hand, for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Ticker time
///
/// Advances by a fixed step per tick and every `resync_every` ticks snaps
/// back to wall time minus the margin. It never runs ahead of wall time, so
/// a bucket is never fired before its slot has begun.
#[derive(Debug, Clone)]
pub struct VirtualClock {
    current_ms: i64,
    counter: u32,
    step_ms: i64,
    resync_every: u32,
    margin_ms: i64,
    bucket_ms: i64,
}

impl VirtualClock {
    pub fn new(config: &SchedulerConfig, wall_ms: i64) -> Self {
        let margin_ms = config.resync_margin.as_millis() as i64;
        Self {
            current_ms: wall_ms - margin_ms,
            counter: 0,
            step_ms: config.step_ms(),
            resync_every: config.resync_every,
            margin_ms,
            bucket_ms: config.bucket_ms,
        }
    }

    /// Move one tick forward and return the bucket key now current
    pub fn advance(&mut self, wall_ms: i64) -> i64 {
        if self.counter >= self.resync_every {
            self.counter = 0;
            self.current_ms = wall_ms - self.margin_ms;
        } else {
            self.counter += 1;
            self.current_ms = (self.current_ms + self.step_ms).min(wall_ms);
        }
        self.bucket_key()
    }

    pub fn now_ms(&self) -> i64 {
        self.current_ms
    }

    pub fn bucket_key(&self) -> i64 {
        self.current_ms.div_euclid(self.bucket_ms)
    }
}
