//! Scheduler configuration

use grandma_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Thirty days, the longest a schedule is held before firing
pub const DEFAULT_HORIZON_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Ticker period; the virtual clock advances by this much per tick
    pub tick_interval: Duration,

    /// Ticks between resyncs of the virtual clock to wall time
    pub resync_every: u32,

    /// How far behind wall time the virtual clock is resynced
    pub resync_margin: Duration,

    /// Width of one keystore bucket in ms
    pub bucket_ms: i64,

    /// Delays above this are clamped to it
    pub horizon_ms: i64,

    /// Schedules due sooner than this skip the keystore and fire at once
    pub immediate_threshold_ms: i64,

    /// Capacity of the delivery queue
    pub delivery_queue_length: usize,

    /// Delay before a due schedule is retried when the delivery queue is full
    pub full_queue_retry: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(60),
            resync_every: 500,
            resync_margin: Duration::from_secs(1),
            bucket_ms: 100,
            horizon_ms: DEFAULT_HORIZON_MS,
            immediate_threshold_ms: 1000,
            delivery_queue_length: 1000,
            full_queue_retry: Duration::from_millis(100),
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn resync_every(mut self, ticks: u32) -> Self {
        self.resync_every = ticks;
        self
    }

    pub fn resync_margin(mut self, margin: Duration) -> Self {
        self.resync_margin = margin;
        self
    }

    pub fn horizon_ms(mut self, ms: i64) -> Self {
        self.horizon_ms = ms;
        self
    }

    pub fn delivery_queue_length(mut self, len: usize) -> Self {
        self.delivery_queue_length = len;
        self
    }

    /// Tick period in whole ms
    pub fn step_ms(&self) -> i64 {
        self.tick_interval.as_millis() as i64
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(Error::InvalidConfig("tick_interval must be > 0".into()));
        }
        if self.bucket_ms <= 0 {
            return Err(Error::InvalidConfig("bucket_ms must be > 0".into()));
        }
        if self.horizon_ms <= 0 {
            return Err(Error::InvalidConfig("horizon_ms must be > 0".into()));
        }
        if self.immediate_threshold_ms < 0 {
            return Err(Error::InvalidConfig(
                "immediate_threshold_ms must be >= 0".into(),
            ));
        }
        if self.delivery_queue_length == 0 {
            return Err(Error::InvalidConfig(
                "delivery_queue_length must be > 0".into(),
            ));
        }
        Ok(())
    }
}
