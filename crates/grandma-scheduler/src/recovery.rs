//! Crash recovery
//!
//! On startup every unsent record of the local namespace is replayed: records
//! due within the immediate threshold are fired at once, the rest are indexed
//! again with their remaining delay.

use crate::schedule::Scheduler;
use grandma_core::Result;
use tracing::{debug, info};

/// Outcome of a recovery pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Unsent records found
    pub total: usize,
    /// Fired immediately
    pub fired: usize,
    /// Indexed for later
    pub scheduled: usize,
}

impl Scheduler {
    /// Replay unsent records from storage
    ///
    /// A storage failure aborts recovery and is returned; callers treat it as
    /// fatal.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let records = self.store_unsent().await?;
        let now = self.clock().now_ms();
        let threshold = self.config().immediate_threshold_ms;

        let mut report = RecoveryReport {
            total: records.len(),
            ..Default::default()
        };

        for record in records {
            let id = record.id;
            let remaining = record.due_at_ms - now;
            self.adopt(record);

            if remaining < threshold {
                self.fire(id).await;
                report.fired += 1;
            } else {
                let key = self
                    .keystore()
                    .put(id, now + self.clamp_delay(remaining));
                debug!(id, remaining_ms = remaining, key, "Recovered schedule");
                report.scheduled += 1;
            }
        }

        info!(
            namespace = %self.namespace(),
            total = report.total,
            fired = report.fired,
            scheduled = report.scheduled,
            "Recovered schedules"
        );
        Ok(report)
    }
}
