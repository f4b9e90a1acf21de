//! Request distribution
//!
//! The router decides, per request, whether the local scheduler keeps it or
//! it goes to the least-loaded slave. Forwarding only enqueues: the send loop
//! writes it out and settles the load reservation when the slave answers.

use crate::error::{ClusterError, Result};
use crate::node::SlotId;
use crate::protocol::ClusterMessage;
use crate::registry::{Candidate, Registry};
use grandma_core::{NotificationKind, RecordId, ScheduleRequest};
use grandma_scheduler::Scheduler;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where a request ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Scheduled on this node
    Local { schedule_id: RecordId },
    /// Queued for a slave
    Forwarded { slot: SlotId, node: String },
}

impl Placement {
    pub fn is_local(&self) -> bool {
        matches!(self, Placement::Local { .. })
    }
}

/// Front door for new requests
#[derive(Debug)]
pub struct Router {
    scheduler: Arc<Scheduler>,
    registry: Option<Arc<Registry>>,
    supported: Vec<NotificationKind>,
    increment: u32,
}

impl Router {
    /// Router that schedules everything locally
    pub fn standalone(scheduler: Arc<Scheduler>, supported: Vec<NotificationKind>) -> Self {
        Self {
            scheduler,
            registry: None,
            supported,
            increment: 0,
        }
    }

    /// Router that distributes over `registry`
    pub fn distributed(
        scheduler: Arc<Scheduler>,
        registry: Arc<Registry>,
        supported: Vec<NotificationKind>,
        increment: u32,
    ) -> Self {
        Self {
            scheduler,
            registry: Some(registry),
            supported,
            increment,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn registry(&self) -> Option<&Arc<Registry>> {
        self.registry.as_ref()
    }

    /// Validate a raw submission and route it
    pub async fn submit(
        &self,
        kind: i64,
        endpoint: impl Into<String>,
        body: impl Into<String>,
        delay_ms: i64,
    ) -> Result<Placement> {
        let request = ScheduleRequest::new(kind, endpoint, body, delay_ms)?;
        if !self.supported.contains(&request.kind()) {
            return Err(grandma_core::Error::UnsupportedType(request.kind().code()).into());
        }
        self.route(request).await
    }

    /// Place an already validated request
    pub async fn route(&self, request: ScheduleRequest) -> Result<Placement> {
        let Some(registry) = &self.registry else {
            return self.schedule_local(&request).await;
        };
        if request.kind().is_broadcast() {
            return self.schedule_local(&request).await;
        }
        if !ClusterMessage::forward_fits(&request) {
            debug!(
                kind = %request.kind(),
                body_len = request.body().len(),
                "Request exceeds frame size, keeping it local"
            );
            return self.schedule_local(&request).await;
        }

        match registry.pick(self.increment) {
            Candidate::Slave(slot) => self.forward(registry, slot, request),
            Candidate::Master => {
                let placement = self.schedule_local(&request).await?;
                if let Placement::Local { schedule_id } = placement {
                    debug!(
                        schedule_id,
                        master_load = registry.master_load(),
                        "No slave less loaded than master, keeping request"
                    );
                }
                Ok(placement)
            }
        }
    }

    async fn schedule_local(&self, request: &ScheduleRequest) -> Result<Placement> {
        let schedule = self.scheduler.create(request).await?;
        let (schedule_id, completion) = schedule.into_parts();

        if let Some(registry) = &self.registry {
            if !request.kind().is_broadcast() {
                let increment = self.increment as i64;
                registry.adjust_master(increment);
                let registry = registry.clone();
                tokio::spawn(async move {
                    let _ = completion.await;
                    registry.adjust_master(-increment);
                });
            }
        }
        Ok(Placement::Local { schedule_id })
    }

    fn forward(&self, registry: &Registry, slot: SlotId, request: ScheduleRequest) -> Result<Placement> {
        let Some(node) = registry.node(slot) else {
            registry.adjust(slot, -(self.increment as i64));
            return Err(ClusterError::NodeNotFound(slot));
        };

        if let Err(full) = node.queue().push_back(request) {
            registry.adjust(slot, -(self.increment as i64));
            warn!(
                slot,
                peer = %node.name(),
                capacity = full.capacity,
                "Send queue full, request rejected"
            );
            return Err(grandma_core::Error::from(full).into());
        }

        debug!(slot, peer = %node.name(), queued = node.queue().len(), "Request queued for slave");
        Ok(Placement::Forwarded {
            slot,
            node: node.name(),
        })
    }
}
