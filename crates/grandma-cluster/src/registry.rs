//! Node registry and load ranking
//!
//! Slaves occupy stable slots, added once during discovery and never removed.
//! A binary min-heap over slot indices orders them by load; every load change
//! is followed by an explicit `fix` of the changed slot. One lock guards all
//! loads, the heap bookkeeping, the master's own load and the set of slots
//! waiting to reconnect.
//!
//! A closed slot keeps its place but its load is pinned to [`CLOSED_LOAD`], so
//! it never wins a selection. Its real load is kept aside and restored when
//! the slave reconnects.

use crate::node::{Generation, Node, SlotId};
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Load of a closed slot
pub const CLOSED_LOAD: u32 = u32::MAX;

/// Highest load a live slot can reach
const MAX_LIVE_LOAD: u32 = CLOSED_LOAD - 1;

/// Where the next request should go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    /// The master keeps it
    Master,
    /// This slave, with the reservation already taken
    Slave(SlotId),
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    load: u32,
    saved: u32,
    closed: bool,
}

#[derive(Debug, Default)]
struct Ranking {
    slots: Vec<Slot>,
    /// Heap of slot ids, min load on top
    heap: Vec<SlotId>,
    /// Position of each slot in `heap`
    pos: Vec<usize>,
    master_load: u32,
    pending: BTreeSet<SlotId>,
}

impl Ranking {
    fn less(&self, a: SlotId, b: SlotId) -> bool {
        (self.slots[a].load, a) < (self.slots[b].load, b)
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.pos[self.heap[i]] = i;
        self.pos[self.heap[j]] = j;
    }

    fn sift_up(&mut self, mut i: usize) -> bool {
        let start = i;
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.less(self.heap[i], self.heap[parent]) {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
        i != start
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.heap.len();
        loop {
            let left = 2 * i + 1;
            let right = left + 1;
            let mut smallest = i;
            if left < n && self.less(self.heap[left], self.heap[smallest]) {
                smallest = left;
            }
            if right < n && self.less(self.heap[right], self.heap[smallest]) {
                smallest = right;
            }
            if smallest == i {
                break;
            }
            self.swap(i, smallest);
            i = smallest;
        }
    }

    /// Restore heap order after `slot`'s load changed
    fn fix(&mut self, slot: SlotId) {
        let i = self.pos[slot];
        if !self.sift_up(i) {
            self.sift_down(i);
        }
    }

    fn push(&mut self, slot: Slot) -> SlotId {
        let id = self.slots.len();
        self.slots.push(slot);
        self.pos.push(self.heap.len());
        self.heap.push(id);
        self.sift_up(self.heap.len() - 1);
        id
    }

    fn peek_min(&self) -> Option<SlotId> {
        self.heap.first().copied()
    }

    fn set_load(&mut self, slot: SlotId, load: u32) {
        self.slots[slot].load = load;
        self.fix(slot);
    }

    fn adjust(&mut self, slot: SlotId, delta: i64) {
        let s = &mut self.slots[slot];
        if s.closed {
            s.saved = apply(s.saved, delta);
        } else {
            let load = apply(s.load, delta);
            self.set_load(slot, load);
        }
    }
}

fn apply(load: u32, delta: i64) -> u32 {
    (load as i64 + delta).clamp(0, MAX_LIVE_LOAD as i64) as u32
}

/// Master-side view of all slaves
#[derive(Debug)]
pub struct Registry {
    ranking: RwLock<Ranking>,
    nodes: RwLock<Vec<Arc<Node>>>,
}

impl Registry {
    pub fn new(master_load: u32) -> Self {
        Self {
            ranking: RwLock::new(Ranking {
                master_load,
                ..Default::default()
            }),
            nodes: RwLock::new(Vec::new()),
        }
    }

    /// Add a slave in the next free slot
    ///
    /// A node added closed is pinned to [`CLOSED_LOAD`] and queued for
    /// reconnection, with `load` restored once it connects.
    pub fn insert(
        &self,
        make: impl FnOnce(SlotId) -> Node,
        load: u32,
        closed: bool,
    ) -> Arc<Node> {
        let mut nodes = self.nodes.write();
        let mut ranking = self.ranking.write();

        let slot = ranking.push(Slot {
            load: if closed { CLOSED_LOAD } else { load.min(MAX_LIVE_LOAD) },
            saved: load,
            closed,
        });
        if closed {
            ranking.pending.insert(slot);
        }

        let node = Arc::new(make(slot));
        nodes.push(node.clone());
        node
    }

    pub fn node(&self, slot: SlotId) -> Option<Arc<Node>> {
        self.nodes.read().get(slot).cloned()
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    pub fn len(&self) -> usize {
        self.ranking.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Least-loaded slot, closed or not
    pub fn peek_min(&self) -> Option<SlotId> {
        self.ranking.read().peek_min()
    }

    /// Pick where a request goes and reserve `increment` on the chosen slave
    ///
    /// The master keeps the request when there is no slave, the best slave is
    /// closed, or the best slave is busier than the master.
    pub fn pick(&self, increment: u32) -> Candidate {
        let mut ranking = self.ranking.write();
        let Some(best) = ranking.peek_min() else {
            return Candidate::Master;
        };
        let slot = ranking.slots[best];
        if slot.closed || slot.load > ranking.master_load {
            return Candidate::Master;
        }
        ranking.adjust(best, increment as i64);
        Candidate::Slave(best)
    }

    /// Change a slave's load by `delta`
    ///
    /// Applied to the saved load while the slave is closed.
    pub fn adjust(&self, slot: SlotId, delta: i64) {
        let mut ranking = self.ranking.write();
        if slot < ranking.slots.len() {
            ranking.adjust(slot, delta);
        }
    }

    pub fn load(&self, slot: SlotId) -> Option<u32> {
        self.ranking.read().slots.get(slot).map(|s| s.load)
    }

    /// Every slot's current load, by slot
    pub fn loads(&self) -> Vec<u32> {
        self.ranking.read().slots.iter().map(|s| s.load).collect()
    }

    pub fn master_load(&self) -> u32 {
        self.ranking.read().master_load
    }

    pub fn adjust_master(&self, delta: i64) {
        let mut ranking = self.ranking.write();
        ranking.master_load = apply(ranking.master_load, delta);
    }

    pub fn is_closed(&self, slot: SlotId) -> bool {
        self.ranking
            .read()
            .slots
            .get(slot)
            .map(|s| s.closed)
            .unwrap_or(true)
    }

    /// Pin a slot to the sentinel and queue it for reconnection
    ///
    /// Returns `false` if it was already closed.
    pub fn mark_closed(&self, slot: SlotId) -> bool {
        let mut ranking = self.ranking.write();
        let Some(s) = ranking.slots.get_mut(slot) else {
            return false;
        };
        if s.closed {
            return false;
        }
        s.closed = true;
        s.saved = s.load;
        ranking.set_load(slot, CLOSED_LOAD);
        ranking.pending.insert(slot);
        true
    }

    /// Bring a reconnected slot back with its pre-disconnect load
    pub fn restore(&self, slot: SlotId) -> bool {
        let mut ranking = self.ranking.write();
        let Some(s) = ranking.slots.get_mut(slot) else {
            return false;
        };
        if !s.closed {
            return false;
        }
        s.closed = false;
        let saved = s.saved.min(MAX_LIVE_LOAD);
        ranking.set_load(slot, saved);
        ranking.pending.remove(&slot);
        true
    }

    /// Slots waiting to reconnect
    pub fn pending_reconnect(&self) -> Vec<SlotId> {
        self.ranking.read().pending.iter().copied().collect()
    }

    /// Detach a failed connection and close its slot
    ///
    /// Only the connection of `generation` is affected; a stale caller is a
    /// no-op.
    pub async fn disconnect(&self, slot: SlotId, generation: Generation) -> bool {
        let Some(node) = self.node(slot) else {
            return false;
        };
        if !node.detach(generation).await {
            return false;
        }
        if self.mark_closed(slot) {
            warn!(
                slot,
                peer = %node.name(),
                pending = self.pending_reconnect().len(),
                "Slave disconnected"
            );
        }
        true
    }

    /// Mark a slot reconnected
    pub fn reconnected(&self, slot: SlotId) {
        if self.restore(slot) {
            info!(slot, load = ?self.load(slot), "Slave reconnected");
        }
    }

    /// Number of open slots
    pub fn connected_count(&self) -> usize {
        self.ranking.read().slots.iter().filter(|s| !s.closed).count()
    }
}
