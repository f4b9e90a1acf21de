//! Bounded send queue
//!
//! A fixed-capacity ring buffer with an async blocking pop. Pushing never
//! blocks: a full queue hands the item back with [`QueueFull`] so the caller
//! decides what to do with it. This is the only admission-control point of
//! the system.
//!
//! Failed sends go back in with [`SendQueue::push_front`], so the most
//! recently failed item is the next one popped.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

use crate::error::Error;

/// Rejected push; carries the item back to the caller
pub struct QueueFull<T> {
    pub item: T,
    pub capacity: usize,
}

impl<T> fmt::Debug for QueueFull<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueFull")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<T> From<QueueFull<T>> for Error {
    fn from(e: QueueFull<T>) -> Self {
        Error::QueueFull {
            capacity: e.capacity,
        }
    }
}

/// Ring storage. `front == back` means empty and `next(back) == front` means
/// full, so one slot is always left unused.
struct Ring<T> {
    slots: Vec<Option<T>>,
    front: usize,
    back: usize,
}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity + 1);
        slots.resize_with(capacity + 1, || None);
        Self {
            slots,
            front: 0,
            back: 0,
        }
    }

    fn next(&self, i: usize) -> usize {
        if i + 1 == self.slots.len() {
            0
        } else {
            i + 1
        }
    }

    fn prev(&self, i: usize) -> usize {
        if i == 0 {
            self.slots.len() - 1
        } else {
            i - 1
        }
    }

    fn is_empty(&self) -> bool {
        self.front == self.back
    }

    fn is_full(&self) -> bool {
        self.next(self.back) == self.front
    }

    fn len(&self) -> usize {
        if self.back >= self.front {
            self.back - self.front
        } else {
            self.slots.len() - self.front + self.back
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default)]
pub struct QueueStatsSnapshot {
    pub pushed: u64,
    pub requeued: u64,
    pub popped: u64,
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct QueueStats {
    pushed: AtomicU64,
    requeued: AtomicU64,
    popped: AtomicU64,
    rejected: AtomicU64,
}

/// Bounded FIFO with front reinsertion and async blocking pop
pub struct SendQueue<T> {
    ring: Mutex<Ring<T>>,
    capacity: usize,
    not_empty: Notify,
    stats: QueueStats,
}

impl<T> SendQueue<T> {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(Ring::with_capacity(capacity)),
            capacity,
            not_empty: Notify::new(),
            stats: QueueStats::default(),
        }
    }

    /// Append at the back
    pub fn push_back(&self, item: T) -> Result<(), QueueFull<T>> {
        {
            let mut ring = self.ring.lock();
            if ring.is_full() {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(QueueFull {
                    item,
                    capacity: self.capacity,
                });
            }
            let back = ring.back;
            ring.slots[back] = Some(item);
            ring.back = ring.next(back);
        }
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Reinsert at the front so the item is popped next
    pub fn push_front(&self, item: T) -> Result<(), QueueFull<T>> {
        {
            let mut ring = self.ring.lock();
            if ring.is_full() {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(QueueFull {
                    item,
                    capacity: self.capacity,
                });
            }
            let front = ring.prev(ring.front);
            ring.slots[front] = Some(item);
            ring.front = front;
        }
        self.stats.requeued.fetch_add(1, Ordering::Relaxed);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop the front item if there is one
    pub fn try_pop(&self) -> Option<T> {
        let mut ring = self.ring.lock();
        if ring.is_empty() {
            return None;
        }
        let front = ring.front;
        let item = ring.slots[front].take();
        ring.front = ring.next(front);
        drop(ring);

        if item.is_some() {
            self.stats.popped.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Pop the front item, waiting until one is available
    pub async fn pop(&self) -> T {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_pop() {
                // Pass the wakeup on if more items are waiting
                if !self.is_empty() {
                    self.not_empty.notify_one();
                }
                return item;
            }

            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ring.lock().is_full()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            pushed: self.stats.pushed.load(Ordering::Relaxed),
            requeued: self.stats.requeued.load(Ordering::Relaxed),
            popped: self.stats.popped.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
        }
    }
}

impl<T> fmt::Debug for SendQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let q = SendQueue::new(4);
        q.push_back(1).unwrap();
        q.push_back(2).unwrap();
        q.push_back(3).unwrap();
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), Some(3));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_push_front_goes_first() {
        let q = SendQueue::new(4);
        q.push_back("a").unwrap();
        q.push_back("b").unwrap();
        q.push_front("retry-1").unwrap();
        q.push_front("retry-2").unwrap();
        assert_eq!(q.try_pop(), Some("retry-2"));
        assert_eq!(q.try_pop(), Some("retry-1"));
        assert_eq!(q.try_pop(), Some("a"));
        assert_eq!(q.try_pop(), Some("b"));
    }

    #[test]
    fn test_full_queue_rejects() {
        let q = SendQueue::new(2);
        q.push_back(1).unwrap();
        q.push_back(2).unwrap();
        assert!(q.is_full());

        let err = q.push_back(3).unwrap_err();
        assert_eq!(err.item, 3);
        assert_eq!(err.capacity, 2);

        let err = q.push_front(4).unwrap_err();
        assert_eq!(err.item, 4);
        assert_eq!(q.len(), 2);
        assert_eq!(q.stats().rejected, 2);
    }

    #[test]
    fn test_wraparound() {
        let q = SendQueue::new(3);
        for round in 0..10 {
            q.push_back(round).unwrap();
            q.push_back(round + 100).unwrap();
            assert_eq!(q.len(), 2);
            assert_eq!(q.try_pop(), Some(round));
            assert_eq!(q.try_pop(), Some(round + 100));
            assert!(q.is_empty());
        }
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let q = Arc::new(SendQueue::new(8));
        let consumer = {
            let q = q.clone();
            tokio::spawn(async move { q.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished());

        q.push_back(42).unwrap();
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, 42);
    }

    #[tokio::test]
    async fn test_multiple_waiters_all_served() {
        let q = Arc::new(SendQueue::new(8));
        let mut handles = Vec::new();
        for _ in 0..3 {
            let q = q.clone();
            handles.push(tokio::spawn(async move { q.pop().await }));
        }

        for i in 0..3 {
            q.push_back(i).unwrap();
        }

        let mut got = Vec::new();
        for h in handles {
            got.push(
                tokio::time::timeout(Duration::from_secs(1), h)
                    .await
                    .unwrap()
                    .unwrap(),
            );
        }
        got.sort();
        assert_eq!(got, vec![0, 1, 2]);
    }
}
