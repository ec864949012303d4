//! Drop-oldest hand-off between the feed and its renderer
//!
//! The producer must never block on a slow consumer: views are only useful
//! while fresh, so when the queue is full the oldest queued view is thrown
//! away to make room for the new one. The consumer can poll (`try_recv`),
//! skip straight to the newest view (`latest`), or await the next one
//! (`recv`).
//!
//! Dropping the sender closes the channel; `recv` drains what is left and
//! then returns `None`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::debug;

/// What happened to a published item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Queued without displacing anything.
    Queued,
    /// Queue was full; the oldest item was discarded first.
    DroppedOldest,
}

#[derive(Debug)]
struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    published: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicBool,
}

/// Producer half. Dropping it closes the channel.
#[derive(Debug)]
pub struct SnapshotSender<T> {
    shared: Arc<Shared<T>>,
}

/// Consumer half.
#[derive(Debug)]
pub struct SnapshotReceiver<T> {
    shared: Arc<Shared<T>>,
}

/// Create a bounded drop-oldest channel holding at most `capacity` items.
pub fn snapshot_channel<T>(capacity: usize) -> (SnapshotSender<T>, SnapshotReceiver<T>) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        capacity,
        notify: Notify::new(),
        published: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
        closed: AtomicBool::new(false),
    });

    (
        SnapshotSender {
            shared: Arc::clone(&shared),
        },
        SnapshotReceiver { shared },
    )
}

impl<T> SnapshotSender<T> {
    /// Queue an item without blocking, discarding the oldest on overflow.
    pub fn publish(&self, item: T) -> PublishOutcome {
        let outcome = {
            let mut queue = self.shared.queue.lock();
            let outcome = if queue.len() >= self.shared.capacity {
                queue.pop_front();
                PublishOutcome::DroppedOldest
            } else {
                PublishOutcome::Queued
            };
            queue.push_back(item);
            outcome
        };

        self.shared.published.fetch_add(1, Ordering::Relaxed);
        if outcome == PublishOutcome::DroppedOldest {
            let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(dropped, "Consumer lagging, oldest view discarded");
        }

        self.shared.notify.notify_one();
        outcome
    }

    /// Items discarded because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Items published since creation.
    pub fn published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }
}

impl<T> Drop for SnapshotSender<T> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }
}

impl<T> SnapshotReceiver<T> {
    /// Take the oldest queued item, if any.
    pub fn try_recv(&self) -> Option<T> {
        self.shared.queue.lock().pop_front()
    }

    /// Discard everything but the newest item and return it.
    pub fn latest(&self) -> Option<T> {
        let mut queue = self.shared.queue.lock();
        let newest = queue.pop_back();
        queue.clear();
        newest
    }

    /// Wait for the next item; `None` once the sender is gone and the queue
    /// is empty.
    pub async fn recv(&self) -> Option<T> {
        loop {
            if let Some(item) = self.try_recv() {
                return Some(item);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                // An item may have landed between the pop and the flag read.
                return self.try_recv();
            }
            self.shared.notify.notified().await;
        }
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.lock().is_empty()
    }

    /// Whether the sender has been dropped.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Items discarded because this consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}
