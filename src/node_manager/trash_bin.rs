//! Deferred node destruction.
//!
//! Releasing a node never frees it on the releasing thread. The key goes into a
//! preallocated lock-free queue that the [`NodeManager`](super::NodeManager)
//! drains at the end of a period, while it holds the processing lock, so a node
//! cannot disappear in the middle of a pull.
//!
//! Disposing never logs. Overflows are counted and reported by
//! [`NodeManager::poll_events`](super::NodeManager::poll_events).

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;

use super::NodeKey;

pub(crate) struct TrashBin {
    queue: ArrayQueue<NodeKey>,
    /// Only used if the queue is full. Drained when the audio thread can get
    /// it without waiting.
    overflow: Mutex<Vec<NodeKey>>,
    overflowed: AtomicU64,
}

impl TrashBin {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            // Grows only past twice the queue capacity
            overflow: Mutex::new(Vec::with_capacity(capacity.max(1))),
            overflowed: AtomicU64::new(0),
        }
    }

    /// Safe to call from any thread, including the audio thread.
    pub(crate) fn dispose(&self, key: NodeKey) {
        if let Err(key) = self.queue.push(key) {
            self.overflowed.fetch_add(1, Ordering::Relaxed);
            self.overflow.lock().push(key);
        }
    }

    /// The number of releases that missed the queue since the last call.
    pub(crate) fn take_overflow_count(&self) -> u64 {
        self.overflowed.swap(0, Ordering::Relaxed)
    }

    pub(crate) fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Only called by the owning NodeManager with the processing lock held.
    pub(crate) fn drain(&self, mut f: impl FnMut(NodeKey)) {
        while let Some(key) = self.queue.pop() {
            f(key);
        }
        if let Some(mut overflow) = self.overflow.try_lock() {
            for key in overflow.drain(..) {
                f(key);
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len() + self.overflow.try_lock().map_or(0, |o| o.len())
    }
}
