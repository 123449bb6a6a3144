//! FIFO of mutations postponed until no query holds the tree locks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Thread-safe FIFO with a lock-free emptiness check.
#[derive(Debug)]
pub struct DeferredQueue<T> {
    ops: Mutex<VecDeque<T>>,
    /// Mirrors `ops.len()` so the common "nothing pending" case skips the lock.
    len: AtomicUsize,
}

impl<T> DeferredQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ops: Mutex::new(VecDeque::new()),
            len: AtomicUsize::new(0),
        }
    }

    /// Appends an operation.
    pub fn push(&self, op: T) {
        let mut ops = self.ops.lock();
        ops.push_back(op);
        self.len.store(ops.len(), Ordering::Release);
    }

    /// Removes the oldest operation.
    ///
    /// The lock is released before returning, so the caller may apply the
    /// operation while other threads keep queueing.
    pub fn pop(&self) -> Option<T> {
        if self.is_empty() {
            return None;
        }
        let mut ops = self.ops.lock();
        let op = ops.pop_front();
        self.len.store(ops.len(), Ordering::Release);
        op
    }

    /// Number of pending operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// True if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
