//! Shared priority queue feeding the worker threads.
//!
//! Higher priority pops first; within a priority, items pop in arrival
//! order. The FIFO tie-break is a designed guarantee: each push captures a
//! monotonically increasing sequence number under the queue lock.

use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::work::WorkItem;

struct Entry {
    priority: i32,
    seq: u64,
    item: Box<dyn WorkItem>,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: highest priority wins, then the earliest sequence.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Inner {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
    closed: bool,
}

/// Blocking max-priority queue shared by all workers.
pub(crate) struct WorkQueue {
    inner: Mutex<Inner>,
    available: Condvar,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                heap: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue an item and wake one idle worker.
    ///
    /// Returns `false` if the queue is closed; the item is dropped.
    pub fn push(&self, item: Box<dyn WorkItem>) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return false;
            }
            let seq = inner.next_seq;
            inner.next_seq += 1;
            let priority = item.priority();
            inner.heap.push(Entry {
                priority,
                seq,
                item,
            });
        }
        self.available.notify_one();
        true
    }

    /// Block until an item is available, returning `None` once closed.
    ///
    /// Closing takes effect immediately: a closed queue returns `None`
    /// even when items are still pending.
    pub fn pop(&self) -> Option<Box<dyn WorkItem>> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(entry) = inner.heap.pop() {
                return Some(entry.item);
            }
            self.available.wait(&mut inner);
        }
    }

    /// Like [`pop`](Self::pop), but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Box<dyn WorkItem>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(entry) = inner.heap.pop() {
                return Some(entry.item);
            }
            if self.available.wait_until(&mut inner, deadline).timed_out() {
                return if inner.closed {
                    None
                } else {
                    inner.heap.pop().map(|e| e.item)
                };
            }
        }
    }

    /// Close the queue, dropping pending items and waking every blocked pop.
    pub fn close(&self) {
        let dropped = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            std::mem::take(&mut inner.heap)
        };
        if !dropped.is_empty() {
            log::debug!("work queue closed with {} pending items", dropped.len());
        }
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().heap.len()
    }
}
