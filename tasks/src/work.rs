//! Prioritized work items and the execution context workers hand to them.

use crate::pool::WorkerPool;

/// A prioritized unit of synchronous work submitted to the pool.
///
/// Items carry no return channel: results, if any, are written into a
/// structure the submitter already owns, or the work is expressed as a
/// [`Task`](crate::Task) instead.
///
/// Higher priorities are serviced first; items of equal priority are
/// serviced in arrival order.
pub trait WorkItem: Send {
    /// Ordering key for the queue. Defaults to `0`.
    fn priority(&self) -> i32 {
        0
    }

    /// Perform the encapsulated action.
    ///
    /// Runs on a worker thread (or on the thread inside
    /// [`WorkerPool::run`](crate::WorkerPool::run)). A panic here is caught
    /// by the executing thread and never terminates the process.
    fn process(self: Box<Self>, ctx: &mut WorkContext<'_>);
}

/// Execution context passed to a work item by the thread that runs it.
pub struct WorkContext<'a> {
    pool: &'a WorkerPool,
    worker_index: Option<usize>,
    scratch: &'a mut Vec<u8>,
}

impl<'a> WorkContext<'a> {
    pub(crate) fn new(
        pool: &'a WorkerPool,
        worker_index: Option<usize>,
        scratch: &'a mut Vec<u8>,
    ) -> Self {
        Self {
            pool,
            worker_index,
            scratch,
        }
    }

    /// The pool executing this item, for submitting follow-up work.
    pub fn pool(&self) -> &WorkerPool {
        self.pool
    }

    /// Index of the executing worker thread, or `None` when the item is
    /// serviced by the thread inside [`WorkerPool::run`](crate::WorkerPool::run).
    pub fn worker_index(&self) -> Option<usize> {
        self.worker_index
    }

    /// Per-thread scratch buffer, cleared before each item.
    ///
    /// The allocation is reused across items on the same thread, so
    /// command-building work can grow it once and keep the capacity.
    pub fn scratch(&mut self) -> &mut Vec<u8> {
        self.scratch
    }
}

/// Adapter turning a closure into a [`WorkItem`].
pub(crate) struct FnWorkItem<F> {
    priority: i32,
    f: F,
}

impl<F> FnWorkItem<F> {
    pub fn new(priority: i32, f: F) -> Self {
        Self { priority, f }
    }
}

impl<F> WorkItem for FnWorkItem<F>
where
    F: FnOnce(&mut WorkContext<'_>) + Send,
{
    fn priority(&self) -> i32 {
        self.priority
    }

    fn process(self: Box<Self>, ctx: &mut WorkContext<'_>) {
        (self.f)(ctx);
    }
}
