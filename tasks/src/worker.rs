//! Worker thread loop.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::error::TaskError;
use crate::pool::{PoolShared, WorkerPool};
use crate::work::WorkContext;

/// Body of one worker thread: block on the queue, execute, repeat.
///
/// The loop exits once the queue is closed. Panics from work items are
/// caught here so a failing item never takes the process down; a panic from
/// an item with no owning task is latched for the pool's stop error.
pub(crate) fn run_worker(shared: Arc<PoolShared>, index: usize) {
    log::trace!("worker {index} started");
    let pool = WorkerPool::from_shared(Arc::clone(&shared));
    let mut scratch = Vec::new();

    while let Some(item) = shared.queue.pop() {
        scratch.clear();
        let mut ctx = WorkContext::new(&pool, Some(index), &mut scratch);
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| item.process(&mut ctx))) {
            let error = TaskError::from_panic(payload);
            log::error!("work item panicked on worker {index}: {error}");
            shared.latch_untracked_error(error);
        }
    }

    log::trace!("worker {index} exiting");
}
