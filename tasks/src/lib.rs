//! # Amaranth Tasks
//!
//! Cooperative task scheduling and worker-pool execution for the Amaranth
//! Engine: every asynchronous unit of work — resource loading, GPU buffer
//! population, deferred destruction, background computation — is expressed,
//! queued, executed, and synchronized with the real-time frame loop through
//! this crate.
//!
//! ## Core Types
//!
//! - [`Task`] — lazy, awaitable computation with exactly-once resumption
//! - [`WorkItem`] / [`WorkContext`] — prioritized synchronous work units
//! - [`WorkerPool`] — fixed worker threads over a priority queue, plus
//!   main-thread affinity, frame-paced waits, and the resource graveyard
//! - [`FrameFence`] — CPU-visible completion flag for a submitted frame
//! - [`TaskError`] — captured computation failures, re-raised to awaiters
//!
//! ## Threading model
//!
//! A fixed pool of N worker threads plus exactly one designated main
//! thread. Worker threads block only on the shared queue; the main thread
//! blocks only on frame pacing. Suspended computations are resumed inline
//! on whatever thread completes the thing they awaited —
//! [`WorkerPool::main_thread`] and [`WorkerPool::wait_for_frame`] steer
//! that resumption onto the frame driver's thread.

mod error;
mod frame;
mod pool;
mod queue;
mod runnable;
mod task;
mod work;
mod worker;

pub use error::{TaskError, TaskResult};
pub use frame::FrameFence;
pub use pool::{FrameBarrier, MainThreadBarrier, PoolConfig, WorkerPool};
pub use task::Task;
pub use work::{WorkContext, WorkItem};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version at startup.
pub fn init() {
    log::info!("Amaranth Tasks v{VERSION} initialized");
}
