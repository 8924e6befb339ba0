//! Engine context handed to game handlers.

use amaranth_tasks::WorkerPool;

/// Context available during every handler callback.
///
/// Gives game code access to the worker pool and frame timing.
pub struct EngineContext {
    /// The worker pool driving all asynchronous work.
    pub(crate) pool: WorkerPool,
    /// Current frame number (equals the pool's watermark).
    pub(crate) frame_number: u64,
    /// Delta time since the last frame in seconds.
    pub(crate) delta_time: f32,
    /// Time since engine start in seconds.
    pub(crate) elapsed_time: f64,
}

impl EngineContext {
    /// The worker pool, for spawning tasks and submitting work.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Current frame number.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Delta time since the last frame in seconds.
    pub fn delta_time(&self) -> f32 {
        self.delta_time
    }

    /// Time since engine start in seconds.
    pub fn elapsed_time(&self) -> f64 {
        self.elapsed_time
    }
}
