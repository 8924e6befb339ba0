//! Game handler trait.

use amaranth_tasks::Task;

use crate::context::EngineContext;

/// Trait for the game layer driven by the frame loop.
///
/// # Lifecycle
///
/// 1. `entry` — called once before the first frame; returns the root
///    asynchronous computation the pool drives to completion
/// 2. `tick` — called every frame before frame submission
/// 3. `on_shutdown` — called once after the frame loop exits
///
/// # Example
///
/// ```ignore
/// use amaranth_app::{EngineContext, GameHandler};
/// use amaranth_tasks::Task;
///
/// struct MyGame;
///
/// impl GameHandler for MyGame {
///     fn entry(&mut self, ctx: &EngineContext) -> Task<()> {
///         let pool = ctx.pool().clone();
///         Task::new(async move {
///             let level = pool.spawn(10, async { load_level().await }).await?;
///             pool.main_thread().await;
///             install_level(level);
///             Ok(())
///         })
///     }
///
///     fn tick(&mut self, _ctx: &EngineContext, time: f64, delta: f32) {
///         // Advance game state
///     }
/// }
/// ```
pub trait GameHandler {
    /// Root asynchronous computation, registered with the pool once.
    ///
    /// An error escaping this computation stops the pool and is surfaced
    /// by [`FrameDriver::run`](crate::FrameDriver::run).
    fn entry(&mut self, _ctx: &EngineContext) -> Task<()> {
        Task::completed(())
    }

    /// Per-frame game logic, invoked once per iteration before frame
    /// submission. `time` is seconds since engine start, `delta` seconds
    /// since the previous tick.
    fn tick(&mut self, _ctx: &EngineContext, _time: f64, _delta: f32) {}

    /// Called once after the frame loop exits, before workers are joined.
    fn on_shutdown(&mut self, _ctx: &EngineContext) {}
}
