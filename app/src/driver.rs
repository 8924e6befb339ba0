//! Frame driver: the single top-level loop of the engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use amaranth_tasks::{PoolConfig, TaskError, WorkerPool};

use crate::args::EngineArgs;
use crate::context::EngineContext;
use crate::handler::GameHandler;
use crate::render::{FrameSink, NullFrameSink};

/// The engine's top-level loop, run on the designated main thread.
///
/// One iteration advances the simulation clock, confirms frame completion
/// ([`WorkerPool::process_frame_waits`]), resumes main-thread-affinity
/// continuations, ticks the game handler, submits one rendering frame, and
/// advances the frame watermark. The loop exits when the closing flag is
/// raised, the frame cap is reached, or the pool is stopped; the pool is
/// then stopped and joined, and the latched error (if any) is returned
/// exactly once.
pub struct FrameDriver<H: GameHandler> {
    pool: WorkerPool,
    sink: Box<dyn FrameSink>,
    handler: H,
    closing: Arc<AtomicBool>,
    max_frames: Option<u64>,
}

impl<H: GameHandler> FrameDriver<H> {
    /// Create a driver owning a freshly started pool.
    pub fn new(handler: H, sink: Box<dyn FrameSink>, config: PoolConfig) -> Self {
        Self {
            pool: WorkerPool::with_config(config),
            sink,
            handler,
            closing: Arc::new(AtomicBool::new(false)),
            max_frames: None,
        }
    }

    /// Exit after `count` frames. Used by automated runs.
    pub fn with_max_frames(mut self, count: u64) -> Self {
        self.max_frames = Some(count);
        self
    }

    /// Flag that external code raises to end the loop after the current
    /// iteration.
    pub fn closing_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closing)
    }

    /// The pool owned by this driver.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run the frame loop to completion on the calling thread.
    ///
    /// The calling thread becomes the designated main thread. Returns the
    /// error the pool was stopped with, exactly once; a clean exit returns
    /// `Ok(())`.
    pub fn run(mut self) -> Result<(), TaskError> {
        self.pool.bind_main_thread();

        let start = Instant::now();
        let mut last_frame = start;
        let mut ctx = EngineContext {
            pool: self.pool.clone(),
            frame_number: 0,
            delta_time: 0.0,
            elapsed_time: 0.0,
        };

        // Register the root computation; an error escaping it is fatal.
        let root = self.handler.entry(&ctx);
        let pool = self.pool.clone();
        self.pool.background(async move {
            if let Err(error) = root.await {
                log::error!("root computation failed: {error}");
                pool.stop(Some(error));
            }
            Ok(())
        });

        loop {
            if self.closing.load(Ordering::SeqCst) || self.pool.is_stopping() {
                break;
            }

            let now = Instant::now();
            ctx.delta_time = now.duration_since(last_frame).as_secs_f32();
            ctx.elapsed_time = now.duration_since(start).as_secs_f64();
            last_frame = now;

            self.pool.process_frame_waits();
            self.pool.pump_main_thread();

            self.handler.tick(&ctx, ctx.elapsed_time, ctx.delta_time);

            // An error latched during this iteration must not submit a frame.
            if self.pool.is_stopping() {
                break;
            }

            self.pool.wait_frame_slot();
            let fence = self.sink.submit(self.pool.watermark());
            self.pool.frame_submitted(fence);
            ctx.frame_number = self.pool.watermark();

            if let Some(max_frames) = self.max_frames
                && ctx.frame_number >= max_frames
            {
                log::info!("reached max frames limit ({max_frames}), exiting");
                break;
            }
        }

        self.handler.on_shutdown(&ctx);
        self.pool.stop(None);
        self.pool.join();

        // Device idle: confirm the tail frames, then flush the graveyard.
        self.sink.wait_idle();
        self.pool.process_frame_waits();
        self.pool.release_all_retired();

        match self.pool.take_stop_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Run a handler headless with settings taken from parsed arguments.
///
/// Initializes logging, builds the pool from `args`, and drives the frame
/// loop with a [`NullFrameSink`]. This is the main entry point for tools
/// and automated runs.
pub fn run_headless<H: GameHandler, A: EngineArgs>(handler: H, args: A) -> Result<(), TaskError> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(args.log_filter()),
    )
    .init();

    amaranth_tasks::init();
    crate::init();

    let config = PoolConfig::new()
        .with_worker_threads(args.worker_threads())
        .with_frames_in_flight(args.frames_in_flight());
    let mut driver = FrameDriver::new(handler, Box::new(NullFrameSink), config);
    if let Some(max_frames) = args.max_frames() {
        driver = driver.with_max_frames(max_frames);
    }
    driver.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use amaranth_tasks::Task;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn test_config() -> PoolConfig {
        PoolConfig::new().with_worker_threads(1)
    }

    struct CountingGame {
        ticks: Arc<AtomicUsize>,
        shutdowns: Arc<AtomicUsize>,
    }

    impl GameHandler for CountingGame {
        fn tick(&mut self, _ctx: &EngineContext, _time: f64, _delta: f32) {
            self.ticks.fetch_add(1, Ordering::SeqCst);
        }

        fn on_shutdown(&mut self, _ctx: &EngineContext) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn frame_cap_exits_cleanly() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let driver = FrameDriver::new(
            CountingGame {
                ticks: ticks.clone(),
                shutdowns: shutdowns.clone(),
            },
            Box::new(NullFrameSink),
            test_config(),
        )
        .with_max_frames(5);

        assert_eq!(driver.run(), Ok(()));
        assert_eq!(ticks.load(Ordering::SeqCst), 5);
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closing_flag_ends_the_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let driver = FrameDriver::new(
            CountingGame {
                ticks: ticks.clone(),
                shutdowns: Arc::new(AtomicUsize::new(0)),
            },
            Box::new(NullFrameSink),
            test_config(),
        );

        let closing = driver.closing_flag();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            closing.store(true, Ordering::SeqCst);
        });

        assert_eq!(driver.run(), Ok(()));
        stopper.join().unwrap();
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }

    struct FailingGame;

    impl GameHandler for FailingGame {
        fn entry(&mut self, _ctx: &EngineContext) -> Task<()> {
            Task::new(async { Err(TaskError::failed("missing boot script")) })
        }
    }

    #[test]
    fn entry_error_stops_the_loop_and_surfaces_once() {
        let driver = FrameDriver::new(FailingGame, Box::new(NullFrameSink), test_config());
        let pool = driver.pool().clone();

        let result = driver.run();
        assert_eq!(result, Err(TaskError::Failed("missing boot script".into())));
        // Surfaced exactly once: the latch is now empty.
        assert_eq!(pool.take_stop_error(), None);
    }

    struct AsyncUploadGame {
        uploaded: Arc<AtomicBool>,
    }

    impl GameHandler for AsyncUploadGame {
        fn entry(&mut self, ctx: &EngineContext) -> Task<()> {
            let pool = ctx.pool().clone();
            let uploaded = self.uploaded.clone();
            Task::new(async move {
                // Build off-thread, then swap on the main thread once the
                // current frame can no longer reference the old buffer.
                let staged = pool.spawn(5, async { Ok(vec![1u8, 2, 3]) }).await?;
                pool.wait_for_frame().await;
                pool.main_thread().await;
                assert!(pool.is_main_thread());
                assert_eq!(staged.len(), 3);
                uploaded.store(true, Ordering::SeqCst);
                Ok(())
            })
        }

        fn tick(&mut self, ctx: &EngineContext, _time: f64, _delta: f32) {
            // Quit once the upload lands.
            if self.uploaded.load(Ordering::SeqCst) {
                ctx.pool().stop(None);
            }
        }
    }

    #[test]
    fn root_computation_crosses_frame_and_thread_barriers() {
        let uploaded = Arc::new(AtomicBool::new(false));
        let driver = FrameDriver::new(
            AsyncUploadGame {
                uploaded: uploaded.clone(),
            },
            Box::new(NullFrameSink),
            test_config(),
        );

        assert_eq!(driver.run(), Ok(()));
        assert!(uploaded.load(Ordering::SeqCst));
    }
}
