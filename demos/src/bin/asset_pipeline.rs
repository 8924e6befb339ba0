//! Headless demo: a simulated asset pipeline on the worker pool.
//!
//! Loads a few "assets" at different priorities, swaps a vertex buffer only
//! after the in-flight frame retires, and hands the old buffer to the
//! graveyard. Run with `--max-frames 240` for a bounded automated run.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use amaranth_app::{DefaultEngineArgs, EngineArgs, EngineContext, GameHandler, run_headless};
use amaranth_tasks::{Task, TaskResult};

/// Placeholder for a GPU-side buffer handle.
struct VertexBuffer {
    label: &'static str,
    len: usize,
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        log::info!("released vertex buffer '{}' ({} bytes)", self.label, self.len);
    }
}

fn decode_mesh(label: &'static str, len: usize) -> TaskResult<Vec<u8>> {
    log::info!("decoding '{label}' on {:?}", std::thread::current().name());
    Ok(vec![0u8; len])
}

#[derive(Default)]
struct AssetPipeline {
    swapped: Arc<AtomicBool>,
}

impl GameHandler for AssetPipeline {
    fn entry(&mut self, ctx: &EngineContext) -> Task<()> {
        let pool = ctx.pool().clone();
        let swapped = self.swapped.clone();
        Task::new(async move {
            // High-priority hero mesh, low-priority scenery.
            let hero = pool.spawn(10, async { decode_mesh("hero", 96 * 1024) });
            let scenery = pool.spawn(-5, async { decode_mesh("scenery", 512 * 1024) });

            let hero = hero.await?;
            let scenery = scenery.await?;
            log::info!("decoded {} bytes total", hero.len() + scenery.len());

            // The old buffer may still be referenced by queued frames:
            // wait out the in-flight frame, swap on the main thread, and
            // let the graveyard release it once the horizon retires.
            pool.wait_for_frame().await;
            pool.main_thread().await;
            pool.gpu_resource(VertexBuffer {
                label: "hero-old",
                len: hero.len(),
            });
            swapped.store(true, Ordering::SeqCst);
            log::info!("vertex buffer swapped on the main thread");
            Ok(())
        })
    }

    fn tick(&mut self, ctx: &EngineContext, time: f64, _delta: f32) {
        if ctx.frame_number() % 60 == 0 {
            log::debug!(
                "frame {} at t={time:.2}s, {} resources retired",
                ctx.frame_number(),
                ctx.pool().retired_count()
            );
        }
    }

    fn on_shutdown(&mut self, _ctx: &EngineContext) {
        log::info!(
            "shutting down, swap {}",
            if self.swapped.load(Ordering::SeqCst) {
                "landed"
            } else {
                "still pending"
            }
        );
    }
}

fn main() {
    let args = DefaultEngineArgs::parse();
    if let Err(error) = run_headless(AssetPipeline::default(), args) {
        eprintln!("engine stopped with error: {error}");
        std::process::exit(1);
    }
}
