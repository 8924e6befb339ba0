//! # Amaranth App
//!
//! Frame driver and application framework for the Amaranth Engine.
//!
//! This crate owns the engine's single top-level loop: each iteration
//! advances the simulation clock, rendezvous with main-thread-only
//! continuations, confirms frame completion for the worker pool, ticks the
//! game layer, and submits one rendering frame.
//!
//! ## Overview
//!
//! - [`GameHandler`] — trait the game layer implements (`entry` + `tick`)
//! - [`FrameDriver`] — the frame loop, run on the designated main thread
//! - [`FrameSink`] / [`NullFrameSink`] — boundary to the rendering crate
//! - [`EngineArgs`] / [`DefaultEngineArgs`] — command line configuration
//!
//! ## Example
//!
//! ```ignore
//! use amaranth_app::{DefaultEngineArgs, EngineArgs, GameHandler, run_headless};
//!
//! struct MyGame;
//! impl GameHandler for MyGame {}
//!
//! fn main() {
//!     let args = DefaultEngineArgs::parse();
//!     if let Err(error) = run_headless(MyGame, args) {
//!         eprintln!("engine stopped with error: {error}");
//!         std::process::exit(1);
//!     }
//! }
//! ```

mod args;
mod context;
mod driver;
mod handler;
mod render;

pub use args::{DefaultEngineArgs, EngineArgs};
pub use context::EngineContext;
pub use driver::{FrameDriver, run_headless};
pub use handler::GameHandler;
pub use render::{FrameSink, NullFrameSink};

// Re-exported so game crates depend on one crate only.
pub use amaranth_tasks::{
    FrameFence, PoolConfig, Task, TaskError, TaskResult, WorkerPool,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log the library version at startup.
pub fn init() {
    log::info!("Amaranth App v{VERSION} initialized");
}
