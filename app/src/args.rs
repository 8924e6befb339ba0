//! Command line arguments trait and default implementation.
//!
//! Uses clap for proper CLI parsing with help text and validation.

/// Trait for parsing engine command line arguments.
///
/// Implement this to customize how an application configures the engine;
/// every method has a sensible default, so only overrides are needed.
pub trait EngineArgs: Sized {
    /// Parse command line arguments.
    fn parse() -> Self;

    /// Number of worker threads. Default: available cores minus one for
    /// the frame driver's thread (at least 1).
    fn worker_threads(&self) -> usize {
        default_worker_threads()
    }

    /// How many frames may be in flight on the device.
    ///
    /// Default: 2
    fn frames_in_flight(&self) -> usize {
        2
    }

    /// Maximum number of frames to process before auto-exit.
    ///
    /// Useful for automated testing to verify the engine starts, runs,
    /// and shuts down without errors.
    ///
    /// Default: `None` (run until the closing flag is raised)
    fn max_frames(&self) -> Option<u64> {
        None
    }

    /// Default log filter (env_logger syntax).
    fn log_filter(&self) -> &str {
        "info"
    }
}

fn default_worker_threads() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get().saturating_sub(1).max(1))
}

/// Default argument parser covering the engine options.
#[derive(Debug, clap::Parser)]
#[command(name = "amaranth", about = "Amaranth engine application")]
pub struct DefaultEngineArgs {
    /// Number of worker threads (0 = auto)
    #[arg(long, default_value_t = 0)]
    pub workers: usize,

    /// Frames that may be in flight on the device
    #[arg(long, default_value_t = 2)]
    pub frames_in_flight: usize,

    /// Exit after this many frames (for automated runs)
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// Log filter (env_logger syntax)
    #[arg(long, default_value = "info")]
    pub log: String,
}

impl EngineArgs for DefaultEngineArgs {
    fn parse() -> Self {
        <Self as clap::Parser>::parse()
    }

    fn worker_threads(&self) -> usize {
        if self.workers == 0 {
            default_worker_threads()
        } else {
            self.workers
        }
    }

    fn frames_in_flight(&self) -> usize {
        self.frames_in_flight.max(1)
    }

    fn max_frames(&self) -> Option<u64> {
        self.max_frames
    }

    fn log_filter(&self) -> &str {
        &self.log
    }
}
