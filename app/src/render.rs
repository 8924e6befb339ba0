//! Frame submission boundary to the rendering collaborator.

use amaranth_tasks::FrameFence;

/// Sink the driver hands one frame to per iteration.
///
/// The real implementation lives in the rendering crate and records draw
/// calls; this core only needs the returned fence, which the device
/// signals once the frame has fully executed.
pub trait FrameSink: Send {
    /// Submit the frame identified by `watermark`.
    fn submit(&mut self, watermark: u64) -> FrameFence;

    /// Block until every submitted frame has completed on the device.
    fn wait_idle(&mut self) {}
}

/// Headless sink: every frame completes at submit time.
///
/// Used by tools, tests, and automated runs without a GPU.
#[derive(Debug, Default)]
pub struct NullFrameSink;

impl FrameSink for NullFrameSink {
    fn submit(&mut self, watermark: u64) -> FrameFence {
        log::trace!("null sink: frame {watermark} submitted");
        FrameFence::new_signaled()
    }
}
