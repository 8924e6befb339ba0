//! Frame completion tracking and deferred resource destruction.
//!
//! GPU commands execute asynchronously: when a frame is submitted, the
//! device processes it one or more frames behind the CPU. Resources retired
//! while a frame may still reference them are parked in a graveyard and
//! only dropped once the device has confirmed the frame `frames_in_flight`
//! submissions later, so no queued rendering work can still see them.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Waker;

/// CPU-visible completion flag for one submitted frame.
///
/// The device (or the frame sink standing in for it) signals the fence when
/// the frame has fully executed. Cloned handles share state.
#[derive(Debug, Default)]
pub struct FrameFence {
    signaled: Arc<AtomicBool>,
}

impl FrameFence {
    /// Create a fence in the unsignaled state.
    pub fn new_unsignaled() -> Self {
        Self {
            signaled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a fence that is already signaled.
    pub fn new_signaled() -> Self {
        Self {
            signaled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Mark the frame as complete on the device.
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }

    /// Check completion without blocking.
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Block until the fence is signaled.
    pub fn wait(&self) {
        while !self.signaled.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }

    /// Block until the fence is signaled or `timeout` elapses.
    ///
    /// Returns `true` if the fence was signaled.
    pub fn wait_timeout(&self, timeout: std::time::Duration) -> bool {
        let start = std::time::Instant::now();
        while !self.signaled.load(Ordering::Acquire) {
            if start.elapsed() >= timeout {
                return false;
            }
            std::hint::spin_loop();
        }
        true
    }
}

impl Clone for FrameFence {
    fn clone(&self) -> Self {
        Self {
            signaled: Arc::clone(&self.signaled),
        }
    }
}

struct FrameWaiter {
    target: u64,
    waker: Waker,
}

struct RetiredResource {
    watermark: u64,
    resource: Box<dyn Any + Send>,
}

/// Watermark bookkeeping: submitted frames, confirmed frames, frame-wait
/// continuations, and the resource graveyard.
///
/// Guarded by the pool's clock mutex; this type itself is single-threaded.
pub(crate) struct FrameClock {
    /// Frame currently being recorded (monotonically increasing).
    watermark: u64,
    /// Number of fully confirmed frames: frames `0..completed` are done.
    completed: u64,
    /// Submitted frames whose fences have not yet been confirmed, oldest first.
    in_flight: VecDeque<(u64, FrameFence)>,
    waiters: Vec<FrameWaiter>,
    graveyard: Vec<RetiredResource>,
    frames_in_flight: u64,
}

impl FrameClock {
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            watermark: 0,
            completed: 0,
            in_flight: VecDeque::new(),
            waiters: Vec::new(),
            graveyard: Vec::new(),
            frames_in_flight: frames_in_flight.max(1) as u64,
        }
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight as usize
    }

    pub fn retired_count(&self) -> usize {
        self.graveyard.len()
    }

    /// Record submission of the current frame and advance the watermark.
    pub fn submit(&mut self, fence: FrameFence) {
        self.in_flight.push_back((self.watermark, fence));
        self.watermark += 1;
    }

    /// Park a resource until frame `watermark + frames_in_flight` confirms.
    pub fn retire(&mut self, resource: Box<dyn Any + Send>) {
        self.graveyard.push(RetiredResource {
            watermark: self.watermark,
            resource,
        });
    }

    /// Register a continuation to resume once frame `target` is confirmed.
    pub fn register_waiter(&mut self, target: u64, waker: Waker) {
        self.waiters.push(FrameWaiter { target, waker });
    }

    /// Fence of the oldest in-flight frame, when the pipeline is saturated.
    ///
    /// The caller blocks on this fence before recording another frame.
    pub fn pacing_fence(&self) -> Option<FrameFence> {
        if self.in_flight.len() as u64 >= self.frames_in_flight {
            self.in_flight.front().map(|(_, fence)| fence.clone())
        } else {
            None
        }
    }

    /// Advance completion tracking from signaled fences.
    ///
    /// Confirmation is in submission order: an unsignaled fence blocks
    /// confirmation of every later frame. Returns the continuations whose
    /// target frame is now confirmed and the resources that are now safe to
    /// drop; the caller wakes and drops them outside the clock lock.
    pub fn advance(&mut self) -> (Vec<Waker>, Vec<Box<dyn Any + Send>>) {
        while let Some((frame, fence)) = self.in_flight.front() {
            if !fence.is_signaled() {
                break;
            }
            self.completed = frame + 1;
            self.in_flight.pop_front();
        }

        let completed = self.completed;
        let mut ready = Vec::new();
        self.waiters.retain_mut(|waiter| {
            if completed > waiter.target {
                ready.push(waiter.waker.clone());
                false
            } else {
                true
            }
        });

        let horizon = self.frames_in_flight;
        let mut released = Vec::new();
        let mut kept = Vec::new();
        for entry in self.graveyard.drain(..) {
            // Safe once frame `watermark + frames_in_flight` is confirmed.
            if completed > entry.watermark + horizon {
                released.push(entry.resource);
            } else {
                kept.push(entry);
            }
        }
        self.graveyard = kept;

        (ready, released)
    }

    /// Drain the graveyard unconditionally.
    ///
    /// Only valid during shutdown, after the device has gone idle.
    pub fn release_all(&mut self) -> Vec<Box<dyn Any + Send>> {
        self.graveyard.drain(..).map(|e| e.resource).collect()
    }
}
