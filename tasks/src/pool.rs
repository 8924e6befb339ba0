//! Worker pool: threads, the shared queue, main-thread affinity, frame
//! pacing, and the resource graveyard.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};
use std::thread::ThreadId;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{TaskError, TaskResult};
use crate::frame::{FrameClock, FrameFence};
use crate::queue::WorkQueue;
use crate::runnable::Runnable;
use crate::task::{Slot, Task};
use crate::work::{FnWorkItem, WorkContext, WorkItem};
use crate::worker::run_worker;

/// Pool construction parameters.
///
/// # Example
///
/// ```
/// use amaranth_tasks::{PoolConfig, WorkerPool};
///
/// let pool = WorkerPool::with_config(
///     PoolConfig::new().with_worker_threads(2).with_frames_in_flight(3),
/// );
/// pool.stop(None);
/// pool.join();
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    worker_threads: usize,
    frames_in_flight: usize,
}

impl PoolConfig {
    pub fn new() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            frames_in_flight: 2,
        }
    }

    /// Number of worker threads. Clamped to at least 1.
    pub fn with_worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count.max(1);
        self
    }

    /// How many frames may be queued or executing on the device at once.
    pub fn with_frames_in_flight(mut self, count: usize) -> Self {
        self.frames_in_flight = count.max(1);
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// One core is reserved for the frame driver's thread.
fn default_worker_threads() -> usize {
    std::thread::available_parallelism()
        .map_or(1, |n| n.get().saturating_sub(1).max(1))
}

struct MainThreadState {
    thread: Option<ThreadId>,
    waiters: Vec<Waker>,
}

pub(crate) struct PoolShared {
    pub(crate) queue: WorkQueue,
    clock: Mutex<FrameClock>,
    main: Mutex<MainThreadState>,
    worker_count: usize,
    stopping: AtomicBool,
    stop_error: Mutex<Option<TaskError>>,
    last_background_error: Mutex<Option<TaskError>>,
    background_hook: Mutex<Option<Box<dyn Fn(&TaskError) + Send + Sync>>>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl PoolShared {
    /// Keep the first error raised outside any tracked task; it surfaces
    /// when the pool stops.
    pub(crate) fn latch_untracked_error(&self, error: TaskError) {
        let mut slot = self.stop_error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    fn record_background_error(&self, error: TaskError) {
        log::error!("background computation failed: {error}");
        if let Some(hook) = &*self.background_hook.lock() {
            hook(&error);
        }
        *self.last_background_error.lock() = Some(error);
    }
}

/// Initial dispatch of a pool-registered computation.
struct ResumeItem {
    priority: i32,
    runnable: Arc<Runnable>,
}

impl WorkItem for ResumeItem {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn process(self: Box<Self>, _ctx: &mut WorkContext<'_>) {
        self.runnable.resume();
    }
}

/// Fixed worker pool with a priority work queue, main-thread-affinity
/// continuations, frame-paced waits, and deferred GPU resource destruction.
///
/// Cheap to clone; all clones share the same pool. Worker threads start at
/// construction, so work queued before [`run`](Self::run) is serviced
/// immediately.
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    /// Create a pool with default configuration.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Create a pool and start its worker threads.
    pub fn with_config(config: PoolConfig) -> Self {
        let shared = Arc::new(PoolShared {
            queue: WorkQueue::new(),
            clock: Mutex::new(FrameClock::new(config.frames_in_flight)),
            main: Mutex::new(MainThreadState {
                thread: None,
                waiters: Vec::new(),
            }),
            worker_count: config.worker_threads,
            stopping: AtomicBool::new(false),
            stop_error: Mutex::new(None),
            last_background_error: Mutex::new(None),
            background_hook: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
        });

        let mut handles = Vec::with_capacity(config.worker_threads);
        for index in 0..config.worker_threads {
            let shared = Arc::clone(&shared);
            let handle = std::thread::Builder::new()
                .name(format!("amaranth-worker-{index}"))
                .spawn(move || run_worker(shared, index))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }
        *shared.workers.lock() = handles;

        log::debug!(
            "worker pool started: {} workers, {} frames in flight",
            config.worker_threads,
            shared.clock.lock().frames_in_flight()
        );

        Self { shared }
    }

    pub(crate) fn from_shared(shared: Arc<PoolShared>) -> Self {
        Self { shared }
    }

    /// Number of worker threads.
    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    /// Items currently queued.
    pub fn pending_work(&self) -> usize {
        self.shared.queue.len()
    }

    // ---- submission ----------------------------------------------------

    /// Enqueue a work item and wake an idle worker.
    ///
    /// Returns `false` once the pool is stopping; the item is dropped.
    pub fn add_work(&self, item: Box<dyn WorkItem>) -> bool {
        self.shared.queue.push(item)
    }

    /// Enqueue a closure as a work item with the given priority.
    pub fn add_fn<F>(&self, priority: i32, f: F) -> bool
    where
        F: FnOnce(&mut WorkContext<'_>) + Send + 'static,
    {
        self.add_work(Box::new(FnWorkItem::new(priority, f)))
    }

    /// Start `body` on a worker thread and return an awaitable handle.
    ///
    /// The first resumption point is dispatched through the work queue at
    /// `priority`: the body never runs inline on the calling thread.
    /// Completions of things the body awaits resume it directly on the
    /// completing thread, without a queue round-trip.
    pub fn spawn<T, F>(&self, priority: i32, body: F) -> Task<T>
    where
        T: Send + 'static,
        F: Future<Output = TaskResult<T>> + Send + 'static,
    {
        let slot = Slot::new();
        let completion = Arc::clone(&slot);
        let wrapped = Box::pin(async move {
            completion.complete(body.await);
        });
        let on_panic = Arc::clone(&slot);
        let runnable = Runnable::new(
            wrapped,
            Box::new(move |error| on_panic.complete(Err(error))),
        );
        if !self.dispatch(priority, runnable) {
            slot.complete(Err(TaskError::Stopped));
        }
        Task::pooled(slot)
    }

    /// Register a computation the pool drives to completion on its own.
    ///
    /// No caller holds or awaits the handle. A failure is recorded in
    /// [`last_background_error`](Self::last_background_error) and passed to
    /// the hook installed via
    /// [`set_background_error_hook`](Self::set_background_error_hook).
    pub fn background<F>(&self, body: F)
    where
        F: Future<Output = TaskResult<()>> + Send + 'static,
    {
        // Weak references: queued bodies must not keep the pool alive.
        let on_error = Arc::downgrade(&self.shared);
        let wrapped = Box::pin(async move {
            if let Err(error) = body.await
                && let Some(shared) = on_error.upgrade()
            {
                shared.record_background_error(error);
            }
        });
        let on_panic = Arc::downgrade(&self.shared);
        let runnable = Runnable::new(
            wrapped,
            Box::new(move |error| {
                if let Some(shared) = on_panic.upgrade() {
                    shared.record_background_error(error);
                }
            }),
        );
        if !self.dispatch(0, runnable) {
            self.shared.record_background_error(TaskError::Stopped);
        }
    }

    fn dispatch(&self, priority: i32, runnable: Arc<Runnable>) -> bool {
        self.add_work(Box::new(ResumeItem { priority, runnable }))
    }

    /// Most recent error from a `background` computation, if any.
    pub fn last_background_error(&self) -> Option<TaskError> {
        self.shared.last_background_error.lock().clone()
    }

    /// Install a callback invoked (on the completing thread) whenever a
    /// `background` computation fails.
    pub fn set_background_error_hook<F>(&self, hook: F)
    where
        F: Fn(&TaskError) + Send + Sync + 'static,
    {
        *self.shared.background_hook.lock() = Some(Box::new(hook));
    }

    // ---- main-thread affinity ------------------------------------------

    /// Awaitable barrier to the frame driver's thread.
    ///
    /// Awaiting suspends the computation until the main thread next pumps
    /// its affinity queue; the continuation then runs there, never on a
    /// worker. Use for anything with a single-thread-only precondition
    /// (platform windowing calls, context-bound APIs).
    pub fn main_thread(&self) -> MainThreadBarrier {
        MainThreadBarrier {
            shared: Arc::clone(&self.shared),
            registered: false,
        }
    }

    /// Mark the current thread as the designated main thread.
    pub fn bind_main_thread(&self) {
        self.shared.main.lock().thread = Some(std::thread::current().id());
    }

    /// Whether the current thread is the designated main thread.
    pub fn is_main_thread(&self) -> bool {
        self.shared.main.lock().thread == Some(std::thread::current().id())
    }

    /// Resume every pending [`main_thread`](Self::main_thread) continuation
    /// on the current thread.
    ///
    /// Must be called from the bound main thread. Continuations that
    /// re-register during the pump land in the next pump's batch.
    pub fn pump_main_thread(&self) {
        debug_assert!(
            self.is_main_thread(),
            "pump_main_thread called off the bound main thread"
        );
        let waiters = std::mem::take(&mut self.shared.main.lock().waiters);
        for waker in waiters {
            waker.wake();
        }
    }

    // ---- frame pacing and resource lifetime ----------------------------

    /// Awaitable barrier for device completion of the current frame.
    ///
    /// Suspends the caller until the frame in flight at call time has been
    /// confirmed complete — never at or before. Use to swap a resource only
    /// once no queued rendering work can still reference the old one.
    pub fn wait_for_frame(&self) -> FrameBarrier {
        FrameBarrier {
            shared: Arc::clone(&self.shared),
            target: None,
        }
    }

    /// Hand a hardware resource to the graveyard.
    ///
    /// The resource is tagged with the current watermark and dropped only
    /// after [`process_frame_waits`](Self::process_frame_waits) confirms
    /// that frame `watermark + frames_in_flight` has fully completed on the
    /// device. The resource's `Drop` impl performs the actual release.
    pub fn gpu_resource<R: Send + 'static>(&self, resource: R) {
        self.shared.clock.lock().retire(Box::new(resource));
    }

    /// Advance completion tracking: confirm signaled frames in submission
    /// order, resume every satisfied [`wait_for_frame`](Self::wait_for_frame)
    /// waiter, and drop every graveyard entry whose horizon has retired.
    ///
    /// Called once per frame-driver iteration.
    pub fn process_frame_waits(&self) {
        let (ready, released) = self.shared.clock.lock().advance();
        drop(released);
        for waker in ready {
            waker.wake();
        }
    }

    /// Record submission of the current frame and advance the watermark.
    ///
    /// `fence` is signaled by the device (or the frame sink) when the frame
    /// has fully executed.
    pub fn frame_submitted(&self, fence: FrameFence) {
        self.shared.clock.lock().submit(fence);
    }

    /// Block until the oldest in-flight frame completes, if the pipeline is
    /// at its frames-in-flight limit. The only place the driver blocks.
    pub fn wait_frame_slot(&self) {
        let fence = self.shared.clock.lock().pacing_fence();
        if let Some(fence) = fence {
            fence.wait();
        }
    }

    /// Watermark of the frame currently being recorded.
    pub fn watermark(&self) -> u64 {
        self.shared.clock.lock().watermark()
    }

    /// Number of frames fully confirmed on the device.
    pub fn completed_frames(&self) -> u64 {
        self.shared.clock.lock().completed()
    }

    /// Configured frames-in-flight depth.
    pub fn frames_in_flight(&self) -> usize {
        self.shared.clock.lock().frames_in_flight()
    }

    /// Graveyard entries not yet released.
    pub fn retired_count(&self) -> usize {
        self.shared.clock.lock().retired_count()
    }

    /// Drop every remaining graveyard entry.
    ///
    /// Only valid during shutdown, after the device has gone idle.
    pub fn release_all_retired(&self) {
        let released = self.shared.clock.lock().release_all();
        drop(released);
    }

    // ---- lifecycle -----------------------------------------------------

    /// Signal every worker to exit after draining its current item.
    ///
    /// If `error` is supplied it is latched (first error wins) and later
    /// surfaced exactly once to the [`run`](Self::run) caller. Pending
    /// queue items are dropped.
    pub fn stop(&self, error: Option<TaskError>) {
        if let Some(error) = error {
            self.shared.latch_untracked_error(error);
        }
        if !self.shared.stopping.swap(true, Ordering::SeqCst) {
            log::info!("worker pool stopping");
        }
        self.shared.queue.close();
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    /// Join all worker threads. Call after [`stop`](Self::stop).
    pub fn join(&self) {
        let handles = std::mem::take(&mut *self.shared.workers.lock());
        for handle in handles {
            if handle.join().is_err() {
                log::error!("worker thread terminated abnormally");
            }
        }
    }

    /// Take the latched stop error. Yields a value at most once.
    pub fn take_stop_error(&self) -> Option<TaskError> {
        self.shared.stop_error.lock().take()
    }

    /// Block the calling thread as a participating worker until
    /// [`stop`](Self::stop).
    ///
    /// The calling thread becomes the designated main thread: between work
    /// items it pumps main-thread continuations and advances frame
    /// completion tracking. Returns the error passed to `stop`, exactly
    /// once; a plain `stop(None)` returns `Ok(())`.
    pub fn run(&self) -> Result<(), TaskError> {
        self.bind_main_thread();
        let mut scratch = Vec::new();

        loop {
            self.pump_main_thread();
            self.process_frame_waits();
            if self.is_stopping() {
                break;
            }
            if let Some(item) = self.shared.queue.pop_timeout(Duration::from_millis(1)) {
                scratch.clear();
                let mut ctx = WorkContext::new(self, None, &mut scratch);
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| item.process(&mut ctx))) {
                    let error = TaskError::from_panic(payload);
                    log::error!("work item panicked on the main thread: {error}");
                    self.shared.latch_untracked_error(error);
                }
            }
        }

        self.join();
        match self.take_stop_error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Future returned by [`WorkerPool::main_thread`].
///
/// Always suspends on first poll, even on the main thread: the continuation
/// runs at the driver's next pump, a deterministic point in the frame.
pub struct MainThreadBarrier {
    shared: Arc<PoolShared>,
    registered: bool,
}

impl Future for MainThreadBarrier {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.registered {
            debug_assert_eq!(
                this.shared.main.lock().thread,
                Some(std::thread::current().id()),
                "main-thread continuation resumed off the main thread"
            );
            Poll::Ready(())
        } else {
            this.registered = true;
            this.shared.main.lock().waiters.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Future returned by [`WorkerPool::wait_for_frame`].
pub struct FrameBarrier {
    shared: Arc<PoolShared>,
    target: Option<u64>,
}

impl Future for FrameBarrier {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut clock = this.shared.clock.lock();
        let target = *this.target.get_or_insert_with(|| clock.watermark());
        if clock.completed() > target {
            Poll::Ready(())
        } else {
            clock.register_waiter(target, cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn small_pool() -> WorkerPool {
        WorkerPool::with_config(PoolConfig::new().with_worker_threads(1))
    }

    #[test]
    fn config_clamps_to_one_worker() {
        let config = PoolConfig::new().with_worker_threads(0);
        let pool = WorkerPool::with_config(config);
        assert_eq!(pool.worker_count(), 1);
        pool.stop(None);
        pool.join();
    }

    #[test]
    fn add_fn_executes_on_a_worker() {
        let pool = small_pool();
        let (tx, rx) = mpsc::channel();
        pool.add_fn(0, move |ctx| {
            let _ = tx.send(ctx.worker_index());
        });
        let index = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(index, Some(0));
        pool.stop(None);
        pool.join();
    }

    #[test]
    fn add_work_after_stop_is_rejected() {
        let pool = small_pool();
        pool.stop(None);
        pool.join();
        assert!(!pool.add_fn(0, |_| {}));
    }

    #[test]
    fn spawn_after_stop_fails_the_task() {
        let pool = small_pool();
        pool.stop(None);
        pool.join();
        let task = pool.spawn(0, async { Ok(3u32) });
        assert_eq!(task.try_result(), Some(Err(TaskError::Stopped)));
    }

    #[test]
    fn background_error_is_recorded_and_hooked() {
        let pool = small_pool();
        let hook_count = Arc::new(AtomicUsize::new(0));
        let probe = hook_count.clone();
        pool.set_background_error_hook(move |_| {
            probe.fetch_add(1, Ordering::SeqCst);
        });

        pool.background(async { Err(TaskError::failed("texture decode")) });
        // Wait for the worker to drive the computation.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while pool.last_background_error().is_none() {
            assert!(std::time::Instant::now() < deadline);
            std::thread::yield_now();
        }
        assert_eq!(
            pool.last_background_error(),
            Some(TaskError::Failed("texture decode".into()))
        );
        assert_eq!(hook_count.load(Ordering::SeqCst), 1);
        pool.stop(None);
        pool.join();
    }

    #[test]
    fn background_panic_is_recorded() {
        let pool = small_pool();
        pool.background(async { panic!("bad state") });
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while pool.last_background_error().is_none() {
            assert!(std::time::Instant::now() < deadline);
            std::thread::yield_now();
        }
        assert_eq!(
            pool.last_background_error(),
            Some(TaskError::Panicked("bad state".into()))
        );
        pool.stop(None);
        pool.join();
    }

    #[test]
    fn stop_error_surfaces_from_run_exactly_once() {
        let pool = small_pool();
        let runner = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.run())
        };
        pool.stop(Some(TaskError::failed("device lost")));
        let result = runner.join().unwrap();
        assert_eq!(result, Err(TaskError::Failed("device lost".into())));
        // The latch yields its value only once.
        assert_eq!(pool.take_stop_error(), None);
    }

    #[test]
    fn clean_stop_returns_ok_from_run() {
        let pool = small_pool();
        let runner = {
            let pool = pool.clone();
            std::thread::spawn(move || pool.run())
        };
        pool.stop(None);
        assert_eq!(runner.join().unwrap(), Ok(()));
    }

    #[test]
    fn first_stop_error_wins() {
        let pool = small_pool();
        pool.stop(Some(TaskError::failed("first")));
        pool.stop(Some(TaskError::failed("second")));
        pool.join();
        assert_eq!(pool.take_stop_error(), Some(TaskError::Failed("first".into())));
    }

    #[test]
    fn frame_counters_track_submissions() {
        let pool = small_pool();
        assert_eq!(pool.watermark(), 0);
        pool.frame_submitted(FrameFence::new_signaled());
        assert_eq!(pool.watermark(), 1);
        pool.process_frame_waits();
        assert_eq!(pool.completed_frames(), 1);
        pool.stop(None);
        pool.join();
    }
}
