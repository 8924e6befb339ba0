//! Lazy asynchronous computations with exactly-once resumption.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::error::{TaskError, TaskResult};

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Completion cell shared between a pool-driven body and the awaiting handle.
///
/// Holds at most one registered continuation. The transition to `Done`
/// happens exactly once; the stored waker, if any, is invoked immediately
/// after the transition on the completing thread.
pub(crate) struct Slot<T> {
    state: Mutex<SlotState<T>>,
}

enum SlotState<T> {
    Pending(Option<Waker>),
    Done(TaskResult<T>),
}

impl<T> Slot<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SlotState::Pending(None)),
        })
    }

    /// Record the terminal state and resume the registered continuation.
    ///
    /// A second call is a no-op: the first terminal state wins.
    pub fn complete(&self, result: TaskResult<T>) {
        let waker = {
            let mut state = self.state.lock();
            if matches!(*state, SlotState::Done(_)) {
                return;
            }
            match std::mem::replace(&mut *state, SlotState::Done(result)) {
                SlotState::Pending(waker) => waker,
                SlotState::Done(_) => None,
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn is_done(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Done(_))
    }
}

/// A lazy, awaitable computation producing a `T`.
///
/// Creation is inert: nothing executes until the task is driven, either by
/// being awaited or by being registered with the pool
/// ([`WorkerPool::background`](crate::WorkerPool::background)). Awaiting a
/// task that has already completed yields the cached result immediately,
/// without suspending and without re-running the body.
///
/// Errors raised by the body are captured and re-raised to the awaiter.
///
/// # Example
///
/// ```ignore
/// let mesh: Task<Mesh> = pool.spawn(10, async move {
///     let raw = loader.read(path).await?;
///     Ok(build_mesh(raw))
/// });
/// // ... later, from another computation:
/// let mesh = mesh.await?;
/// ```
pub struct Task<T> {
    inner: TaskInner<T>,
}

// `Task<T>` never relies on pinning: the only field that is ever pinned
// (`BoxFuture`) is already heap-indirected via `Pin<Box<_>>`, which is
// itself always `Unpin`. Asserting this unconditionally (rather than
// bounding `T: Unpin`) avoids narrowing which `T` the `Future` impl below
// accepts.
impl<T> Unpin for Task<T> {}

enum TaskInner<T> {
    /// Body driven inline by whoever awaits the task.
    Inline(InlineState<T>),
    /// Body running on the pool, feeding a shared completion slot.
    Pooled(Arc<Slot<T>>),
}

enum InlineState<T> {
    Running(BoxFuture<TaskResult<T>>),
    Done(TaskResult<T>),
}

impl<T: Send + 'static> Task<T> {
    /// Wrap a computation body. The body does not start until the task is
    /// first driven.
    pub fn new<F>(body: F) -> Self
    where
        F: Future<Output = TaskResult<T>> + Send + 'static,
    {
        Self {
            inner: TaskInner::Inline(InlineState::Running(Box::pin(body))),
        }
    }

    /// A task that is already complete. Awaiting it never suspends.
    pub fn completed(value: T) -> Self {
        Self {
            inner: TaskInner::Inline(InlineState::Done(Ok(value))),
        }
    }

    /// A task that has already failed with `error`.
    pub fn failed(error: TaskError) -> Self {
        Self {
            inner: TaskInner::Inline(InlineState::Done(Err(error))),
        }
    }

    pub(crate) fn pooled(slot: Arc<Slot<T>>) -> Self {
        Self {
            inner: TaskInner::Pooled(slot),
        }
    }

    /// Whether the task has reached its terminal state.
    pub fn is_done(&self) -> bool {
        match &self.inner {
            TaskInner::Inline(InlineState::Done(_)) => true,
            TaskInner::Inline(InlineState::Running(_)) => false,
            TaskInner::Pooled(slot) => slot.is_done(),
        }
    }
}

impl<T: Clone + Send + 'static> Task<T> {
    /// Non-blocking peek at the terminal state, if reached.
    pub fn try_result(&self) -> Option<TaskResult<T>> {
        match &self.inner {
            TaskInner::Inline(InlineState::Done(result)) => Some(result.clone()),
            TaskInner::Inline(InlineState::Running(_)) => None,
            TaskInner::Pooled(slot) => match &*slot.state.lock() {
                SlotState::Done(result) => Some(result.clone()),
                SlotState::Pending(_) => None,
            },
        }
    }
}

impl<T: Clone + Send + 'static> Future for Task<T> {
    type Output = TaskResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.inner {
            TaskInner::Inline(state) => match state {
                InlineState::Done(result) => Poll::Ready(result.clone()),
                InlineState::Running(body) => match body.as_mut().poll(cx) {
                    Poll::Pending => Poll::Pending,
                    Poll::Ready(result) => {
                        *state = InlineState::Done(result.clone());
                        Poll::Ready(result)
                    }
                },
            },
            TaskInner::Pooled(slot) => {
                let mut slot_state = slot.state.lock();
                match &mut *slot_state {
                    SlotState::Done(result) => Poll::Ready(result.clone()),
                    SlotState::Pending(waker) => {
                        // Single-continuation contract: the latest awaiter
                        // owns the resumption.
                        *waker = Some(cx.waker().clone());
                        Poll::Pending
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::{RawWaker, RawWakerVTable};

    fn noop_waker() -> Waker {
        fn noop(_: *const ()) {}
        fn clone(p: *const ()) -> RawWaker {
            RawWaker::new(p, &VTABLE)
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &VTABLE)) }
    }

    fn poll_once<T: Clone + Send + 'static>(task: &mut Task<T>) -> Poll<TaskResult<T>> {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        Pin::new(task).poll(&mut cx)
    }

    #[test]
    fn creation_is_inert() {
        let runs = Arc::new(AtomicUsize::new(0));
        let probe = runs.clone();
        let task = Task::new(async move {
            probe.fetch_add(1, Ordering::SeqCst);
            Ok(5u32)
        });
        assert!(!task.is_done());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        drop(task);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn awaiting_runs_body_once_and_caches() {
        let runs = Arc::new(AtomicUsize::new(0));
        let probe = runs.clone();
        let mut task = Task::new(async move {
            probe.fetch_add(1, Ordering::SeqCst);
            Ok(41u32)
        });

        assert_eq!(poll_once(&mut task), Poll::Ready(Ok(41)));
        // Re-reading returns the cached value without re-running the body.
        assert_eq!(poll_once(&mut task), Poll::Ready(Ok(41)));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn completed_task_needs_no_suspension() {
        let mut task = Task::completed("ready");
        assert!(task.is_done());
        assert_eq!(task.try_result(), Some(Ok("ready")));
        assert_eq!(poll_once(&mut task), Poll::Ready(Ok("ready")));
    }

    #[test]
    fn failure_is_reraised_to_awaiter() {
        let mut task: Task<u32> = Task::new(async { Err(TaskError::failed("no disk")) });
        assert_eq!(
            poll_once(&mut task),
            Poll::Ready(Err(TaskError::Failed("no disk".into())))
        );
        // The cached error is handed out again.
        assert_eq!(
            poll_once(&mut task),
            Poll::Ready(Err(TaskError::Failed("no disk".into())))
        );
    }

    #[test]
    fn slot_completion_resumes_registered_waker() {
        let slot = Slot::new();
        let mut task = Task::pooled(slot.clone());

        assert!(matches!(poll_once(&mut task), Poll::Pending));
        slot.complete(Ok(9u32));
        assert_eq!(poll_once(&mut task), Poll::Ready(Ok(9)));
    }

    #[test]
    fn slot_first_completion_wins() {
        let slot = Slot::new();
        slot.complete(Ok(1u32));
        slot.complete(Ok(2u32));
        let mut task = Task::pooled(slot);
        assert_eq!(poll_once(&mut task), Poll::Ready(Ok(1)));
    }
}
