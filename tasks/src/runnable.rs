//! Pool-driven computation stepper.
//!
//! A `Runnable` owns the boxed body of a pool-registered computation and
//! resumes it in place: waking a suspended runnable polls the body inline
//! on the waking thread, so a completion resumes its continuation
//! synchronously on whatever thread produced it. The lifecycle guards
//! guarantee the body is polled by at most one thread at a time and that a
//! wake arriving mid-poll is never lost.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use parking_lot::Mutex;

use crate::error::TaskError;
use crate::task::BoxFuture;

enum Lifecycle {
    /// Suspended; the next wake resumes the body.
    Idle,
    /// A thread is inside `poll`.
    Polling,
    /// Woken while polling; the polling thread must poll again.
    Notified,
    /// The body finished or was abandoned after a panic.
    Complete,
}

pub(crate) struct Runnable {
    lifecycle: Mutex<Lifecycle>,
    body: Mutex<Option<BoxFuture<()>>>,
    /// Invoked at most once if the body panics out of `poll`.
    panic_hook: Mutex<Option<Box<dyn FnOnce(TaskError) + Send>>>,
}

impl Runnable {
    pub fn new(
        body: BoxFuture<()>,
        panic_hook: Box<dyn FnOnce(TaskError) + Send>,
    ) -> Arc<Self> {
        Arc::new(Self {
            lifecycle: Mutex::new(Lifecycle::Idle),
            body: Mutex::new(Some(body)),
            panic_hook: Mutex::new(Some(panic_hook)),
        })
    }

    /// Resume the body on the current thread.
    ///
    /// If another thread is mid-poll, this only marks the runnable as
    /// notified and returns; that thread re-polls before going idle.
    pub fn resume(self: Arc<Self>) {
        {
            let mut lifecycle = self.lifecycle.lock();
            match *lifecycle {
                Lifecycle::Idle => *lifecycle = Lifecycle::Polling,
                Lifecycle::Polling => {
                    *lifecycle = Lifecycle::Notified;
                    return;
                }
                Lifecycle::Notified | Lifecycle::Complete => return,
            }
        }

        let waker = Waker::from(self.clone());
        let mut cx = Context::from_waker(&waker);

        loop {
            let step = {
                let mut body = self.body.lock();
                match body.as_mut() {
                    Some(future) => {
                        let step =
                            catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));
                        if !matches!(step, Ok(Poll::Pending)) {
                            *body = None;
                        }
                        step
                    }
                    None => Ok(Poll::Ready(())),
                }
            };

            match step {
                Ok(Poll::Ready(())) => {
                    *self.lifecycle.lock() = Lifecycle::Complete;
                    return;
                }
                Ok(Poll::Pending) => {
                    let mut lifecycle = self.lifecycle.lock();
                    match *lifecycle {
                        Lifecycle::Notified => *lifecycle = Lifecycle::Polling,
                        _ => {
                            *lifecycle = Lifecycle::Idle;
                            return;
                        }
                    }
                }
                Err(payload) => {
                    *self.lifecycle.lock() = Lifecycle::Complete;
                    let error = TaskError::from_panic(payload);
                    log::error!("pool computation panicked: {error}");
                    if let Some(hook) = self.panic_hook.lock().take() {
                        hook(error);
                    }
                    return;
                }
            }
        }
    }
}

impl Wake for Runnable {
    fn wake(self: Arc<Self>) {
        self.resume();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.clone().resume();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn resume_drives_body_to_completion() {
        let done = Arc::new(AtomicBool::new(false));
        let probe = done.clone();
        let runnable = Runnable::new(
            Box::pin(async move {
                probe.store(true, Ordering::SeqCst);
            }),
            Box::new(|_| {}),
        );
        runnable.resume();
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn wake_during_poll_triggers_repoll() {
        // A body that wakes itself and suspends once: the self-wake arrives
        // while the runnable is mid-poll, so resume must loop and finish
        // the body without any external driver.
        struct YieldOnce {
            yielded: bool,
        }
        impl std::future::Future for YieldOnce {
            type Output = ();
            fn poll(
                mut self: std::pin::Pin<&mut Self>,
                cx: &mut Context<'_>,
            ) -> Poll<()> {
                if self.yielded {
                    Poll::Ready(())
                } else {
                    self.yielded = true;
                    cx.waker().wake_by_ref();
                    Poll::Pending
                }
            }
        }

        let polls = Arc::new(AtomicUsize::new(0));
        let probe = polls.clone();
        let runnable = Runnable::new(
            Box::pin(async move {
                YieldOnce { yielded: false }.await;
                probe.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(|_| {}),
        );
        runnable.resume();
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panic_fires_hook_once() {
        let seen = Arc::new(Mutex::new(None));
        let probe = seen.clone();
        let runnable = Runnable::new(
            Box::pin(async move {
                panic!("torn buffer");
            }),
            Box::new(move |err| {
                *probe.lock() = Some(err);
            }),
        );
        runnable.clone().resume();
        // A stray second wake after completion is a no-op.
        runnable.resume();
        assert_eq!(
            *seen.lock(),
            Some(TaskError::Panicked("torn buffer".into()))
        );
    }

    #[test]
    fn completed_runnable_ignores_wakes() {
        let runs = Arc::new(AtomicUsize::new(0));
        let probe = runs.clone();
        let runnable = Runnable::new(
            Box::pin(async move {
                probe.fetch_add(1, Ordering::SeqCst);
            }),
            Box::new(|_| {}),
        );
        runnable.clone().resume();
        runnable.resume();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
