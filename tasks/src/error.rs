//! Scheduling error types.

use std::any::Any;

use thiserror::Error;

/// Error carried by a failed asynchronous computation.
///
/// The error is captured where the computation body fails and re-raised to
/// the awaiter when the result is retrieved. `Clone` lets a completed
/// [`Task`](crate::Task) hand the same cached error to every re-read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The computation body panicked on a worker thread.
    #[error("computation panicked: {0}")]
    Panicked(String),
    /// The computation body reported a failure.
    #[error("{0}")]
    Failed(String),
    /// The pool was stopped before the computation could run.
    #[error("worker pool stopped")]
    Stopped,
}

impl TaskError {
    /// Create a `Failed` error from any displayable message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Convert a caught panic payload into a `Panicked` error.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "opaque panic payload".to_string());
        Self::Panicked(message)
    }
}

/// Result of an asynchronous computation.
pub type TaskResult<T> = Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            TaskError::Panicked("boom".into()).to_string(),
            "computation panicked: boom"
        );
        assert_eq!(TaskError::failed("missing asset").to_string(), "missing asset");
        assert_eq!(TaskError::Stopped.to_string(), "worker pool stopped");
    }

    #[test]
    fn panic_payload_str() {
        let payload: Box<dyn Any + Send> = Box::new("bad index");
        assert_eq!(
            TaskError::from_panic(payload),
            TaskError::Panicked("bad index".into())
        );
    }

    #[test]
    fn panic_payload_string() {
        let payload: Box<dyn Any + Send> = Box::new(format!("bad {}", "frame"));
        assert_eq!(
            TaskError::from_panic(payload),
            TaskError::Panicked("bad frame".into())
        );
    }

    #[test]
    fn panic_payload_opaque() {
        let payload: Box<dyn Any + Send> = Box::new(17u32);
        assert_eq!(
            TaskError::from_panic(payload),
            TaskError::Panicked("opaque panic payload".into())
        );
    }
}
