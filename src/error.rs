//! Error types for the pipeline engine.
//!
//! Errors are split by severity class so callers can tell a misconfigured
//! pipeline apart from an internal bookkeeping bug or an ordinary per-item
//! handler failure:
//!
//! - [`ConfigError`]: invalid construction parameters. Returned
//!   synchronously by constructors; a pipeline that builds successfully
//!   never produces one at runtime.
//! - [`InvariantError`]: internal accounting violated by a caller (for
//!   example, [`task_done`] called more times than items were enqueued).
//!   Fatal; should not be caught and retried.
//! - [`SendError`]: a send on a queue that has been closed. Carries the
//!   rejected item back to the caller.
//! - [`HandlerError`]: a user-supplied handler failed. Recoverable and
//!   governed by the worker pool's failure policy.
//!
//! Cooperative cancellation is *not* an error: suspending operations
//! resolve to [`Recv::Cancelled`] instead, and it is never logged as a
//! failure.
//!
//! [`task_done`]: crate::queue::BoundedQueue::task_done
//! [`Recv::Cancelled`]: crate::queue::Recv::Cancelled

use std::fmt;

use thiserror::Error;

/// Boxed error produced by a user-supplied worker handler.
///
/// Side effects (network calls, disk I/O) are entirely the handler's
/// responsibility; the engine only needs to know whether the item
/// succeeded or failed.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Invalid construction parameters.
///
/// These surface immediately at construction and terminate pipeline
/// setup; there is no retry path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Rate limiter configured with a zero event limit.
    #[error("rate limit must be positive")]
    ZeroRateLimit,

    /// Rate limiter configured with a zero-length window.
    #[error("rate window must be a positive duration")]
    ZeroRateWindow,

    /// Batcher configured with a zero batch size.
    #[error("batch size must be positive")]
    ZeroBatchSize,

    /// Batcher configured with a zero flush timeout.
    #[error("batch timeout must be a positive duration")]
    ZeroBatchTimeout,

    /// Worker pool configured with zero workers.
    #[error("worker count must be positive")]
    ZeroWorkerCount,

    /// Frontier configured with a zero key cap.
    #[error("max keys must be positive")]
    ZeroMaxKeys,

    /// More seed keys supplied than the frontier cap allows.
    #[error("{seeds} seed keys exceed the frontier cap of {max_keys}")]
    SeedsExceedCap { seeds: usize, max_keys: usize },
}

/// Internal bookkeeping violated by a caller.
///
/// Indicates a bug in the code driving the pipeline, not a transient
/// condition. The affected stage should be torn down.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantError {
    /// `task_done` was called more times than items were enqueued.
    #[error("task_done called more times than items were enqueued")]
    TaskDoneUnderflow,
}

/// A send on a closed queue. Returns the rejected item to the caller.
pub struct SendError<T>(pub T);

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError").finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send on closed queue")
    }
}

impl<T> std::error::Error for SendError<T> {}
