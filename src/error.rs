//! Runtime error types using thiserror
//!
//! The runtime has no recoverable error channel: apart from `Deadlock`,
//! which blocking primitives absorb, every variant here is a condition
//! after which the shared scheduler state can no longer be trusted. Kernel-level code returns them as `Result`s so they can be
//! inspected in tests; the public [`Runtime`](crate::Runtime) surface hands
//! them to [`fatal`], which ends the process.

use thiserror::Error;

use crate::types::ThreadId;

/// Fatal runtime conditions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("failed to capture execution context: {0}")]
    ContextCapture(String),

    #[error("invalid thread id {0}: ids must be positive")]
    InvalidThreadId(ThreadId),

    #[error("duplicate thread id {0}: already registered")]
    DuplicateThreadId(ThreadId),

    #[error("no runnable thread left after dispatch")]
    NoRunnableThread,

    #[error("thread {0} is queued but has no control block")]
    MissingControlBlock(ThreadId),

    /// Parking the caller would leave nothing to run. Waits treat this as
    /// "do not block" rather than passing it on.
    #[error("deadlock: thread {0} blocked with no other runnable thread")]
    Deadlock(ThreadId),

    #[error("thread {0} panicked")]
    ThreadPanicked(ThreadId),

    #[error("failed to allocate a {0}-byte thread stack")]
    StackAllocation(usize),

    #[error("failed to arm the preemption timer: {0}")]
    TimerSetup(String),
}

/// Result type for kernel operations
pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Report a fatal condition and terminate the whole process
///
/// Only the process can be ended safely: the offending thread shares its
/// queues with every other thread.
pub fn fatal(err: RuntimeError) -> ! {
    log::error!("fatal: {err}");
    eprintln!("udthread: fatal: {err}");
    std::process::exit(1)
}

/// Unwrap a kernel result or end the process
pub(crate) fn or_fatal<T>(result: RuntimeResult<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => fatal(err),
    }
}
