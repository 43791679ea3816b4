use std::io;

/// Errors returned by the kernel calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The handle does not refer to an existing task, semaphore or queue.
    #[error("handle does not refer to an existing object")]
    InvalidHandle,

    /// The semaphore or queue was destroyed, possibly while the caller was
    /// blocked on it.
    #[error("object was destroyed")]
    Destroyed,

    /// The task to join had already terminated when the join was requested.
    #[error("task has already terminated")]
    AlreadyTerminated,

    /// The message does not have the size of a queue slot.
    #[error("message size does not match the queue slot size")]
    MessageSize,

    /// No execution context could be created for a new task.
    #[error("no execution context available for a new task")]
    Exhausted,
}

pub type Result<T> = core::result::Result<T, Error>;

/// Errors preventing the kernel from starting.
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    /// The periodic tick source could not be armed.
    #[error("failed to arm the tick source")]
    Timer(#[source] io::Error),

    /// The main task could not be created.
    #[error("failed to create the main task")]
    MainTask(#[source] io::Error),
}
