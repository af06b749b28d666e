//! Job system errors

use crate::scheduler::JobId;

/// Errors raised by the job system
///
/// Structural violations (`DuplicateContinuation`, `DanglingChild`,
/// `CoroutineUseAfterComplete`, `CounterUnderflow`) indicate a broken
/// dependency graph. `QueueFull` is transient: the job was not admitted and
/// the caller may retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    /// Every candidate queue for a new job was at capacity
    #[error("Queue full (capacity {capacity})")]
    QueueFull {
        /// Capacity of the queue that rejected the job
        capacity: usize,
    },

    /// A continuation was already registered for this job
    #[error("Job {0} already has a continuation")]
    DuplicateContinuation(JobId),

    /// A child finished after its parent was released
    #[error("Child job {child} outlived its parent {parent}")]
    DanglingChild {
        /// The finishing child
        child: JobId,
        /// The parent that is no longer alive
        parent: JobId,
    },

    /// The coroutine's result was already moved out, or its frame is gone
    #[error("Coroutine {0} used after completion")]
    CoroutineUseAfterComplete(JobId),

    /// The coroutine is awaited by a parent, which alone may move its result out
    #[error("Coroutine {0}'s result belongs to the coroutine awaiting it")]
    ResultOwnedByParent(JobId),

    /// A generator was resumed while another coroutine was still driving it
    #[error("Generator {0} is already being resumed")]
    GeneratorBusy(JobId),

    /// The coroutine's result was read before it was produced
    #[error("Coroutine {0} has not produced a result yet")]
    NotReady(JobId),

    /// A pending-children counter would have gone below zero
    #[error("Pending-children counter underflow on job {0}")]
    CounterUnderflow(JobId),

    /// The operation needs a current job but was called outside one
    #[error("No current job")]
    NoCurrentJob,

    /// The job system no longer accepts submissions
    #[error("Job system is shutting down")]
    ShuttingDown,

    /// A thread affinity outside the worker pool
    #[error("Invalid thread index {index} (pool has {count} workers)")]
    InvalidThreadIndex {
        /// Requested worker index
        index: usize,
        /// Number of workers in the pool
        count: usize,
    },

    /// The job body panicked
    #[error("Job panicked: {0}")]
    Panicked(String),

    /// The job was dropped from a queue at shutdown without running
    #[error("Job {0} discarded at shutdown")]
    Discarded(JobId),

    /// A write-once result slot was written twice
    #[error("Result already set")]
    ResultAlreadySet,

    /// A blocking wait ran out of time
    #[error("Timed out")]
    Timeout,

    /// Configuration rejected by validation or parsing
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Writing diagnostics output failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for JobError {
    fn from(err: std::io::Error) -> Self {
        JobError::Io(err.to_string())
    }
}

/// Job system result
pub type JobResult<T> = Result<T, JobError>;
