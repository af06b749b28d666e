//! Job Scheduler
//!
//! Work-stealing worker pool with parent/child completion tracking. Every
//! worker owns a bounded LIFO deque; idle workers steal from the opposite end.

pub(crate) mod context;
pub mod deque;
pub(crate) mod job;
#[allow(clippy::module_inception)]
pub(crate) mod scheduler;
mod worker;

pub use context::JobContext;
pub use deque::{InjectorQueue, JobQueue, QueueStealer, Rejected};
pub use job::{Function, Job, JobHandle, JobId, JobKind, JobMeta, JobState, JobType, Schedulable, Tag};
pub use scheduler::{JobSystem, SchedulerStats, ShutdownReport};
