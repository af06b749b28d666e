//! Jobweave job system
//!
//! A work-stealing job scheduler that runs plain callables and coroutines
//! under one abstraction:
//! - **Scheduler**: worker pool, bounded queues, parent/child completion
//!   tracking and continuations (`scheduler` module)
//! - **Coroutines**: futures that suspend on child jobs instead of blocking a
//!   worker, and generators that hand values to the coroutine awaiting them
//!   (`coro` module)
//! - **Trace**: per-worker execution log with Chrome tracing export (`trace` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use jobweave::{Coro, Function, JobSystem};
//!
//! let mut system = JobSystem::new(4);
//! system.start()?;
//!
//! // A job with two children and a continuation that runs after both
//! system.schedule(Function::new(|ctx| {
//!     ctx.schedule(Function::new(|_| println!("child A"))).expect("queue full");
//!     ctx.schedule(Function::new(|_| println!("child B"))).expect("queue full");
//!     ctx.continuation(Function::new(|_| println!("after A and B"))).expect("continuation");
//! }))?;
//!
//! // A coroutine awaiting two coroutine children
//! let sum = Coro::new(|ctx| async move {
//!     let (a, b) = ctx
//!         .join((Coro::new(|_| async { 20 }), Coro::new(|_| async { 22 })))
//!         .await?;
//!     Ok::<_, jobweave::JobError>(a? + b?)
//! });
//! let result = sum.promise();
//! system.schedule(sum)?;
//! assert_eq!(result.wait()?, Ok(42));
//!
//! system.shutdown();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod coro;
pub mod error;
pub mod scheduler;
pub mod trace;

pub use config::JobSystemConfig;
pub use coro::{Awaitable, Coro, CoroContext, CoroPromise, CoroRole, Generator, Yielder};
pub use error::{JobError, JobResult};
pub use scheduler::{
    Function, Job, JobContext, JobHandle, JobId, JobKind, JobState, JobSystem, JobType,
    Schedulable, SchedulerStats, ShutdownReport, Tag,
};
pub use trace::{ExecutionTrace, TraceEvent, TraceKind};
