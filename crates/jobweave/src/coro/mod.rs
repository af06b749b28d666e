//! Coroutine adapter
//!
//! Lets a Rust future run as a job: it suspends on awaited children instead of
//! blocking a worker and is resumed by the scheduler once they have finished.

mod awaitable;
#[allow(clippy::module_inception)]
mod coro;
mod generator;
mod promise;

pub use awaitable::{Awaitable, Collect, Join, ResumeOn, RunTag, Submitter, YieldNow};
pub use coro::{Coro, CoroContext};
pub use generator::{GenPending, GenStep, Generator, YieldValue, Yielder};
pub use promise::{CoroPromise, CoroRole, ResultSink, ResultSlot};

pub(crate) use promise::coro_deallocator;
