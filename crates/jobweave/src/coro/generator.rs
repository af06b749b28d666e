//! Value-yielding coroutines
//!
//! A [`Generator`] is a coroutine job that hands a sequence of values to the
//! coroutine awaiting it. Each `ctx.join(generator.resume())` runs the body up
//! to its next [`Yielder::yield_value`] or to its end, and returns what was
//! produced: `Some(value)`, or `None` once the body has returned.
//!
//! A parked generator is not in flight: it leaves the registry when it yields
//! and is re-admitted by the next `resume`. Only one coroutine may drive it at
//! a time; a second concurrent `resume` fails with `GeneratorBusy`.

use crate::coro::awaitable::{Awaitable, Collect, Submitter};
use crate::coro::coro::CoroContext;
use crate::coro::promise::ResultSink;
use crate::scheduler::job::{
    CoroFrame, CoroFuture, CoroStart, Job, JobId, JobKind, JobMeta, JobState, Payload,
};
use crate::{JobError, JobResult};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::trace;

/// Where a generator leaves its latest value (or its failure) for the parent
struct Handoff<T> {
    value: Mutex<Option<T>>,
    failure: Mutex<Option<JobError>>,
}

impl<T: Send> ResultSink for Handoff<T> {
    fn fail(&self, error: JobError) {
        self.failure.lock().get_or_insert(error);
    }
}

/// A coroutine job producing a sequence of `T`
pub struct Generator<T> {
    job: Arc<Job>,
    handoff: Arc<Handoff<T>>,
}

impl<T: Send + 'static> Generator<T> {
    /// Wrap a body that yields values through its [`Yielder`]
    ///
    /// ```ignore
    /// let mut numbers = Generator::new(|_, co| async move {
    ///     for i in 1..=3 {
    ///         co.yield_value(i).await;
    ///     }
    /// });
    /// while let Some(n) = ctx.join(numbers.resume()).await?? {
    ///     println!("{}", n);
    /// }
    /// ```
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CoroContext, Yielder<T>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handoff = Arc::new(Handoff {
            value: Mutex::new(None),
            failure: Mutex::new(None),
        });

        let body_handoff = Arc::clone(&handoff);
        let start: CoroStart = Box::new(move |ctx: CoroContext| -> CoroFuture {
            let yielder = Yielder {
                ctx: ctx.clone(),
                handoff: body_handoff,
            };
            Box::pin(body(ctx, yielder))
        });

        let sink: Arc<dyn ResultSink> = Arc::clone(&handoff) as Arc<dyn ResultSink>;
        let job = Arc::new(Job::new(
            JobId::new(),
            JobKind::Coroutine,
            Payload::Coroutine(CoroFrame::Unstarted(start)),
            JobMeta::default(),
            Some(sink),
        ));

        Self { job, handoff }
    }
}

impl<T> Generator<T> {
    /// ID of the generator's job
    pub fn id(&self) -> JobId {
        self.job.id()
    }

    /// Whether the body has returned
    pub fn is_done(&self) -> bool {
        self.job.is_completed()
    }

    /// Pin the generator to a worker
    pub fn on_thread(self, index: usize) -> Self {
        self.job.set_affinity(Some(index));
        self
    }

    /// Step to the next value; await the step with [`CoroContext::join`]
    pub fn resume(&mut self) -> GenStep<T> {
        GenStep {
            job: Arc::clone(&self.job),
            handoff: Arc::clone(&self.handoff),
        }
    }
}

impl<T> fmt::Debug for Generator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("job", &self.job.id())
            .field("state", &self.job.state())
            .finish()
    }
}

/// One step of a [`Generator`], awaitable as a single child
pub struct GenStep<T> {
    job: Arc<Job>,
    handoff: Arc<Handoff<T>>,
}

/// A submitted [`GenStep`] waiting for the generator to yield or return
pub struct GenPending<T> {
    handoff: Arc<Handoff<T>>,
}

impl<T> Collect for GenPending<T> {
    type Output = JobResult<Option<T>>;

    fn collect(self) -> Self::Output {
        if let Some(value) = self.handoff.value.lock().take() {
            return Ok(Some(value));
        }
        match self.handoff.failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }
}

impl<T: Send + 'static> Awaitable for GenStep<T> {
    type Output = JobResult<Option<T>>;
    type Pending = GenPending<T>;

    fn child_count(&self) -> usize {
        1
    }

    fn submit(self, submitter: &mut Submitter<'_>) -> GenPending<T> {
        let id = self.job.id();
        let pending = GenPending {
            handoff: self.handoff,
        };

        if self.job.is_completed() {
            submitter.release();
        } else if !self.job.claim_parent(submitter.parent()) {
            submitter.reject(JobError::GeneratorBusy(id));
        } else {
            match self.job.state() {
                JobState::Created => submitter.submit(self.job),
                JobState::Yielded => submitter.resume(self.job),
                state => {
                    trace!(job = %id, ?state, "generator not resumable");
                    let _ = self.job.take_parent();
                    submitter.reject(JobError::GeneratorBusy(id));
                }
            }
        }
        pending
    }
}

/// Handed to a generator body for producing values
pub struct Yielder<T> {
    ctx: CoroContext,
    handoff: Arc<Handoff<T>>,
}

impl<T> Yielder<T> {
    /// Hand `value` to the awaiting coroutine and suspend until resumed
    pub fn yield_value(&self, value: T) -> YieldValue<T> {
        YieldValue {
            ctx: self.ctx.clone(),
            handoff: Arc::clone(&self.handoff),
            value: Some(value),
        }
    }
}

impl<T> fmt::Debug for Yielder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Yielder").field("job", &self.ctx.job_id()).finish()
    }
}

/// Future returned by [`Yielder::yield_value`]
pub struct YieldValue<T> {
    ctx: CoroContext,
    handoff: Arc<Handoff<T>>,
    value: Option<T>,
}

impl<T> Unpin for YieldValue<T> {}

impl<T> Future for YieldValue<T> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let Some(value) = this.value.take() else {
            return Poll::Ready(());
        };
        match this.ctx.current_job() {
            Ok(job) => {
                *this.handoff.value.lock() = Some(value);
                job.set_parked();
                Poll::Pending
            }
            Err(_) => Poll::Ready(()),
        }
    }
}
