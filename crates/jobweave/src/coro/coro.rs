//! Coroutine jobs
//!
//! A [`Coro`] wraps a future factory. The job system creates the future on the
//! first dispatch and polls it once per dispatch. The future may only suspend
//! at the awaitables handed out by [`CoroContext`]; each of those tells the
//! scheduler when to poll again.

use crate::coro::awaitable::{Awaitable, Join, ResumeOn, RunTag, YieldNow};
use crate::coro::promise::{CoroPromise, ResultSink};
use crate::scheduler::context::{self, JobContext};
use crate::scheduler::job::{CoroFrame, CoroStart, Job, JobId, JobKind, JobMeta, JobType, Payload};
use crate::scheduler::scheduler::Shared;
use crate::scheduler::{Schedulable, Tag};
use crate::{JobError, JobResult};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tracing::trace;

/// A coroutine job producing a `T`
///
/// `Coro` is move-only: scheduling or awaiting it hands the frame to the job
/// system, so a frame can never be started twice. Keep a [`CoroPromise`] from
/// [`promise`](Self::promise) to read the result afterwards.
pub struct Coro<T> {
    id: JobId,
    start: CoroStart,
    promise: CoroPromise<T>,
    meta: JobMeta,
}

impl<T: Send + 'static> Coro<T> {
    /// Wrap a future factory
    ///
    /// ```ignore
    /// let coro = Coro::new(|ctx| async move {
    ///     let (a, b) = ctx.join((Coro::new(|_| async { 1 }), Coro::new(|_| async { 2 }))).await?;
    ///     Ok::<_, JobError>(a? + b?)
    /// });
    /// ```
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CoroContext) -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let id = JobId::new();
        let promise = CoroPromise::new(id);
        let slot = Arc::clone(promise.slot());

        let start: CoroStart = Box::new(move |ctx| {
            let future = body(ctx);
            Box::pin(async move {
                let value = future.await;
                if slot.set(Ok(value)).is_err() {
                    trace!(job = %id, "coroutine result already set");
                }
            })
        });

        Self {
            id,
            start,
            promise,
            meta: JobMeta::default(),
        }
    }
}

impl<T> Coro<T> {
    /// ID the coroutine's job will have
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Handle for reading the result once the coroutine has run
    pub fn promise(&self) -> CoroPromise<T> {
        self.promise.clone()
    }

    /// Pin the coroutine to a worker
    pub fn on_thread(mut self, index: usize) -> Self {
        self.meta.thread = Some(index);
        self
    }

    /// Set the trace category
    pub fn with_type(mut self, job_type: JobType) -> Self {
        self.meta.job_type = Some(job_type);
        self
    }

    /// Set the trace id
    pub fn with_id(mut self, label: u64) -> Self {
        self.meta.label = Some(label);
        self
    }
}

impl<T: Send + 'static> Coro<T> {
    /// Hand the frame to a new job; the promise stays with the caller
    pub(crate) fn into_parts(self) -> (Arc<Job>, CoroPromise<T>) {
        let sink: Arc<dyn ResultSink> = Arc::clone(self.promise.slot()) as Arc<dyn ResultSink>;
        let job = Arc::new(Job::new(
            self.id,
            JobKind::Coroutine,
            Payload::Coroutine(CoroFrame::Unstarted(self.start)),
            self.meta,
            Some(sink),
        ));
        (job, self.promise)
    }
}

impl<T: Send + 'static> Schedulable for Coro<T> {
    fn into_job(self) -> JobResult<Arc<Job>> {
        Ok(self.into_parts().0)
    }
}

impl<T> fmt::Debug for Coro<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coro")
            .field("id", &self.id)
            .field("meta", &self.meta)
            .finish()
    }
}

/// Handle passed to a coroutine body
///
/// Unlike [`JobContext`] it is owned, so it can live across `.await` points.
#[derive(Clone)]
pub struct CoroContext {
    shared: Arc<Shared>,
    job: Weak<Job>,
    id: JobId,
}

impl CoroContext {
    pub(crate) fn new(shared: Arc<Shared>, job: &Arc<Job>) -> Self {
        Self {
            shared,
            job: Arc::downgrade(job),
            id: job.id(),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// ID of the coroutine's job
    pub fn job_id(&self) -> JobId {
        self.id
    }

    /// The coroutine's job
    pub fn current_job(&self) -> JobResult<Arc<Job>> {
        self.job.upgrade().ok_or(JobError::NoCurrentJob)
    }

    /// Index of the worker polling the coroutine
    pub fn thread_index(&self) -> Option<usize> {
        context::worker_index(self.shared.system_id())
    }

    /// Number of workers in the pool
    pub fn thread_count(&self) -> usize {
        self.shared.thread_count()
    }

    fn with_job<R>(&self, f: impl FnOnce(&JobContext<'_>) -> JobResult<R>) -> JobResult<R> {
        let job = self.current_job()?;
        f(&JobContext::new(&self.shared, &job))
    }

    /// Schedule a child without awaiting it
    ///
    /// The coroutine still finishes only after the child has finished, and it
    /// is not resumed from a later suspension until the child is done.
    pub fn schedule<S: Schedulable>(&self, job: S) -> JobResult<JobId> {
        self.with_job(|ctx| ctx.schedule(job))
    }

    /// Schedule a job with no parent
    pub fn schedule_detached<S: Schedulable>(&self, job: S) -> JobResult<JobId> {
        self.shared.admit(job.into_job()?, None, false)
    }

    /// Park a job under `tag` until the tag is released
    pub fn schedule_tagged<S: Schedulable>(&self, job: S, tag: Tag) -> JobResult<JobId> {
        self.shared.park_tagged(job.into_job()?, tag)
    }

    /// Release the jobs parked under `tag` as children, without awaiting them
    pub fn schedule_tag(&self, tag: Tag) -> JobResult<usize> {
        self.with_job(|ctx| ctx.schedule_tag(tag))
    }

    /// Run `job` after the coroutine and all its children have finished
    pub fn continuation<S: Schedulable>(&self, job: S) -> JobResult<JobId> {
        self.with_job(|ctx| ctx.continuation(job))
    }

    /// Ask the job system to stop after the current jobs
    pub fn terminate(&self) {
        self.shared.terminate();
    }

    /// Schedule `children` and suspend until all of them have finished
    ///
    /// Accepts a [`Function`](crate::Function), a [`Coro`], a `Vec` of
    /// either, or a tuple of up to four awaitables. Coroutine children yield
    /// their results; the shape of the input is preserved.
    pub fn join<A: Awaitable>(&self, children: A) -> Join<A> {
        Join::new(self.clone(), children)
    }

    /// Suspend and continue on worker `thread`
    pub fn resume_on(&self, thread: usize) -> ResumeOn {
        ResumeOn::new(self.clone(), thread)
    }

    /// Re-queue behind other work
    pub fn yield_now(&self) -> YieldNow {
        YieldNow::new(self.clone())
    }

    /// Release the jobs parked under `tag` as children and await them
    pub fn run_tag(&self, tag: Tag) -> RunTag {
        RunTag::new(self.clone(), tag)
    }
}

impl fmt::Debug for CoroContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoroContext").field("job", &self.id).finish()
    }
}
