//! Awaitables a coroutine may suspend on
//!
//! Each awaitable returns `Pending` exactly once. The worker then releases the
//! slot the coroutine held on itself, and the scheduler re-queues the
//! coroutine when its pending-children count reaches zero. The second poll
//! completes.

use crate::coro::coro::{Coro, CoroContext};
use crate::coro::promise::{CoroPromise, CoroRole};
use crate::scheduler::job::Job;
use crate::scheduler::scheduler::Shared;
use crate::scheduler::{Function, Tag};
use crate::{JobError, JobResult};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// Schedules awaited children on behalf of a suspending coroutine
pub struct Submitter<'a> {
    shared: &'a Shared,
    parent: &'a Arc<Job>,
    error: Option<JobError>,
}

impl<'a> Submitter<'a> {
    fn new(shared: &'a Shared, parent: &'a Arc<Job>) -> Self {
        Self {
            shared,
            parent,
            error: None,
        }
    }

    /// Admit a child whose slot was already counted; keeps the first failure
    pub(crate) fn submit(&mut self, job: Arc<Job>) {
        if let Err(e) = self.shared.admit(job, Some(self.parent), true) {
            self.error.get_or_insert(e);
        }
    }

    /// Resume a yielded generator in a slot that was already counted
    pub(crate) fn resume(&mut self, job: Arc<Job>) {
        if let Err(e) = self.shared.resume_parked(job) {
            self.reject(e);
        }
    }

    /// Give back a counted slot that needs no job
    pub(crate) fn release(&mut self) {
        self.shared.child_finished(self.parent);
    }

    /// Give back a counted slot and fail the await with `error`
    pub(crate) fn reject(&mut self, error: JobError) {
        self.error.get_or_insert(error);
        self.release();
    }

    pub(crate) fn parent(&self) -> &Arc<Job> {
        self.parent
    }
}

/// Turns the submitted form of an awaitable into its result
pub trait Collect {
    /// Collected result
    type Output;

    /// Read the results once every child has finished
    fn collect(self) -> Self::Output;
}

/// Something a coroutine can schedule as children and await
pub trait Awaitable: Send + 'static {
    /// Result of awaiting
    type Output;

    /// State kept while the children run
    type Pending: Collect<Output = Self::Output> + Send;

    /// Number of jobs `submit` will schedule
    fn child_count(&self) -> usize;

    /// Schedule the children
    fn submit(self, submitter: &mut Submitter<'_>) -> Self::Pending;
}

impl Collect for () {
    type Output = ();

    fn collect(self) {}
}

impl<T> Collect for CoroPromise<T> {
    type Output = JobResult<T>;

    fn collect(self) -> JobResult<T> {
        self.slot().collect_child()
    }
}

impl<P: Collect> Collect for Vec<P> {
    type Output = Vec<P::Output>;

    fn collect(self) -> Self::Output {
        self.into_iter().map(Collect::collect).collect()
    }
}

impl Awaitable for Function {
    type Output = ();
    type Pending = ();

    fn child_count(&self) -> usize {
        1
    }

    fn submit(self, submitter: &mut Submitter<'_>) {
        submitter.submit(self.into_job());
    }
}

impl<T: Send + 'static> Awaitable for Coro<T> {
    type Output = JobResult<T>;
    type Pending = CoroPromise<T>;

    fn child_count(&self) -> usize {
        1
    }

    fn submit(self, submitter: &mut Submitter<'_>) -> CoroPromise<T> {
        let (job, promise) = self.into_parts();
        promise.slot().set_role(CoroRole::Child);
        submitter.submit(job);
        promise
    }
}

impl<A: Awaitable> Awaitable for Vec<A> {
    type Output = Vec<A::Output>;
    type Pending = Vec<A::Pending>;

    fn child_count(&self) -> usize {
        self.iter().map(Awaitable::child_count).sum()
    }

    fn submit(self, submitter: &mut Submitter<'_>) -> Self::Pending {
        self.into_iter().map(|child| child.submit(submitter)).collect()
    }
}

macro_rules! tuple_awaitable {
    ($($name:ident),+) => {
        impl<$($name: Collect),+> Collect for ($($name,)+) {
            type Output = ($($name::Output,)+);

            #[allow(non_snake_case)]
            fn collect(self) -> Self::Output {
                let ($($name,)+) = self;
                ($($name.collect(),)+)
            }
        }

        impl<$($name: Awaitable),+> Awaitable for ($($name,)+) {
            type Output = ($($name::Output,)+);
            type Pending = ($($name::Pending,)+);

            #[allow(non_snake_case)]
            fn child_count(&self) -> usize {
                let ($($name,)+) = self;
                0 $(+ $name.child_count())+
            }

            #[allow(non_snake_case)]
            fn submit(self, submitter: &mut Submitter<'_>) -> Self::Pending {
                let ($($name,)+) = self;
                ($($name.submit(submitter),)+)
            }
        }
    };
}

tuple_awaitable!(A, B);
tuple_awaitable!(A, B, C);
tuple_awaitable!(A, B, C, D);

enum JoinState<A: Awaitable> {
    Start(A),
    Waiting(A::Pending, Option<JobError>),
    Done,
}

/// Future returned by [`CoroContext::join`]
pub struct Join<A: Awaitable> {
    ctx: CoroContext,
    state: JoinState<A>,
}

// Never pin-projected: the children are moved out on the first poll
impl<A: Awaitable> Unpin for Join<A> {}

impl<A: Awaitable> Join<A> {
    pub(crate) fn new(ctx: CoroContext, children: A) -> Self {
        Self {
            ctx,
            state: JoinState::Start(children),
        }
    }
}

impl<A: Awaitable> Future for Join<A> {
    type Output = JobResult<A::Output>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match std::mem::replace(&mut this.state, JoinState::Done) {
            JoinState::Start(children) => {
                let job = match this.ctx.current_job() {
                    Ok(job) => job,
                    Err(e) => return Poll::Ready(Err(e)),
                };
                let count = children.child_count();
                job.add_children(count);

                let mut submitter = Submitter::new(this.ctx.shared(), &job);
                let pending = children.submit(&mut submitter);
                let error = submitter.error;

                if count == 0 {
                    return Poll::Ready(Ok(pending.collect()));
                }
                this.state = JoinState::Waiting(pending, error);
                Poll::Pending
            }
            JoinState::Waiting(pending, error) => Poll::Ready(match error {
                Some(e) => Err(e),
                None => Ok(pending.collect()),
            }),
            JoinState::Done => Poll::Ready(Err(JobError::CoroutineUseAfterComplete(
                this.ctx.job_id(),
            ))),
        }
    }
}

/// Future returned by [`CoroContext::resume_on`]
pub struct ResumeOn {
    ctx: CoroContext,
    thread: usize,
    moved: bool,
}

impl ResumeOn {
    pub(crate) fn new(ctx: CoroContext, thread: usize) -> Self {
        Self {
            ctx,
            thread,
            moved: false,
        }
    }
}

impl Future for ResumeOn {
    type Output = JobResult<()>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.moved {
            return Poll::Ready(Ok(()));
        }
        if let Err(e) = this.ctx.shared().check_thread(Some(this.thread)) {
            return Poll::Ready(Err(e));
        }
        if this.ctx.thread_index() == Some(this.thread) {
            return Poll::Ready(Ok(()));
        }
        match this.ctx.current_job() {
            Ok(job) => job.set_affinity(Some(this.thread)),
            Err(e) => return Poll::Ready(Err(e)),
        }
        this.moved = true;
        Poll::Pending
    }
}

/// Future returned by [`CoroContext::yield_now`]
pub struct YieldNow {
    ctx: CoroContext,
    yielded: bool,
}

impl YieldNow {
    pub(crate) fn new(ctx: CoroContext) -> Self {
        Self {
            ctx,
            yielded: false,
        }
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.yielded {
            return Poll::Ready(());
        }
        match this.ctx.current_job() {
            Ok(job) => job.set_yielded(),
            Err(_) => return Poll::Ready(()),
        }
        this.yielded = true;
        Poll::Pending
    }
}

/// Future returned by [`CoroContext::run_tag`]
pub struct RunTag {
    ctx: CoroContext,
    tag: Tag,
    released: Option<usize>,
}

impl RunTag {
    pub(crate) fn new(ctx: CoroContext, tag: Tag) -> Self {
        Self {
            ctx,
            tag,
            released: None,
        }
    }
}

impl Future for RunTag {
    type Output = JobResult<usize>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Some(count) = this.released {
            return Poll::Ready(Ok(count));
        }
        let count = match this.ctx.schedule_tag(this.tag) {
            Ok(count) => count,
            Err(e) => return Poll::Ready(Err(e)),
        };
        if count == 0 {
            return Poll::Ready(Ok(0));
        }
        this.released = Some(count);
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::JobId;

    fn ready_promise<T>(value: T) -> CoroPromise<T> {
        let promise = CoroPromise::new(JobId::new());
        promise.slot().set(Ok(value)).unwrap();
        promise
    }

    #[test]
    fn test_child_counts() {
        let f = || Function::new(|_| {});
        let c = || Coro::new(|_| async { 1 });

        assert_eq!(f().child_count(), 1);
        assert_eq!(c().child_count(), 1);
        assert_eq!(vec![f(), f(), f()].child_count(), 3);
        assert_eq!(Vec::<Function>::new().child_count(), 0);
        assert_eq!((f(), c()).child_count(), 2);
        assert_eq!((vec![c(), c()], f(), c()).child_count(), 4);
        assert_eq!((f(), f(), f(), Vec::<Function>::new()).child_count(), 3);
    }

    #[test]
    fn test_collect_shapes() {
        let collected = (ready_promise(1), (), vec![ready_promise("a"), ready_promise("b")]).collect();
        assert_eq!(collected, (Ok(1), (), vec![Ok("a"), Ok("b")]));
    }

    #[test]
    fn test_collect_moves_child_result() {
        let promise = ready_promise(String::from("value"));
        let reader = promise.clone();
        assert_eq!(promise.collect(), Ok(String::from("value")));
        assert_eq!(
            reader.get(),
            Some(Err(JobError::CoroutineUseAfterComplete(reader.job_id())))
        );
    }
}
