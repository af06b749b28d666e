//! Job structure and completion bookkeeping

use crate::coro::{coro_deallocator, CoroContext, ResultSink};
use crate::scheduler::JobContext;
use crate::{JobError, JobResult};
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Unique identifier for a Job
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(u64);

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

impl JobId {
    /// Generate a new unique JobId
    pub fn new() -> Self {
        JobId(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a JobId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        JobId(id)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Name of a deferred-scheduling queue
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Tag(pub u32);

/// Job category shown in execution traces
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobType(pub u32);

/// Whether a job runs a plain callable or a coroutine frame
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// Runs to completion in one dispatch
    Function,
    /// Polled once per dispatch until its future is ready
    Coroutine,
}

/// State of a Job
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Built, not yet admitted
    Created,
    /// Sitting in a queue (or a tag queue)
    Queued,
    /// Currently executing on a worker
    Running,
    /// Coroutine suspended until its pending children finish
    Suspended,
    /// Generator parked after handing a value to its parent
    Yielded,
    /// Body done, waiting for children
    Waiting,
    /// Body and all children done; continuation scheduled
    Finished,
    /// Dropped from a queue at shutdown without running
    Discarded,
}

/// Scheduling and tracing hints attached to a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobMeta {
    /// Worker the job is pinned to
    pub thread: Option<usize>,
    /// Trace category
    pub job_type: Option<JobType>,
    /// Trace id
    pub label: Option<u64>,
}

pub(crate) type FunctionBody = Box<dyn FnOnce(&JobContext<'_>) + Send + 'static>;
pub(crate) type CoroFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub(crate) type CoroStart = Box<dyn FnOnce(CoroContext) -> CoroFuture + Send + 'static>;

/// The work a job carries
pub(crate) enum Payload {
    Function(FunctionBody),
    Coroutine(CoroFrame),
}

/// A coroutine frame: not started yet, or parked at a suspension point
pub(crate) enum CoroFrame {
    Unstarted(CoroStart),
    Suspended(CoroFuture),
}

struct ParentLink {
    id: JobId,
    job: Weak<Job>,
}

const NO_AFFINITY: usize = usize::MAX;

/// Shared handle to a job
pub type JobHandle = Arc<Job>;

/// A schedulable unit of work
///
/// Jobs are shared as `Arc<Job>`. The scheduler's in-flight registry holds the
/// owning reference from admission until the job finishes; children refer to
/// their parent weakly.
pub struct Job {
    /// Unique identifier
    id: JobId,

    /// Function or coroutine
    kind: JobKind,

    /// Current state
    state: Mutex<JobState>,

    /// Work to run; taken while executing, restored on suspension
    payload: Mutex<Option<Payload>>,

    /// Parent to notify on finish
    parent: Mutex<Option<ParentLink>>,

    /// Children not yet finished, plus one for the job itself while it runs
    children: AtomicUsize,

    /// Job to schedule once this one has finished
    continuation: Mutex<Option<Arc<Job>>>,

    /// Worker this job must run on (`NO_AFFINITY` when free)
    affinity: AtomicUsize,

    /// Trace category
    job_type: Option<JobType>,

    /// Trace id
    label: Option<u64>,

    /// Where a coroutine's failure is reported
    sink: Mutex<Option<Arc<dyn ResultSink>>>,

    /// Body returned or coroutine reached its final state
    completed: AtomicBool,

    /// Coroutine asked to be re-queued behind other work
    yielded: AtomicBool,

    /// Generator handed out a value and waits to be resumed by its parent
    parked: AtomicBool,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        kind: JobKind,
        payload: Payload,
        meta: JobMeta,
        sink: Option<Arc<dyn ResultSink>>,
    ) -> Self {
        Self {
            id,
            kind,
            state: Mutex::new(JobState::Created),
            payload: Mutex::new(Some(payload)),
            parent: Mutex::new(None),
            children: AtomicUsize::new(0),
            continuation: Mutex::new(None),
            affinity: AtomicUsize::new(meta.thread.unwrap_or(NO_AFFINITY)),
            job_type: meta.job_type,
            label: meta.label,
            sink: Mutex::new(sink),
            completed: AtomicBool::new(false),
            yielded: AtomicBool::new(false),
            parked: AtomicBool::new(false),
        }
    }

    /// Get the Job's unique ID
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Function or coroutine
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Get the current state
    pub fn state(&self) -> JobState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: JobState) {
        *self.state.lock() = state;
    }

    /// Number of unfinished children (the running job counts itself)
    pub fn pending_children(&self) -> usize {
        self.children.load(Ordering::Acquire)
    }

    /// ID of the parent, if this job was spawned as a child
    pub fn parent_id(&self) -> Option<JobId> {
        self.parent.lock().as_ref().map(|link| link.id)
    }

    /// Worker this job is pinned to
    pub fn affinity(&self) -> Option<usize> {
        match self.affinity.load(Ordering::Acquire) {
            NO_AFFINITY => None,
            index => Some(index),
        }
    }

    /// Trace category
    pub fn job_type(&self) -> Option<JobType> {
        self.job_type
    }

    /// Trace id
    pub fn label(&self) -> Option<u64> {
        self.label
    }

    /// Whether the body has returned (or the coroutine reached its end)
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Whether a continuation is registered
    pub fn has_continuation(&self) -> bool {
        self.continuation.lock().is_some()
    }

    pub(crate) fn set_affinity(&self, thread: Option<usize>) {
        self.affinity
            .store(thread.unwrap_or(NO_AFFINITY), Ordering::Release);
    }

    pub(crate) fn set_parent(&self, parent: &Arc<Job>) {
        *self.parent.lock() = Some(ParentLink {
            id: parent.id,
            job: Arc::downgrade(parent),
        });
    }

    /// Set the parent unless one is already linked
    pub(crate) fn claim_parent(&self, parent: &Arc<Job>) -> bool {
        let mut link = self.parent.lock();
        if link.is_some() {
            return false;
        }
        *link = Some(ParentLink {
            id: parent.id,
            job: Arc::downgrade(parent),
        });
        true
    }

    /// Unlink and resolve the parent
    pub(crate) fn take_parent(&self) -> JobResult<Option<Arc<Job>>> {
        let link = self.parent.lock().take();
        link.map(|link| self.resolve(&link)).transpose()
    }

    /// Resolve the parent link; a link whose target is gone is a dangling child
    pub(crate) fn parent(&self) -> JobResult<Option<Arc<Job>>> {
        self.parent
            .lock()
            .as_ref()
            .map(|link| self.resolve(link))
            .transpose()
    }

    fn resolve(&self, link: &ParentLink) -> JobResult<Arc<Job>> {
        link.job.upgrade().ok_or(JobError::DanglingChild {
            child: self.id,
            parent: link.id,
        })
    }

    /// Count `n` more children; must happen before they become visible
    pub(crate) fn add_children(&self, n: usize) {
        self.children.fetch_add(n, Ordering::AcqRel);
    }

    /// Checked decrement; `true` for the single caller that reaches zero
    pub(crate) fn release_child(&self) -> JobResult<bool> {
        self.children
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|previous| previous == 1)
            .map_err(|_| JobError::CounterUnderflow(self.id))
    }

    /// Register `job` to run after this one; a second registration is handed back
    pub(crate) fn set_continuation(&self, job: Arc<Job>) -> Result<(), Arc<Job>> {
        let mut slot = self.continuation.lock();
        if slot.is_some() {
            return Err(job);
        }
        *slot = Some(job);
        Ok(())
    }

    pub(crate) fn take_continuation(&self) -> Option<Arc<Job>> {
        self.continuation.lock().take()
    }

    pub(crate) fn take_payload(&self) -> Option<Payload> {
        self.payload.lock().take()
    }

    pub(crate) fn restore_payload(&self, payload: Payload) {
        *self.payload.lock() = Some(payload);
    }

    pub(crate) fn take_sink(&self) -> Option<Arc<dyn ResultSink>> {
        self.sink.lock().take()
    }

    pub(crate) fn mark_completed(&self) {
        self.completed.store(true, Ordering::Release);
    }

    pub(crate) fn set_yielded(&self) {
        self.yielded.store(true, Ordering::Release);
    }

    pub(crate) fn take_yielded(&self) -> bool {
        self.yielded.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn set_parked(&self) {
        self.parked.store(true, Ordering::Release);
    }

    pub(crate) fn take_parked(&self) -> bool {
        self.parked.swap(false, Ordering::AcqRel)
    }

    /// Release the payload of a job that will never run again
    ///
    /// Coroutine frames go through [`coro_deallocator`] and their promise is
    /// failed with `reason`, so waiters are not left hanging.
    pub(crate) fn deallocate(&self, reason: JobError) {
        let payload = self.take_payload();
        if let Some(Payload::Coroutine(frame)) = payload {
            coro_deallocator(self.id, frame);
        }
        if let Some(sink) = self.take_sink() {
            sink.fail(reason);
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("pending_children", &self.pending_children())
            .field("parent", &self.parent_id())
            .finish()
    }
}

/// A plain callable job with scheduling hints
///
/// The body receives a [`JobContext`] through which it can spawn children and
/// register a continuation.
pub struct Function {
    body: FunctionBody,
    meta: JobMeta,
}

impl Function {
    /// Wrap a callable
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce(&JobContext<'_>) + Send + 'static,
    {
        Self {
            body: Box::new(body),
            meta: JobMeta::default(),
        }
    }

    /// Pin the job to a worker
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

    /// Scheduling hints
    pub fn meta(&self) -> JobMeta {
        self.meta
    }

    pub(crate) fn into_job(self) -> Arc<Job> {
        Arc::new(Job::new(
            JobId::new(),
            JobKind::Function,
            Payload::Function(self.body),
            self.meta,
            None,
        ))
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function").field("meta", &self.meta).finish()
    }
}

/// Anything that can be turned into a job and scheduled
pub trait Schedulable {
    /// Build the job
    fn into_job(self) -> JobResult<Arc<Job>>;
}

impl Schedulable for Function {
    fn into_job(self) -> JobResult<Arc<Job>> {
        Ok(Function::into_job(self))
    }
}

impl<F> Schedulable for F
where
    F: FnOnce(&JobContext<'_>) + Send + 'static,
{
    fn into_job(self) -> JobResult<Arc<Job>> {
        Ok(Function::new(self).into_job())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_job() -> Arc<Job> {
        Function::new(|_| {}).into_job()
    }

    #[test]
    fn test_job_id_uniqueness() {
        let id1 = JobId::new();
        let id2 = JobId::new();
        assert_ne!(id1, id2);
        assert!(id2.as_u64() > id1.as_u64());
        assert_eq!(JobId::from_u64(id1.as_u64()), id1);
    }

    #[test]
    fn test_job_creation() {
        let job = create_test_job();
        assert_eq!(job.kind(), JobKind::Function);
        assert_eq!(job.state(), JobState::Created);
        assert_eq!(job.pending_children(), 0);
        assert_eq!(job.parent_id(), None);
        assert_eq!(job.affinity(), None);
        assert!(!job.is_completed());
        assert!(!job.has_continuation());
    }

    #[test]
    fn test_function_meta() {
        let job = Function::new(|_| {})
            .on_thread(2)
            .with_type(JobType(7))
            .with_id(99)
            .into_job();

        assert_eq!(job.affinity(), Some(2));
        assert_eq!(job.job_type(), Some(JobType(7)));
        assert_eq!(job.label(), Some(99));
    }

    #[test]
    fn test_children_counter_zero_crossing() {
        let job = create_test_job();
        job.add_children(3);

        assert_eq!(job.release_child(), Ok(false));
        assert_eq!(job.release_child(), Ok(false));
        assert_eq!(job.release_child(), Ok(true));
        assert_eq!(job.pending_children(), 0);
    }

    #[test]
    fn test_children_counter_never_negative() {
        let job = create_test_job();
        assert_eq!(job.release_child(), Err(JobError::CounterUnderflow(job.id())));
        assert_eq!(job.pending_children(), 0);
    }

    #[test]
    fn test_children_counter_concurrent_single_zero_crossing() {
        use std::thread;

        for _ in 0..50 {
            let job = create_test_job();
            job.add_children(8);

            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let job = job.clone();
                    thread::spawn(move || job.release_child().unwrap())
                })
                .collect();

            let crossings = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|last| *last)
                .count();
            assert_eq!(crossings, 1);
        }
    }

    #[test]
    fn test_parent_link_is_weak() {
        let parent = create_test_job();
        let child = create_test_job();
        child.set_parent(&parent);

        assert_eq!(child.parent_id(), Some(parent.id()));
        assert_eq!(child.parent().unwrap().unwrap().id(), parent.id());

        let parent_id = parent.id();
        drop(parent);
        assert_eq!(
            child.parent().unwrap_err(),
            JobError::DanglingChild {
                child: child.id(),
                parent: parent_id,
            }
        );
    }

    #[test]
    fn test_claim_parent_once() {
        let first = create_test_job();
        let second = create_test_job();
        let child = create_test_job();

        assert!(child.claim_parent(&first));
        assert!(!child.claim_parent(&second));
        assert_eq!(child.parent_id(), Some(first.id()));

        assert_eq!(child.take_parent().unwrap().map(|p| p.id()), Some(first.id()));
        assert_eq!(child.parent_id(), None);
        assert!(child.claim_parent(&second));
    }

    #[test]
    fn test_parked_flag_consumed_once() {
        let job = create_test_job();
        assert!(!job.take_parked());
        job.set_parked();
        assert!(job.take_parked());
        assert!(!job.take_parked());
    }

    #[test]
    fn test_duplicate_continuation() {
        let job = create_test_job();
        job.set_continuation(create_test_job()).unwrap();
        assert!(job.has_continuation());

        let second = create_test_job();
        let second_id = second.id();
        let refused = job.set_continuation(second).unwrap_err();
        assert_eq!(refused.id(), second_id);

        assert!(job.take_continuation().is_some());
        assert!(!job.has_continuation());
    }

    #[test]
    fn test_job_state_transitions() {
        let job = create_test_job();

        job.set_state(JobState::Queued);
        assert_eq!(job.state(), JobState::Queued);

        job.set_state(JobState::Running);
        assert_eq!(job.state(), JobState::Running);

        job.set_state(JobState::Waiting);
        assert_eq!(job.state(), JobState::Waiting);

        job.set_state(JobState::Finished);
        assert_eq!(job.state(), JobState::Finished);
    }

    #[test]
    fn test_deallocate_drops_payload() {
        let job = create_test_job();
        job.deallocate(JobError::Discarded(job.id()));
        assert!(job.take_payload().is_none());
    }

    fn noop(_: &JobContext<'_>) {}

    #[test]
    fn test_fn_item_is_schedulable() {
        let job = Schedulable::into_job(noop).unwrap();
        assert_eq!(job.kind(), JobKind::Function);
        assert_eq!(job.state(), JobState::Created);
    }
}
