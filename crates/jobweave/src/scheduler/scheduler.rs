//! Job system coordinating worker threads

use crate::config::JobSystemConfig;
use crate::scheduler::context;
use crate::scheduler::deque::{InjectorQueue, JobQueue, QueueStealer, Rejected};
use crate::scheduler::job::{Job, JobHandle, JobId, JobKind, JobState, JobType, Schedulable, Tag};
use crate::scheduler::worker::Worker;
use crate::trace::{ExecutionTrace, TraceEvent, TraceKind};
use crate::{JobError, JobResult};
use crossbeam::sync::{Parker, Unparker};
use crossbeam::utils::CachePadded;
use crossbeam_deque::Injector;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::BuildHasherDefault;
use std::path::Path;
use std::sync::atomic::{self, AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

static NEXT_SYSTEM_ID: AtomicU64 = AtomicU64::new(1);

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Jobs admitted to a queue (including continuations and released tag jobs)
    pub jobs_scheduled: u64,

    /// Jobs that finished, children included
    pub jobs_completed: u64,

    /// Jobs taken from another worker's deque
    pub jobs_stolen: u64,

    /// Continuations scheduled
    pub continuations: u64,

    /// Job bodies that panicked
    pub panics: u64,

    /// Jobs dropped at shutdown without running
    pub discarded: u64,

    /// Admissions rejected because every candidate queue was full
    pub rejections: u64,

    /// Broken-graph conditions observed (dangling child, counter underflow)
    pub invariant_violations: u64,

    /// Jobs currently in flight
    pub active_jobs: usize,
}

#[derive(Default)]
struct Counters {
    scheduled: AtomicU64,
    completed: AtomicU64,
    stolen: AtomicU64,
    continuations: AtomicU64,
    panics: AtomicU64,
    discarded: AtomicU64,
    rejections: AtomicU64,
    invariant_violations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// What was left behind when the job system stopped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Queued or tag-parked jobs dropped without running
    pub discarded: Vec<JobId>,

    /// Jobs that had started but were suspended or waiting for children
    pub suspended: Vec<JobId>,
}

type Registry = DashMap<JobId, Arc<Job>, BuildHasherDefault<FxHasher>>;

/// State shared between the job system handle, its workers and job contexts
pub(crate) struct Shared {
    id: u64,
    config: JobSystemConfig,
    thread_count: usize,

    /// Bounded queue for jobs submitted outside the pool
    global: InjectorQueue<Arc<Job>>,

    /// Bounded per-worker inboxes for jobs with thread affinity
    pinned: Vec<InjectorQueue<Arc<Job>>>,

    /// Per-worker overflow for re-queued jobs that found their queue full
    spill: Vec<Injector<Arc<Job>>>,

    /// Steal handles for every worker deque
    stealers: Vec<QueueStealer<Arc<Job>>>,

    unparkers: Vec<Unparker>,
    idle: Vec<CachePadded<AtomicBool>>,
    next_spill: AtomicUsize,

    /// In-flight jobs, from admission until they finish
    registry: Registry,

    /// Jobs parked until their tag is released
    tags: Mutex<FxHashMap<Tag, Vec<Arc<Job>>>>,

    /// Jobs dropped at shutdown
    discarded: Mutex<Vec<JobId>>,

    terminating: AtomicBool,

    /// Read-held while a job is being admitted, write-held by `drain`
    admission: RwLock<()>,

    drained: Mutex<()>,
    drained_cv: Condvar,

    counters: Counters,
    trace: ExecutionTrace,
}

impl Shared {
    pub(crate) fn system_id(&self) -> u64 {
        self.id
    }

    pub(crate) fn thread_count(&self) -> usize {
        self.thread_count
    }

    pub(crate) fn config(&self) -> &JobSystemConfig {
        &self.config
    }

    pub(crate) fn trace(&self) -> &ExecutionTrace {
        &self.trace
    }

    pub(crate) fn is_terminating(&self) -> bool {
        self.terminating.load(Ordering::Acquire)
    }

    fn check_admission(&self, job: &Job) -> JobResult<()> {
        if self.is_terminating() {
            return Err(JobError::ShuttingDown);
        }
        self.check_thread(job.affinity())
    }

    pub(crate) fn check_thread(&self, thread: Option<usize>) -> JobResult<()> {
        match thread {
            Some(index) if index >= self.thread_count => Err(JobError::InvalidThreadIndex {
                index,
                count: self.thread_count,
            }),
            _ => Ok(()),
        }
    }

    /// Admit a new job, optionally as a child of `parent`
    ///
    /// The parent's counter is raised before the job becomes visible to any
    /// queue. With `precounted` the caller has already raised it; on failure
    /// the slot is released either way.
    pub(crate) fn admit(
        &self,
        job: Arc<Job>,
        parent: Option<&Arc<Job>>,
        precounted: bool,
    ) -> JobResult<JobId> {
        let id = job.id();
        let _open = self.admission.read();
        if let Err(e) = self.check_admission(&job) {
            if let (true, Some(parent)) = (precounted, parent) {
                self.child_finished(parent);
            }
            job.deallocate(e.clone());
            return Err(e);
        }

        if let Some(parent) = parent {
            job.set_parent(parent);
            if !precounted {
                parent.add_children(1);
            }
        }

        job.set_state(JobState::Queued);
        self.registry.insert(id, job.clone());

        match self.place(job) {
            Ok(()) => {
                Counters::bump(&self.counters.scheduled);
                trace!(job = %id, parent = ?parent.map(|p| p.id()), "job scheduled");
                Ok(id)
            }
            Err(rejected) => {
                let error = JobError::QueueFull {
                    capacity: rejected.capacity,
                };
                warn!(job = %id, capacity = rejected.capacity, "queue full, job rejected");
                Counters::bump(&self.counters.rejections);
                rejected.item.deallocate(error.clone());
                self.unregister(id);
                if let Some(parent) = parent {
                    self.child_finished(parent);
                }
                Err(error)
            }
        }
    }

    /// Placement for new jobs: pinned inbox, own deque, then the global queue
    fn place(&self, job: Arc<Job>) -> Result<(), Rejected<Arc<Job>>> {
        if let Some(thread) = job.affinity() {
            self.pinned[thread].push(job)?;
            self.notify(thread);
            return Ok(());
        }

        let job = match context::push_local(self.id, job) {
            Ok(_) => {
                self.notify_any();
                return Ok(());
            }
            Err(job) => job,
        };

        self.global.push(job)?;
        self.notify_any();
        Ok(())
    }

    /// Re-queue an admitted job (resumed coroutine, continuation, released tag job)
    ///
    /// Never rejects: a full target spills into a worker's unbounded list.
    pub(crate) fn requeue(&self, job: Arc<Job>) {
        job.set_state(JobState::Queued);
        let yielded = job.take_yielded();

        if let Some(thread) = job.affinity().filter(|&t| t < self.thread_count) {
            if let Err(rejected) = self.pinned[thread].push(job) {
                self.spill[thread].push(rejected.item);
            }
            self.notify(thread);
            return;
        }

        let job = if yielded {
            job
        } else {
            match context::push_local(self.id, job) {
                Ok(_) => {
                    self.notify_any();
                    return;
                }
                Err(job) => job,
            }
        };

        if let Err(rejected) = self.global.push(job) {
            let target = context::worker_index(self.id).unwrap_or_else(|| {
                self.next_spill.fetch_add(1, Ordering::Relaxed) % self.thread_count
            });
            debug!(job = %rejected.item.id(), worker = target, "global queue full, spilling");
            self.spill[target].push(rejected.item);
            self.notify(target);
            return;
        }
        self.notify_any();
    }

    /// Release one pending-children slot of `job`
    ///
    /// Exactly one caller observes the zero crossing. A suspended coroutine is
    /// then resumed, a generator that yielded hands control to its parent, and
    /// anything else finishes.
    pub(crate) fn child_finished(&self, job: &Arc<Job>) {
        match job.release_child() {
            Ok(false) => {}
            Ok(true) => {
                if job.kind() == JobKind::Coroutine && !job.is_completed() {
                    if job.take_parked() {
                        self.on_yielded(job);
                    } else {
                        trace!(job = %job.id(), "resuming coroutine");
                        self.requeue(job.clone());
                    }
                } else {
                    self.on_finished(job);
                }
            }
            Err(e) => self.invariant_violation(&e),
        }
    }

    /// Body and children are done: fire the continuation, notify the parent
    fn on_finished(&self, job: &Arc<Job>) {
        job.set_state(JobState::Finished);

        let parent = job.parent().unwrap_or_else(|e| {
            self.invariant_violation(&e);
            None
        });

        if let Some(next) = job.take_continuation() {
            if let Some(parent) = &parent {
                next.set_parent(parent);
                parent.add_children(1);
            }
            self.registry.insert(next.id(), next.clone());
            Counters::bump(&self.counters.continuations);
            Counters::bump(&self.counters.scheduled);
            self.record_instant(&next, TraceKind::Continuation);
            trace!(job = %job.id(), continuation = %next.id(), "scheduling continuation");
            self.requeue(next);
        }

        if let Some(parent) = parent {
            self.child_finished(&parent);
        }

        Counters::bump(&self.counters.completed);
        self.unregister(job.id());
    }

    /// A generator produced a value: leave the registry and release the parent
    ///
    /// The generator's handle keeps the job alive until it is resumed again.
    /// The parent link is dropped last; a new claim may re-admit the job
    /// right after.
    fn on_yielded(&self, job: &Arc<Job>) {
        trace!(job = %job.id(), "generator yielded");
        self.unregister(job.id());
        job.set_state(JobState::Yielded);
        let parent = job.take_parent().unwrap_or_else(|e| {
            self.invariant_violation(&e);
            None
        });
        if let Some(parent) = parent {
            self.child_finished(&parent);
        }
    }

    /// Re-admit a yielded generator whose parent already claimed it
    pub(crate) fn resume_parked(&self, job: Arc<Job>) -> JobResult<()> {
        let _open = self.admission.read();
        if self.is_terminating() {
            let _ = job.take_parent();
            return Err(JobError::ShuttingDown);
        }
        self.registry.insert(job.id(), job.clone());
        Counters::bump(&self.counters.scheduled);
        trace!(job = %job.id(), parent = ?job.parent_id(), "resuming generator");
        self.requeue(job);
        Ok(())
    }

    pub(crate) fn set_continuation(&self, job: &Arc<Job>, next: Arc<Job>) -> JobResult<JobId> {
        let _open = self.admission.read();
        if let Err(e) = self.check_admission(&next) {
            next.deallocate(e.clone());
            return Err(e);
        }
        let id = next.id();
        if let Err(refused) = job.set_continuation(next) {
            let error = JobError::DuplicateContinuation(job.id());
            refused.deallocate(error.clone());
            return Err(error);
        }
        Ok(id)
    }

    pub(crate) fn park_tagged(&self, job: Arc<Job>, tag: Tag) -> JobResult<JobId> {
        let _open = self.admission.read();
        if let Err(e) = self.check_admission(&job) {
            job.deallocate(e.clone());
            return Err(e);
        }
        let id = job.id();
        job.set_state(JobState::Queued);
        self.tags.lock().entry(tag).or_default().push(job);
        trace!(job = %id, tag = tag.0, "job parked under tag");
        Ok(id)
    }

    /// Schedule every job parked under `tag`, as children of `parent` if given
    pub(crate) fn release_tag(&self, tag: Tag, parent: Option<&Arc<Job>>) -> JobResult<usize> {
        let _open = self.admission.read();
        if self.is_terminating() {
            return Err(JobError::ShuttingDown);
        }
        let jobs = self.tags.lock().remove(&tag).unwrap_or_default();
        let count = jobs.len();
        if let Some(parent) = parent {
            parent.add_children(count);
        }
        for job in jobs {
            if let Some(parent) = parent {
                job.set_parent(parent);
            }
            self.registry.insert(job.id(), job.clone());
            Counters::bump(&self.counters.scheduled);
            self.requeue(job);
        }
        debug!(tag = tag.0, count, "tag released");
        Ok(count)
    }

    pub(crate) fn job_panicked(&self, job: &Job, message: String) {
        error!(job = %job.id(), "job panicked: {}", message);
        Counters::bump(&self.counters.panics);
        if let Some(sink) = job.take_sink() {
            sink.fail(JobError::Panicked(message));
        }
    }

    pub(crate) fn job_stolen(&self, thief: usize, victim: usize, job: &Job) {
        Counters::bump(&self.counters.stolen);
        trace!(job = %job.id(), thief, victim, "job stolen");
        self.record_instant(job, TraceKind::Steal { victim });
    }

    fn invariant_violation(&self, error: &JobError) {
        error!("job graph invariant violated: {}", error);
        Counters::bump(&self.counters.invariant_violations);
    }

    /// Drop a job that will never run, along with its continuation chain
    pub(crate) fn discard(&self, job: Arc<Job>) {
        let id = job.id();
        job.set_state(JobState::Discarded);
        job.deallocate(JobError::Discarded(id));
        Counters::bump(&self.counters.discarded);
        self.record_instant(&job, TraceKind::Discard);
        self.discarded.lock().push(id);
        self.unregister(id);
        self.discard_continuations(&job);
    }

    /// Continuations were never admitted, so they are only reported here
    fn discard_continuations(&self, job: &Job) {
        let mut next = job.take_continuation();
        while let Some(continuation) = next {
            next = continuation.take_continuation();
            let id = continuation.id();
            continuation.set_state(JobState::Discarded);
            continuation.deallocate(JobError::Discarded(id));
            Counters::bump(&self.counters.discarded);
            self.record_instant(&continuation, TraceKind::Discard);
            self.discarded.lock().push(id);
        }
    }

    fn unregister(&self, id: JobId) {
        self.registry.remove(&id);
        if self.registry.is_empty() {
            let _guard = self.drained.lock();
            self.drained_cv.notify_all();
        }
    }

    /// Record a job dispatch on `thread` that began at `start`
    pub(crate) fn record_run(&self, thread: usize, job: &Job, start: Duration, finished: bool) {
        if !self.trace.is_enabled() {
            return;
        }
        self.trace.record(TraceEvent {
            start,
            end: self.trace.now(),
            thread: Some(thread),
            job: job.id(),
            job_type: job.job_type(),
            label: job.label(),
            kind: TraceKind::Run { finished },
        });
    }

    fn record_instant(&self, job: &Job, kind: TraceKind) {
        if !self.trace.is_enabled() {
            return;
        }
        let now = self.trace.now();
        self.trace.record(TraceEvent {
            start: now,
            end: now,
            thread: context::worker_index(self.id),
            job: job.id(),
            job_type: job.job_type(),
            label: job.label(),
            kind,
        });
    }

    /// Wake worker `index`
    pub(crate) fn notify(&self, index: usize) {
        if let Some(unparker) = self.unparkers.get(index) {
            unparker.unpark();
        }
    }

    /// Wake one idle worker other than the caller
    fn notify_any(&self) {
        atomic::fence(Ordering::SeqCst);
        let me = context::worker_index(self.id);
        if let Some(index) = (0..self.thread_count)
            .filter(|&i| Some(i) != me)
            .find(|&i| self.idle[i].load(Ordering::SeqCst))
        {
            self.notify(index);
        }
    }

    pub(crate) fn set_idle(&self, index: usize, idle: bool) {
        self.idle[index].store(idle, Ordering::SeqCst);
        atomic::fence(Ordering::SeqCst);
    }

    pub(crate) fn steal_spill(&self, index: usize) -> Option<Arc<Job>> {
        loop {
            match self.spill[index].steal() {
                crossbeam_deque::Steal::Success(job) => return Some(job),
                crossbeam_deque::Steal::Empty => return None,
                crossbeam_deque::Steal::Retry => continue,
            }
        }
    }

    pub(crate) fn steal_pinned(&self, index: usize) -> Option<Arc<Job>> {
        self.pinned[index].steal()
    }

    pub(crate) fn steal_global(&self) -> Option<Arc<Job>> {
        self.global.steal()
    }

    pub(crate) fn stealers(&self) -> &[QueueStealer<Arc<Job>>] {
        &self.stealers
    }

    /// Whether worker `index` could find anything in a sweep
    pub(crate) fn has_work_for(&self, index: usize) -> bool {
        !self.spill[index].is_empty()
            || !self.pinned[index].is_empty()
            || !self.global.is_empty()
            || self.stealers.iter().any(|stealer| !stealer.is_empty())
    }

    pub(crate) fn terminate(&self) {
        if !self.terminating.swap(true, Ordering::AcqRel) {
            debug!(system = self.id, "termination requested");
        }
        for unparker in &self.unparkers {
            unparker.unpark();
        }
    }

    /// Discard everything still queued after the workers have stopped
    ///
    /// Waits for admissions already past the termination check; later ones
    /// see the flag and are refused.
    fn drain(&self) -> ShutdownReport {
        let _closed = self.admission.write();
        let mut queued = self.global.clear();
        for index in 0..self.thread_count {
            queued.extend(self.pinned[index].clear());
            while let Some(job) = self.steal_spill(index) {
                queued.push(job);
            }
        }
        for stealer in &self.stealers {
            while let Some(job) = stealer.steal() {
                queued.push(job);
            }
        }
        let parked: Vec<Arc<Job>> = self.tags.lock().drain().flat_map(|(_, jobs)| jobs).collect();

        for job in queued.into_iter().chain(parked) {
            self.discard(job);
        }

        let leftover: Vec<Arc<Job>> = self.registry.iter().map(|e| e.value().clone()).collect();
        let mut suspended: Vec<JobId> = leftover.iter().map(|job| job.id()).collect();
        for job in leftover {
            job.deallocate(JobError::ShuttingDown);
            self.discard_continuations(&job);
            self.unregister(job.id());
        }

        let mut discarded = std::mem::take(&mut *self.discarded.lock());
        discarded.sort();
        suspended.sort();
        ShutdownReport {
            discarded,
            suspended,
        }
    }

    fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.drained.lock();
        while !self.registry.is_empty() {
            if self.drained_cv.wait_until(&mut guard, deadline).timed_out() {
                return self.registry.is_empty();
            }
        }
        true
    }

    fn stats(&self) -> SchedulerStats {
        let c = &self.counters;
        SchedulerStats {
            jobs_scheduled: c.scheduled.load(Ordering::Relaxed),
            jobs_completed: c.completed.load(Ordering::Relaxed),
            jobs_stolen: c.stolen.load(Ordering::Relaxed),
            continuations: c.continuations.load(Ordering::Relaxed),
            panics: c.panics.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            rejections: c.rejections.load(Ordering::Relaxed),
            invariant_violations: c.invariant_violations.load(Ordering::Relaxed),
            active_jobs: self.registry.len(),
        }
    }
}

/// Build the shared state and one (unstarted) worker per thread
pub(crate) fn build_pool(config: JobSystemConfig) -> (Arc<Shared>, Vec<Worker>) {
    let thread_count = config.resolved_thread_count();
    let capacity = config.queue_capacity;

    let mut queues = Vec::with_capacity(thread_count);
    let mut stealers = Vec::with_capacity(thread_count);
    let mut parkers = Vec::with_capacity(thread_count);
    let mut unparkers = Vec::with_capacity(thread_count);

    for _ in 0..thread_count {
        let queue = JobQueue::new(capacity);
        stealers.push(queue.stealer());
        queues.push(queue);

        let parker = Parker::new();
        unparkers.push(parker.unparker().clone());
        parkers.push(parker);
    }

    let shared = Arc::new(Shared {
        id: NEXT_SYSTEM_ID.fetch_add(1, Ordering::Relaxed),
        thread_count,
        global: InjectorQueue::new(capacity),
        pinned: (0..thread_count).map(|_| InjectorQueue::new(capacity)).collect(),
        spill: (0..thread_count).map(|_| Injector::new()).collect(),
        stealers,
        unparkers,
        idle: (0..thread_count)
            .map(|_| CachePadded::new(AtomicBool::new(false)))
            .collect(),
        next_spill: AtomicUsize::new(0),
        registry: DashMap::with_hasher(BuildHasherDefault::default()),
        tags: Mutex::new(FxHashMap::default()),
        discarded: Mutex::new(Vec::new()),
        terminating: AtomicBool::new(false),
        admission: RwLock::new(()),
        drained: Mutex::new(()),
        drained_cv: Condvar::new(),
        counters: Counters::default(),
        trace: ExecutionTrace::new(thread_count, config.logging),
        config,
    });

    let workers = queues
        .into_iter()
        .zip(parkers)
        .enumerate()
        .map(|(index, (queue, parker))| Worker::new(index, shared.clone(), queue, parker))
        .collect();

    (shared, workers)
}

/// Work-stealing job system
///
/// Jobs scheduled here have no parent. Jobs scheduled through a
/// [`JobContext`](crate::JobContext) or [`CoroContext`](crate::CoroContext)
/// are children of the job doing the scheduling.
pub struct JobSystem {
    /// Worker threads
    workers: Vec<Worker>,

    /// Queues, registry and counters shared with the workers
    shared: Arc<Shared>,

    /// Whether the workers have been started
    started: bool,

    /// Set once the workers have been joined and the queues drained
    report: Option<ShutdownReport>,
}

impl JobSystem {
    /// Create a job system with `thread_count` workers (0 = one per CPU core)
    ///
    /// Workers do not run until [`start`](Self::start) is called.
    pub fn new(thread_count: usize) -> Self {
        let (shared, workers) = build_pool(JobSystemConfig::new(thread_count));
        Self {
            workers,
            shared,
            started: false,
            report: None,
        }
    }

    /// Create a job system from a validated configuration
    pub fn with_config(config: JobSystemConfig) -> JobResult<Self> {
        config.validate()?;
        let (shared, workers) = build_pool(config);
        Ok(Self {
            workers,
            shared,
            started: false,
            report: None,
        })
    }

    /// Start all worker threads
    pub fn start(&mut self) -> JobResult<()> {
        if self.started {
            return Ok(());
        }
        if self.shared.is_terminating() {
            return Err(JobError::ShuttingDown);
        }
        for worker in &mut self.workers {
            worker.start()?;
        }
        self.started = true;
        info!(
            system = self.shared.id,
            workers = self.workers.len(),
            "job system started"
        );
        Ok(())
    }

    /// Schedule a job with no parent
    pub fn schedule<S: Schedulable>(&self, job: S) -> JobResult<JobId> {
        self.shared.admit(job.into_job()?, None, false)
    }

    /// Schedule a job pinned to worker `thread`
    pub fn schedule_on<S: Schedulable>(&self, job: S, thread: usize) -> JobResult<JobId> {
        let job = job.into_job()?;
        job.set_affinity(Some(thread));
        self.shared.admit(job, None, false)
    }

    /// Park a job under `tag` until [`schedule_tag`](Self::schedule_tag) releases it
    pub fn schedule_tagged<S: Schedulable>(&self, job: S, tag: Tag) -> JobResult<JobId> {
        self.shared.park_tagged(job.into_job()?, tag)
    }

    /// Schedule every job parked under `tag`; returns how many were released
    pub fn schedule_tag(&self, tag: Tag) -> JobResult<usize> {
        self.shared.release_tag(tag, None)
    }

    /// Job the calling worker is executing, if any
    pub fn current_job() -> Option<JobHandle> {
        context::current_job()
    }

    /// Index of the calling thread if it is one of this system's workers
    pub fn thread_index(&self) -> Option<usize> {
        context::worker_index(self.shared.id)
    }

    /// Number of workers
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Configuration the system was built with
    pub fn config(&self) -> &JobSystemConfig {
        self.shared.config()
    }

    /// Check if the workers have been started
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Number of worker threads still running
    pub fn running_workers(&self) -> usize {
        self.workers.iter().filter(|worker| worker.is_running()).count()
    }

    /// Start recording execution trace events
    pub fn enable_logging(&self) {
        self.shared.trace.enable();
    }

    /// Stop recording execution trace events
    pub fn disable_logging(&self) {
        self.shared.trace.disable();
    }

    /// Whether trace events are being recorded
    pub fn is_logging(&self) -> bool {
        self.shared.trace.is_enabled()
    }

    /// Name shown for `job_type` in exported traces
    pub fn set_type_name(&self, job_type: JobType, name: impl Into<String>) {
        self.shared.trace.set_type_name(job_type, name);
    }

    /// Drop all recorded trace events
    pub fn clear_logs(&self) {
        self.shared.trace.clear();
    }

    /// The execution trace
    pub fn trace(&self) -> &ExecutionTrace {
        &self.shared.trace
    }

    /// Write the trace as Chrome tracing JSON, then clear it
    pub fn save_trace(&self, path: impl AsRef<Path>) -> JobResult<()> {
        self.shared.trace.save(path.as_ref())
    }

    /// Wait until no job is in flight (tag-parked jobs do not count)
    pub fn wait_all(&self, timeout: Duration) -> bool {
        self.shared.wait_drained(timeout)
    }

    /// Get scheduler statistics
    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats()
    }

    /// Ask the workers to stop after their current job
    ///
    /// New submissions fail with `ShuttingDown` from here on.
    pub fn terminate(&self) {
        self.shared.terminate();
    }

    /// Block until the workers have stopped, then discard what is left
    ///
    /// Only returns after [`terminate`](Self::terminate) was called, here or
    /// from a job.
    pub fn wait_for_termination(&mut self) -> ShutdownReport {
        if let Some(report) = &self.report {
            return report.clone();
        }

        for worker in &mut self.workers {
            worker.join();
        }

        let report = self.shared.drain();
        info!(
            system = self.shared.id,
            discarded = report.discarded.len(),
            suspended = report.suspended.len(),
            "job system stopped"
        );

        if let (Some(path), true) = (&self.shared.config.trace_path, self.is_logging()) {
            if let Err(e) = self.shared.trace.save(path) {
                warn!(path = %path.display(), "failed to save execution trace: {}", e);
            }
        }

        self.started = false;
        self.report = Some(report.clone());
        report
    }

    /// Terminate and wait for the workers
    pub fn shutdown(&mut self) -> ShutdownReport {
        self.terminate();
        self.wait_for_termination()
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        if self.report.is_none() {
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for JobSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobSystem")
            .field("workers", &self.workers.len())
            .field("started", &self.started)
            .field("stats", &self.stats())
            .finish()
    }
}
