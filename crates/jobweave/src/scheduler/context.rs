//! Job-facing context and the worker thread binding
//!
//! Every worker binds its deque and a stack of the jobs it is executing to a
//! thread-local slot. Job bodies get the same information explicitly through
//! [`JobContext`].

use crate::scheduler::deque::JobQueue;
use crate::scheduler::job::{Job, JobId, Schedulable, Tag};
use crate::scheduler::scheduler::Shared;
use crate::JobResult;
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

struct WorkerBinding {
    system: u64,
    index: usize,
    queue: Rc<JobQueue<Arc<Job>>>,
    current: Vec<Arc<Job>>,
}

thread_local! {
    static WORKER: RefCell<Option<WorkerBinding>> = const { RefCell::new(None) };
}

/// Bind the calling thread as worker `index` of `system`
pub(crate) fn bind(system: u64, index: usize, queue: Rc<JobQueue<Arc<Job>>>) {
    WORKER.with(|slot| {
        *slot.borrow_mut() = Some(WorkerBinding {
            system,
            index,
            queue,
            current: Vec::new(),
        });
    });
}

pub(crate) fn unbind() {
    let binding = WORKER.with(|slot| slot.borrow_mut().take());
    drop(binding);
}

/// Index of the calling worker within `system`
pub(crate) fn worker_index(system: u64) -> Option<usize> {
    WORKER.with(|slot| {
        slot.borrow()
            .as_ref()
            .filter(|binding| binding.system == system)
            .map(|binding| binding.index)
    })
}

/// Push onto the calling worker's own deque
///
/// Returns the job back when the caller is not a worker of `system` or the
/// deque is full.
pub(crate) fn push_local(system: u64, job: Arc<Job>) -> Result<usize, Arc<Job>> {
    WORKER.with(|slot| match slot.borrow().as_ref() {
        Some(binding) if binding.system == system => binding
            .queue
            .push(job)
            .map(|()| binding.index)
            .map_err(|rejected| rejected.item),
        _ => Err(job),
    })
}

pub(crate) fn enter_job(job: Arc<Job>) {
    WORKER.with(|slot| {
        if let Some(binding) = slot.borrow_mut().as_mut() {
            binding.current.push(job);
        }
    });
}

pub(crate) fn leave_job() {
    let job = WORKER.with(|slot| {
        slot.borrow_mut()
            .as_mut()
            .and_then(|binding| binding.current.pop())
    });
    // Dropped outside the borrow; a last reference may run arbitrary destructors
    drop(job);
}

/// Job on top of the calling worker's current-job stack
pub(crate) fn current_job() -> Option<Arc<Job>> {
    WORKER.with(|slot| {
        slot.borrow()
            .as_ref()
            .and_then(|binding| binding.current.last().cloned())
    })
}

/// Handle passed to a plain job's body
///
/// Everything scheduled through `schedule` becomes a child of the running job:
/// the job only finishes, and its continuation only runs, after those children
/// have finished.
pub struct JobContext<'a> {
    shared: &'a Arc<Shared>,
    job: &'a Arc<Job>,
}

impl<'a> JobContext<'a> {
    pub(crate) fn new(shared: &'a Arc<Shared>, job: &'a Arc<Job>) -> Self {
        Self { shared, job }
    }

    /// The running job
    pub fn current_job(&self) -> &Arc<Job> {
        self.job
    }

    /// ID of the running job
    pub fn job_id(&self) -> JobId {
        self.job.id()
    }

    /// Index of the worker running this job
    pub fn thread_index(&self) -> Option<usize> {
        worker_index(self.shared.system_id())
    }

    /// Number of workers in the pool
    pub fn thread_count(&self) -> usize {
        self.shared.thread_count()
    }

    /// Schedule a child of the running job
    pub fn schedule<S: Schedulable>(&self, job: S) -> JobResult<JobId> {
        self.shared.admit(job.into_job()?, Some(self.job), false)
    }

    /// Schedule a job with no parent
    pub fn schedule_detached<S: Schedulable>(&self, job: S) -> JobResult<JobId> {
        self.shared.admit(job.into_job()?, None, false)
    }

    /// Park a job under `tag` until the tag is released
    pub fn schedule_tagged<S: Schedulable>(&self, job: S, tag: Tag) -> JobResult<JobId> {
        self.shared.park_tagged(job.into_job()?, tag)
    }

    /// Release the jobs parked under `tag` as children of the running job
    pub fn schedule_tag(&self, tag: Tag) -> JobResult<usize> {
        self.shared.release_tag(tag, Some(self.job))
    }

    /// Run `job` after the running job and all its children have finished
    pub fn continuation<S: Schedulable>(&self, job: S) -> JobResult<JobId> {
        self.shared.set_continuation(self.job, job.into_job()?)
    }

    /// Ask the job system to stop after the current jobs
    pub fn terminate(&self) {
        self.shared.terminate();
    }
}

impl std::fmt::Debug for JobContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job", &self.job.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Function;

    #[test]
    fn test_unbound_thread() {
        assert_eq!(worker_index(1), None);
        assert!(current_job().is_none());

        let job = Function::new(|_| {}).into_job();
        assert!(push_local(1, job).is_err());
    }

    #[test]
    fn test_binding_and_current_job_stack() {
        let queue = Rc::new(JobQueue::new(2));
        bind(42, 3, Rc::clone(&queue));

        assert_eq!(worker_index(42), Some(3));
        assert_eq!(worker_index(7), None);

        let outer = Function::new(|_| {}).into_job();
        let inner = Function::new(|_| {}).into_job();
        enter_job(outer.clone());
        enter_job(inner.clone());
        assert_eq!(current_job().map(|j| j.id()), Some(inner.id()));
        leave_job();
        assert_eq!(current_job().map(|j| j.id()), Some(outer.id()));
        leave_job();
        assert!(current_job().is_none());

        assert_eq!(push_local(42, Function::new(|_| {}).into_job()).ok(), Some(3));
        assert_eq!(push_local(42, Function::new(|_| {}).into_job()).ok(), Some(3));
        // Full deque hands the job back
        assert!(push_local(42, Function::new(|_| {}).into_job()).is_err());
        assert_eq!(queue.len(), 2);

        unbind();
        assert_eq!(worker_index(42), None);
    }
}
