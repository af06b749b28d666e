//! Worker thread that executes Jobs
//!
//! Workers take jobs from their spill list, their pinned inbox, their own deque
//! and the global queue, then steal from siblings. A worker that finds nothing
//! spins briefly and then parks until a push wakes it or the park times out.

use crate::coro::{coro_deallocator, CoroContext};
use crate::scheduler::context::{self, JobContext};
use crate::scheduler::deque::JobQueue;
use crate::scheduler::job::{CoroFrame, Job, JobState, Payload};
use crate::scheduler::scheduler::Shared;
use crate::JobResult;
use crossbeam::sync::Parker;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::Duration;
use tracing::{debug, error};

/// Empty sweeps before a worker parks
const SPIN_LIMIT: u32 = 32;

/// Worker thread that executes Jobs
pub(crate) struct Worker {
    /// Worker ID
    index: usize,

    /// Shared job system state
    shared: Arc<Shared>,

    /// Own deque and parker, moved into the thread on start
    local: Option<(JobQueue<Arc<Job>>, Parker)>,

    /// Worker thread handle
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    /// Create a new Worker
    pub(crate) fn new(
        index: usize,
        shared: Arc<Shared>,
        queue: JobQueue<Arc<Job>>,
        parker: Parker,
    ) -> Self {
        Self {
            index,
            shared,
            local: Some((queue, parker)),
            handle: None,
        }
    }

    /// Start the worker thread
    pub(crate) fn start(&mut self) -> JobResult<()> {
        let Some((queue, parker)) = self.local.take() else {
            return Ok(());
        };
        let index = self.index;
        let shared = self.shared.clone();
        let name = format!("{}-{}", shared.config().thread_name_prefix, index);

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || Worker::run_loop(index, queue, parker, shared))?;

        self.handle = Some(handle);
        Ok(())
    }

    /// Wait for the worker thread to exit
    ///
    /// A worker that was never started discards its queued jobs here.
    pub(crate) fn join(&mut self) {
        if let Some((queue, _)) = self.local.take() {
            for job in queue.clear() {
                self.shared.discard(job);
            }
        }

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(worker = self.index, "worker thread panicked");
            }
        }
    }

    /// Check if the worker is running
    pub(crate) fn is_running(&self) -> bool {
        self.handle.is_some() && !self.shared.is_terminating()
    }

    /// Worker thread main loop
    fn run_loop(index: usize, queue: JobQueue<Arc<Job>>, parker: Parker, shared: Arc<Shared>) {
        let queue = Rc::new(queue);
        context::bind(shared.system_id(), index, Rc::clone(&queue));
        let park_timeout = Duration::from_micros(shared.config().park_timeout_us);
        debug!(worker = index, "worker started");

        let mut empty_sweeps = 0;
        loop {
            if shared.is_terminating() {
                break;
            }

            if let Some(job) = Self::find_work(index, &queue, &shared) {
                empty_sweeps = 0;
                Self::execute(index, &shared, job);
                continue;
            }

            empty_sweeps += 1;
            if empty_sweeps < SPIN_LIMIT {
                thread::yield_now();
                continue;
            }

            shared.set_idle(index, true);
            if !queue.is_empty() || shared.has_work_for(index) || shared.is_terminating() {
                shared.set_idle(index, false);
                continue;
            }
            parker.park_timeout(park_timeout);
            shared.set_idle(index, false);
            empty_sweeps = 0;
        }

        for job in queue.clear() {
            shared.discard(job);
        }
        context::unbind();
        debug!(worker = index, "worker stopped");
    }

    /// Find work: spill list, pinned inbox, own deque, global queue, then steal
    fn find_work(index: usize, queue: &JobQueue<Arc<Job>>, shared: &Shared) -> Option<Arc<Job>> {
        if let Some(job) = shared.steal_spill(index) {
            return Some(job);
        }
        if let Some(job) = shared.steal_pinned(index) {
            return Some(job);
        }
        if let Some(job) = queue.pop() {
            return Some(job);
        }
        if let Some(job) = shared.steal_global() {
            return Some(job);
        }
        Self::steal_from_others(index, shared)
    }

    /// Steal from other workers
    fn steal_from_others(index: usize, shared: &Shared) -> Option<Arc<Job>> {
        use rand::Rng;

        let stealers = shared.stealers();
        if stealers.len() < 2 {
            return None;
        }

        // Randomly select the first victim
        let start = rand::thread_rng().gen_range(0..stealers.len());

        for i in 0..stealers.len() {
            let victim = (start + i) % stealers.len();
            if victim == index {
                continue;
            }
            if let Some(job) = stealers[victim].steal() {
                shared.job_stolen(index, victim, &job);
                return Some(job);
            }
        }

        None
    }

    /// Run one dispatch of `job`, then release the slot it held on itself
    fn execute(index: usize, shared: &Arc<Shared>, job: Arc<Job>) {
        let Some(payload) = job.take_payload() else {
            error!(job = %job.id(), "dispatched job has no payload");
            return;
        };

        job.set_state(JobState::Running);
        job.add_children(1);
        context::enter_job(job.clone());
        let start = shared.trace().now();

        let finished = match payload {
            Payload::Function(body) => {
                let ctx = JobContext::new(shared, &job);
                if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| body(&ctx))) {
                    shared.job_panicked(&job, panic_message(panic.as_ref()));
                }
                job.mark_completed();
                true
            }
            Payload::Coroutine(frame) => Self::resume(shared, &job, frame),
        };

        context::leave_job();
        shared.record_run(index, &job, start, finished);
        job.set_state(if finished {
            JobState::Waiting
        } else {
            JobState::Suspended
        });
        shared.child_finished(&job);
    }

    /// Poll a coroutine frame once; `true` when it reached its final state
    fn resume(shared: &Arc<Shared>, job: &Arc<Job>, frame: CoroFrame) -> bool {
        let mut future = match frame {
            CoroFrame::Suspended(future) => future,
            CoroFrame::Unstarted(start) => {
                let ctx = CoroContext::new(shared.clone(), job);
                match panic::catch_unwind(AssertUnwindSafe(|| start(ctx))) {
                    Ok(future) => future,
                    Err(panic) => {
                        shared.job_panicked(job, panic_message(panic.as_ref()));
                        job.mark_completed();
                        return true;
                    }
                }
            }
        };

        let mut cx = Context::from_waker(Waker::noop());
        match panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => {
                job.restore_payload(Payload::Coroutine(CoroFrame::Suspended(future)));
                false
            }
            Ok(Poll::Ready(())) => {
                coro_deallocator(job.id(), CoroFrame::Suspended(future));
                job.take_sink();
                job.mark_completed();
                true
            }
            Err(panic) => {
                shared.job_panicked(job, panic_message(panic.as_ref()));
                coro_deallocator(job.id(), CoroFrame::Suspended(future));
                job.mark_completed();
                true
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.shared.terminate();
            self.join();
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
