//! Coroutine result slot and frame release

use crate::scheduler::job::CoroFrame;
use crate::scheduler::JobId;
use crate::{JobError, JobResult};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Who owns a coroutine's result
///
/// An `Entry` result is shared by every handle, and any of them may move it
/// out. A `Child` result belongs to the parent awaiting it: other handles may
/// read copies until the parent collects, but cannot move it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CoroRole {
    /// Driven by a plain job or an external caller
    Entry,
    /// Awaited by a parent coroutine
    Child,
}

/// Receives the failure of a job that will not produce a value
pub trait ResultSink: Send + Sync {
    /// Record `error` as the job's outcome (ignored if a value is already set)
    fn fail(&self, error: JobError);
}

enum SlotState<T> {
    Empty,
    Ready(Result<T, JobError>),
    Released,
}

/// Write-once result cell shared by a coroutine and its readers
pub struct ResultSlot<T> {
    owner: JobId,
    state: Mutex<SlotState<T>>,
    role: Mutex<CoroRole>,
    ready: Condvar,
}

impl<T> ResultSlot<T> {
    /// Create an empty slot for the coroutine `owner`
    pub fn new(owner: JobId) -> Self {
        Self {
            owner,
            state: Mutex::new(SlotState::Empty),
            role: Mutex::new(CoroRole::Entry),
            ready: Condvar::new(),
        }
    }

    /// Write the outcome; a second write is rejected
    pub fn set(&self, outcome: Result<T, JobError>) -> JobResult<()> {
        let mut state = self.state.lock();
        match *state {
            SlotState::Empty => {
                *state = SlotState::Ready(outcome);
                self.ready.notify_all();
                Ok(())
            }
            _ => Err(JobError::ResultAlreadySet),
        }
    }

    /// Whether an outcome is available
    pub fn is_ready(&self) -> bool {
        matches!(*self.state.lock(), SlotState::Ready(_))
    }

    /// Current reader role
    pub fn role(&self) -> CoroRole {
        *self.role.lock()
    }

    pub(crate) fn set_role(&self, role: CoroRole) {
        *self.role.lock() = role;
    }

    /// Move the outcome out, leaving the slot released
    ///
    /// Refused with `ResultOwnedByParent` while a parent awaits the coroutine.
    pub fn take(&self) -> JobResult<T> {
        if self.role() == CoroRole::Child {
            return Err(JobError::ResultOwnedByParent(self.owner));
        }
        self.collect_child()
    }

    /// Move the outcome out on behalf of the awaiting parent
    pub(crate) fn collect_child(&self) -> JobResult<T> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Released) {
            SlotState::Ready(outcome) => outcome,
            SlotState::Empty => {
                *state = SlotState::Empty;
                Err(JobError::NotReady(self.owner))
            }
            SlotState::Released => Err(JobError::CoroutineUseAfterComplete(self.owner)),
        }
    }

    /// Block until an outcome is written or `deadline` passes, then apply `read`
    fn wait_with<R>(
        &self,
        deadline: Option<Instant>,
        read: impl FnOnce(&mut SlotState<T>) -> JobResult<R>,
    ) -> JobResult<R> {
        let mut state = self.state.lock();
        while matches!(*state, SlotState::Empty) {
            match deadline {
                Some(deadline) => {
                    if self.ready.wait_until(&mut state, deadline).timed_out()
                        && matches!(*state, SlotState::Empty)
                    {
                        return Err(JobError::Timeout);
                    }
                }
                None => self.ready.wait(&mut state),
            }
        }
        read(&mut state)
    }
}

impl<T: Clone> ResultSlot<T> {
    fn read_copy(owner: JobId, state: &mut SlotState<T>) -> JobResult<T> {
        match state {
            SlotState::Ready(outcome) => outcome.clone(),
            SlotState::Released => Err(JobError::CoroutineUseAfterComplete(owner)),
            SlotState::Empty => Err(JobError::NotReady(owner)),
        }
    }

    /// Copy of the outcome, or `None` if not produced yet
    pub fn get(&self) -> Option<JobResult<T>> {
        let mut state = self.state.lock();
        match *state {
            SlotState::Empty => None,
            _ => Some(Self::read_copy(self.owner, &mut state)),
        }
    }

    /// Block until the outcome is written and return a copy
    pub fn wait(&self) -> JobResult<T> {
        self.wait_with(None, |state| Self::read_copy(self.owner, state))
    }

    /// Block up to `timeout` for the outcome
    pub fn wait_timeout(&self, timeout: Duration) -> JobResult<T> {
        self.wait_with(Some(Instant::now() + timeout), |state| {
            Self::read_copy(self.owner, state)
        })
    }
}

impl<T: Send> ResultSink for ResultSlot<T> {
    fn fail(&self, error: JobError) {
        if self.set(Err(error)).is_err() {
            trace!(job = %self.owner, "result already set, failure dropped");
        }
    }
}

/// Reader handle for a coroutine's result
///
/// Handles are cheap to clone; they all observe the same slot.
pub struct CoroPromise<T> {
    slot: Arc<ResultSlot<T>>,
}

impl<T> Clone for CoroPromise<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> CoroPromise<T> {
    pub(crate) fn new(owner: JobId) -> Self {
        Self {
            slot: Arc::new(ResultSlot::new(owner)),
        }
    }

    /// ID of the coroutine's job
    pub fn job_id(&self) -> JobId {
        self.slot.owner
    }

    /// Whether the coroutine has produced its outcome
    pub fn is_ready(&self) -> bool {
        self.slot.is_ready()
    }

    /// Current reader role
    pub fn role(&self) -> CoroRole {
        self.slot.role()
    }

    /// Block until the outcome is written, then move it out
    ///
    /// Later reads through any handle report `CoroutineUseAfterComplete`. A
    /// coroutine awaited by a parent is refused with `ResultOwnedByParent`.
    pub fn into_result(self) -> JobResult<T> {
        let owner = self.slot.owner;
        if self.slot.role() == CoroRole::Child {
            return Err(JobError::ResultOwnedByParent(owner));
        }
        self.slot.wait_with(None, |state| {
            match std::mem::replace(state, SlotState::Released) {
                SlotState::Ready(outcome) => outcome,
                _ => Err(JobError::CoroutineUseAfterComplete(owner)),
            }
        })
    }

    pub(crate) fn slot(&self) -> &Arc<ResultSlot<T>> {
        &self.slot
    }
}

impl<T: Clone> CoroPromise<T> {
    /// Copy of the outcome, or `None` if not produced yet
    pub fn get(&self) -> Option<JobResult<T>> {
        self.slot.get()
    }

    /// Block until the outcome is written and return a copy
    pub fn wait(&self) -> JobResult<T> {
        self.slot.wait()
    }

    /// Block up to `timeout` for the outcome
    pub fn wait_timeout(&self, timeout: Duration) -> JobResult<T> {
        self.slot.wait_timeout(timeout)
    }
}

impl<T> fmt::Debug for CoroPromise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoroPromise")
            .field("job", &self.slot.owner)
            .field("ready", &self.slot.is_ready())
            .field("role", &self.slot.role())
            .finish()
    }
}

/// Release a coroutine frame that will never be polled again
pub(crate) fn coro_deallocator(job: JobId, frame: CoroFrame) {
    match &frame {
        CoroFrame::Unstarted(_) => debug!(job = %job, "dropping unstarted coroutine"),
        CoroFrame::Suspended(_) => debug!(job = %job, "dropping suspended coroutine frame"),
    }
    drop(frame);
}
