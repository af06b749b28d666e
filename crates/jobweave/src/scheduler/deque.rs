//! Bounded work-stealing queues for job scheduling
//!
//! [`JobQueue`] is a worker's own deque: the owner pushes and pops at one end
//! (LIFO, so freshly spawned children run while still hot in cache) and other
//! workers steal from the opposite end through a [`QueueStealer`]. The shared
//! [`InjectorQueue`] accepts pushes from any thread.
//!
//! Both are bounded. A slot is reserved before the item becomes visible and
//! released after it has been removed, so the reported length never
//! undercounts and can never exceed the capacity.

use crate::JobError;
use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A push refused because the queue was at capacity
///
/// The item is handed back untouched.
pub struct Rejected<T> {
    /// The item that did not fit
    pub item: T,

    /// Capacity of the queue that refused it
    pub capacity: usize,
}

impl<T> fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl<T> From<Rejected<T>> for JobError {
    fn from(rejected: Rejected<T>) -> Self {
        JobError::QueueFull {
            capacity: rejected.capacity,
        }
    }
}

/// Slot accounting shared by both queue flavors
struct Slots {
    len: AtomicUsize,
    capacity: usize,
}

impl Slots {
    fn new(capacity: usize) -> Self {
        Self {
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    fn try_reserve(&self) -> bool {
        self.len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                (len < self.capacity).then_some(len + 1)
            })
            .is_ok()
    }

    fn release(&self) {
        self.len.fetch_sub(1, Ordering::AcqRel);
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }
}

struct QueueState<T> {
    stealer: Stealer<T>,
    slots: Slots,
}

/// Work-stealing deque owned by a single worker
///
/// `JobQueue` is `Send` but not `Sync`: it is created by the scheduler, moved
/// into its worker thread, and only that thread pushes and pops.
pub struct JobQueue<T> {
    /// Owner end
    deque: Worker<T>,

    /// Stealer handle and slot accounting, shared with every [`QueueStealer`]
    state: Arc<QueueState<T>>,
}

impl<T> JobQueue<T> {
    /// Create a LIFO queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self::from_worker(Worker::new_lifo(), capacity)
    }

    /// Create a FIFO queue holding at most `capacity` items
    pub fn new_fifo(capacity: usize) -> Self {
        Self::from_worker(Worker::new_fifo(), capacity)
    }

    fn from_worker(deque: Worker<T>, capacity: usize) -> Self {
        let stealer = deque.stealer();
        Self {
            deque,
            state: Arc::new(QueueState {
                stealer,
                slots: Slots::new(capacity),
            }),
        }
    }

    /// Push an item at the owner end
    pub fn push(&self, item: T) -> Result<(), Rejected<T>> {
        if !self.state.slots.try_reserve() {
            return Err(Rejected {
                item,
                capacity: self.state.slots.capacity,
            });
        }
        self.deque.push(item);
        Ok(())
    }

    /// Pop from the owner end
    pub fn pop(&self) -> Option<T> {
        let item = self.deque.pop()?;
        self.state.slots.release();
        Some(item)
    }

    /// Handle that other threads use to steal from the opposite end
    pub fn stealer(&self) -> QueueStealer<T> {
        QueueStealer {
            state: self.state.clone(),
        }
    }

    /// Remove every queued item without running it
    pub fn clear(&self) -> Vec<T> {
        let mut drained = Vec::new();
        while let Some(item) = self.pop() {
            drained.push(item);
        }
        drained
    }

    /// Number of queued items (may briefly overcount while a steal completes)
    pub fn len(&self) -> usize {
        self.state.slots.len()
    }

    /// Whether the queue holds no items
    pub fn is_empty(&self) -> bool {
        self.deque.is_empty()
    }

    /// Maximum number of queued items
    pub fn capacity(&self) -> usize {
        self.state.slots.capacity
    }
}

/// Stealing end of a [`JobQueue`]
pub struct QueueStealer<T> {
    state: Arc<QueueState<T>>,
}

impl<T> Clone for QueueStealer<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> QueueStealer<T> {
    /// Steal the oldest item, retrying while a concurrent operation interferes
    pub fn steal(&self) -> Option<T> {
        loop {
            match self.state.stealer.steal() {
                Steal::Success(item) => {
                    self.state.slots.release();
                    return Some(item);
                }
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Number of items in the victim queue
    pub fn len(&self) -> usize {
        self.state.slots.len()
    }

    /// Whether the victim queue is empty
    pub fn is_empty(&self) -> bool {
        self.state.stealer.is_empty()
    }
}

/// Bounded FIFO queue that any thread may push to and steal from
pub struct InjectorQueue<T> {
    injector: Injector<T>,
    slots: Slots,
}

impl<T> InjectorQueue<T> {
    /// Create a queue holding at most `capacity` items
    pub fn new(capacity: usize) -> Self {
        Self {
            injector: Injector::new(),
            slots: Slots::new(capacity),
        }
    }

    /// Push an item at the tail
    pub fn push(&self, item: T) -> Result<(), Rejected<T>> {
        if !self.slots.try_reserve() {
            return Err(Rejected {
                item,
                capacity: self.slots.capacity,
            });
        }
        self.injector.push(item);
        Ok(())
    }

    /// Take the item at the head
    pub fn steal(&self) -> Option<T> {
        loop {
            match self.injector.steal() {
                Steal::Success(item) => {
                    self.slots.release();
                    return Some(item);
                }
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }

    /// Remove every queued item without running it
    pub fn clear(&self) -> Vec<T> {
        let mut drained = Vec::new();
        while let Some(item) = self.steal() {
            drained.push(item);
        }
        drained
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the queue holds no items
    pub fn is_empty(&self) -> bool {
        self.injector.is_empty()
    }

    /// Maximum number of queued items
    pub fn capacity(&self) -> usize {
        self.slots.capacity
    }
}
