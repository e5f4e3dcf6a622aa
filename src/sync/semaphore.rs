//! Counting Semaphores
//!
//! [`SemCore`] is the kernel-level semaphore: a count plus a FIFO queue of
//! parked threads. It is also the building block of mailboxes (send
//! exclusion, receive count) and of synchronous hand-off sends.
//!
//! [`Semaphore`] is the handle given to threads. It pairs a `SemCore` with
//! the runtime whose scheduler it parks threads on.
//!
//! ## Count Law
//!
//! After `k` waits and `j` signals the count is `initial + j - k`, and the
//! number of parked threads is `max(0, -count)`.

use core::cell::RefCell;

use crate::error::{RuntimeError, RuntimeResult};
use crate::kern::queue::ThreadQueue;
use crate::kern::sched::{Kernel, Switch};
use crate::runtime::Runtime;
use crate::types::ThreadId;

// ============================================================================
// Kernel Semaphore
// ============================================================================

/// Count and wait queue
#[derive(Debug, Default)]
pub struct SemCore {
    count: i32,
    waiters: ThreadQueue,
}

impl SemCore {
    /// Create with an initial count
    pub const fn new(count: i32) -> Self {
        Self {
            count,
            waiters: ThreadQueue::new(),
        }
    }

    /// Current count (negative: that many threads are parked)
    pub fn count(&self) -> i32 {
        self.count
    }

    /// Number of parked threads
    pub fn waiters(&self) -> usize {
        self.waiters.len()
    }

    /// IDs of parked threads, head first
    pub fn waiter_ids(&self) -> Vec<ThreadId> {
        self.waiters.ids()
    }

    /// Decrement; park the running thread if the count went negative
    ///
    /// A returned switch must be performed by the caller once its borrows
    /// are released. If no other thread is ready to take over, the wait is
    /// skipped: the count is left unchanged and the caller keeps running.
    pub fn wait(&mut self, kernel: &mut Kernel) -> RuntimeResult<Option<Switch>> {
        self.count -= 1;
        if self.count >= 0 {
            return Ok(None);
        }
        match kernel.block_current(&mut self.waiters) {
            Ok(switch) => Ok(Some(switch)),
            Err(RuntimeError::Deadlock(id)) => {
                self.count += 1;
                log::warn!("thread {id} would wait with no other runnable thread; continuing");
                Ok(None)
            }
            Err(err) => {
                self.count += 1;
                Err(err)
            }
        }
    }

    /// Decrement only if that does not park anyone
    pub fn try_wait(&mut self) -> bool {
        if self.count > 0 {
            self.count -= 1;
            true
        } else {
            false
        }
    }

    /// Increment; make the head waiter ready if there was one
    ///
    /// The woken thread is only queued, not dispatched.
    pub fn signal(&mut self, kernel: &mut Kernel) {
        let before = self.count;
        self.count += 1;
        if before <= 0 {
            if let Some(thread) = self.waiters.pop() {
                kernel.make_ready(thread);
            }
        }
    }

    /// Make every waiter ready, as if each had been signalled
    pub fn drain(&mut self, kernel: &mut Kernel) {
        while let Some(thread) = self.waiters.pop() {
            self.count += 1;
            kernel.make_ready(thread);
        }
    }
}

// ============================================================================
// Semaphore Handle
// ============================================================================

/// Counting semaphore shared between threads of one runtime
///
/// Share it between threads with an `Rc`. Dropping it (or calling
/// [`destroy`](Self::destroy)) releases every thread still parked on it.
#[derive(Debug)]
pub struct Semaphore {
    rt: Runtime,
    core: RefCell<SemCore>,
}

impl Semaphore {
    /// Create a semaphore with an initial count
    pub fn new(rt: &Runtime, count: i32) -> Self {
        log::trace!("semaphore created, count {count}");
        Self {
            rt: rt.clone(),
            core: RefCell::new(SemCore::new(count)),
        }
    }

    /// Take one unit, blocking while none is available
    ///
    /// Returns at once, without taking a unit, when no other thread could
    /// run in the meantime.
    pub fn wait(&self) {
        self.rt.safe_point();
        let switch = self
            .rt
            .enter("wait", |kernel| self.core.borrow_mut().wait(kernel))
            .flatten();
        if let Some(switch) = switch {
            self.rt.switch(switch);
        }
    }

    /// Release one unit, waking the head waiter if any
    pub fn signal(&self) {
        self.rt.safe_point();
        self.rt.with_kernel(|kernel| self.core.borrow_mut().signal(kernel));
    }

    /// Current count
    pub fn count(&self) -> i32 {
        self.core.borrow().count()
    }

    /// Number of threads parked on this semaphore
    pub fn waiters(&self) -> usize {
        self.core.borrow().waiters()
    }

    /// Release every waiter and free the semaphore
    pub fn destroy(self) {}
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if core.waiters() > 0 {
            log::debug!("semaphore destroyed with waiters {:?}", core.waiter_ids());
        }
        self.rt.with_kernel(|kernel| core.drain(kernel));
    }
}
