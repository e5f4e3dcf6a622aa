//! Scheduler Core
//!
//! The [`Kernel`] owns every scheduling structure: the thread table, the
//! running slot, one ready queue per priority class and the registry of
//! live threads. Its operations only move handles between queues and
//! decide which context runs next; they never switch stacks themselves.
//! A dispatch decision is returned as a [`Switch`] that the caller performs
//! after it has released every borrow of the kernel.
//!
//! ## Dispatch Policy
//!
//! Strict priority, FIFO within a class: the high ready queue is always
//! drained before the low one is looked at. Nothing ages, so a busy
//! high-priority workload starves low priority.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::error::{RuntimeError, RuntimeResult};
use crate::ipc::mailbox::SharedMailbox;
use crate::kern::context::{self, Context, EntryFn};
use crate::kern::counters::{Counters, Event, SchedStats};
use crate::kern::queue::{ThreadQueue, ThreadRef};
use crate::kern::thread::{Stack, Thread, ThreadEntry, ThreadState, ThreadTable};
use crate::types::{Priority, ThreadId};

// ============================================================================
// Pending Switch
// ============================================================================

/// A context switch decided by the kernel but not yet performed
#[derive(Debug)]
#[must_use = "a dispatch decision must be carried out"]
pub struct Switch {
    from: *mut Context,
    to: *const Context,
}

impl Switch {
    /// Suspend the current thread and resume the chosen one
    ///
    /// Returns when the suspended thread is dispatched again.
    ///
    /// # Safety
    /// No borrow of the kernel, of any semaphore or of any mailbox may be
    /// live, and the interrupt must not be suspended. Both contexts belong
    /// to boxed TCBs owned by the kernel, which must outlive the call.
    pub unsafe fn perform(self) {
        // SAFETY: forwarded from the caller
        unsafe { context::switch(self.from, self.to) }
    }
}

// ============================================================================
// Kernel
// ============================================================================

/// Scheduling state of one runtime
#[derive(Debug)]
pub struct Kernel {
    table: ThreadTable,
    /// Holds exactly one thread while the runtime is live
    running: ThreadQueue,
    ready: [ThreadQueue; 2],
    /// Every live thread, whatever its state
    registry: ThreadQueue,
    /// Terminated threads whose stacks may still be in use
    zombies: Vec<Box<Thread>>,
    counters: Counters,
}

impl Kernel {
    /// Kernel whose only thread is the caller (the bootstrap thread)
    pub fn new() -> Self {
        let mut table = ThreadTable::new();
        let main = Box::new(Thread::bootstrap());
        let handle = ThreadRef::new(main.id, main.priority, table.insert(main));

        let mut running = ThreadQueue::new();
        running.push(handle);
        let mut registry = ThreadQueue::new();
        registry.push(handle);

        Self {
            table,
            running,
            ready: [ThreadQueue::new(), ThreadQueue::new()],
            registry,
            zombies: Vec::new(),
            counters: Counters::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------------

    /// Handle of the running thread
    pub fn current(&self) -> Option<ThreadRef> {
        self.running.front().copied()
    }

    /// ID of the running thread
    pub fn current_id(&self) -> ThreadId {
        self.current().map_or(ThreadId::MAIN, |t| t.id)
    }

    /// Look up a live thread in the registry
    pub fn find(&self, id: ThreadId) -> Option<ThreadRef> {
        self.registry.find(id).copied()
    }

    /// Borrow a live TCB
    pub fn thread(&self, id: ThreadId) -> Option<&Thread> {
        self.table.get(self.find(id)?.slot)
    }

    /// Mailbox of a live thread
    pub fn mailbox_of(&self, id: ThreadId) -> Option<SharedMailbox> {
        self.thread(id).map(|t| Rc::clone(&t.mailbox))
    }

    /// Mailbox of the running thread
    pub fn current_mailbox(&self) -> RuntimeResult<SharedMailbox> {
        self.mailbox_of(self.current_id())
            .ok_or(RuntimeError::NoRunnableThread)
    }

    /// Messages waiting in a thread's mailbox
    pub fn queued(&self, id: ThreadId) -> usize {
        self.thread(id).map_or(0, |t| t.mailbox.borrow().len())
    }

    /// Whether the running thread was created by `spawn`
    pub fn current_is_spawned(&self) -> bool {
        self.thread(self.current_id()).is_some_and(Thread::has_stack)
    }

    /// Take the entry function of the running thread (first run only)
    pub fn start_current(&mut self) -> Option<(ThreadId, ThreadEntry)> {
        let current = self.current()?;
        let entry = self.table.get_mut(current.slot)?.take_entry()?;
        Some((current.id, entry))
    }

    /// Number of live threads, the bootstrap thread included
    pub fn thread_count(&self) -> usize {
        self.registry.len()
    }

    /// Number of threads waiting in one ready queue
    pub fn ready_len(&self, priority: Priority) -> usize {
        self.ready[priority.index()].len()
    }

    /// IDs in one ready queue, head first
    pub fn ready_ids(&self, priority: Priority) -> Vec<ThreadId> {
        self.ready[priority.index()].ids()
    }

    /// Whether any thread could be dispatched
    pub fn has_ready(&self) -> bool {
        self.ready.iter().any(|q| !q.is_empty())
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    /// Create a thread and queue it as ready
    ///
    /// The new context starts at `start(arg)`. The running thread is
    /// recorded as its creator.
    pub fn spawn(
        &mut self,
        id: ThreadId,
        priority: Priority,
        stack_size: usize,
        entry: ThreadEntry,
        start: EntryFn,
        arg: *const (),
    ) -> RuntimeResult<ThreadRef> {
        if !id.is_valid_user_id() {
            return Err(RuntimeError::InvalidThreadId(id));
        }
        if self.registry.contains(id) {
            return Err(RuntimeError::DuplicateThreadId(id));
        }

        let stack = Stack::new(stack_size)?;
        let creator = self.current_id();
        let thread = Box::new(Thread::spawn(
            id, priority, creator, stack, entry, start, arg,
        ));
        let handle = ThreadRef::new(id, priority, self.table.insert(thread));

        self.registry.push(handle);
        self.ready[priority.index()].push(handle);
        self.counters.record(Event::ThreadCreated);
        log::debug!("thread {id} created ({priority}, creator {creator})");
        Ok(handle)
    }

    // ------------------------------------------------------------------------
    // Ready Queues
    // ------------------------------------------------------------------------

    /// Queue a thread on the ready queue of its class
    pub fn make_ready(&mut self, thread: ThreadRef) {
        if let Some(tcb) = self.table.get_mut(thread.slot) {
            tcb.state = ThreadState::Ready;
        }
        self.ready[thread.priority.index()].push(thread);
        log::trace!("thread {} ready ({})", thread.id, thread.priority);
    }

    /// Pop the next thread to run, high class first
    fn next_ready(&mut self) -> Option<ThreadRef> {
        self.ready.iter_mut().find_map(ThreadQueue::pop)
    }

    /// Pull a specific thread out of whichever ready queue holds it
    fn take_ready(&mut self, id: ThreadId) -> Option<ThreadRef> {
        self.ready.iter_mut().find_map(|q| q.remove(id))
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    fn context_of(&self, thread: ThreadRef) -> RuntimeResult<*mut Context> {
        self.table
            .get(thread.slot)
            .map(Thread::context_ptr)
            .ok_or(RuntimeError::MissingControlBlock(thread.id))
    }

    /// Install `next` in the running slot and build the switch into it
    fn dispatch(&mut self, from: *mut Context, next: ThreadRef) -> RuntimeResult<Switch> {
        let tcb = self
            .table
            .get_mut(next.slot)
            .ok_or(RuntimeError::MissingControlBlock(next.id))?;
        if !tcb.has_context() {
            return Err(RuntimeError::ContextCapture(format!(
                "thread {} has no saved context",
                next.id
            )));
        }
        tcb.state = ThreadState::Running;
        let to = tcb.context_ptr();

        self.running.push(next);
        if self.running.len() != 1 {
            return Err(RuntimeError::NoRunnableThread);
        }
        self.counters.record(Event::ContextSwitch);
        log::trace!("dispatch -> thread {}", next.id);
        Ok(Switch { from, to })
    }

    /// Give the CPU to the next ready thread
    ///
    /// Returns `None` when nothing else is ready; the caller keeps running.
    /// `cause` is either [`Event::Yield`] or [`Event::Preemption`].
    pub fn yield_current(&mut self, cause: Event) -> RuntimeResult<Option<Switch>> {
        let Some(next) = self.next_ready() else {
            return Ok(None);
        };
        let prev = self.running.pop().ok_or(RuntimeError::NoRunnableThread)?;
        self.make_ready(prev);

        let from = self.context_of(prev)?;
        let switch = self.dispatch(from, next)?;
        self.counters.record(cause);
        Ok(Some(switch))
    }

    /// Park the running thread on `queue` and dispatch the next ready one
    ///
    /// Parking the only runnable thread would leave nothing to run, which is
    /// reported as [`RuntimeError::Deadlock`] with every queue untouched.
    pub fn block_current(&mut self, queue: &mut ThreadQueue) -> RuntimeResult<Switch> {
        let current = self.current().ok_or(RuntimeError::NoRunnableThread)?;
        if !self.has_ready() {
            return Err(RuntimeError::Deadlock(current.id));
        }

        self.running.pop();
        if let Some(tcb) = self.table.get_mut(current.slot) {
            tcb.state = ThreadState::Blocked;
        }
        queue.push(current);
        log::trace!("thread {} blocked", current.id);

        let next = self.next_ready().ok_or(RuntimeError::NoRunnableThread)?;
        let from = self.context_of(current)?;
        self.dispatch(from, next)
    }

    /// Destroy the running thread and dispatch the next one
    ///
    /// `returned` is set when the entry function returned normally; control
    /// then goes back to the thread's creator if that thread is ready.
    /// The TCB is parked as a zombie because its stack is still the active
    /// one until the switch completes.
    pub fn terminate_current(&mut self, returned: bool) -> RuntimeResult<Switch> {
        let current = self.current().ok_or(RuntimeError::NoRunnableThread)?;
        if !self.has_ready() {
            return Err(RuntimeError::NoRunnableThread);
        }

        let creator = self.table.get(current.slot).and_then(|t| t.creator);
        let next = returned
            .then_some(creator)
            .flatten()
            .and_then(|creator| self.take_ready(creator))
            .or_else(|| self.next_ready())
            .ok_or(RuntimeError::NoRunnableThread)?;

        self.running.pop();
        self.registry.remove(current.id);
        let mut thread = self
            .table
            .take(current.slot)
            .ok_or(RuntimeError::MissingControlBlock(current.id))?;
        thread.state = ThreadState::Zombie;

        // Orphans fall back to normal dispatch when they return
        for child in self.table.iter_mut() {
            if child.creator == Some(current.id) {
                child.creator = None;
            }
        }

        let mailbox = Rc::clone(&thread.mailbox);
        mailbox.borrow_mut().close(self);

        let from = thread.context_ptr();
        self.zombies.push(thread);
        self.counters.record(Event::ThreadTerminated);
        log::debug!(
            "thread {} terminated ({})",
            current.id,
            if returned { "returned" } else { "exited" }
        );
        self.dispatch(from, next)
    }

    /// Terminated TCBs that are safe to free
    ///
    /// Only valid once the switch away from them has completed, i.e. from
    /// the thread that was dispatched in their place or any later one.
    pub fn take_zombies(&mut self) -> Vec<Box<Thread>> {
        core::mem::take(&mut self.zombies)
    }

    /// Dismantle the kernel, handing every TCB to the caller
    pub fn into_threads(mut self) -> Vec<Box<Thread>> {
        self.running.drain().for_each(drop);
        self.registry.drain().for_each(drop);
        for queue in &mut self.ready {
            queue.drain().for_each(drop);
        }
        let mut threads: Vec<_> = self.table.drain().collect();
        threads.append(&mut self.zombies);
        threads
    }

    // ------------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------------

    /// Count one event
    pub fn record(&mut self, event: Event) {
        self.counters.record(event);
    }

    /// Current statistics
    pub fn stats(&self, ticks: u64) -> SchedStats {
        self.counters.snapshot(ticks)
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}
