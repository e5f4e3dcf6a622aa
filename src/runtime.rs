//! Runtime Handle
//!
//! [`Runtime`] is the public face of the thread runtime. One runtime owns one
//! [`Kernel`] and multiplexes all of its threads onto the OS thread that
//! created it; the handle is `!Send` for that reason.
//!
//! ## Critical Sections
//!
//! Every operation runs its kernel work inside [`Runtime::with_kernel`],
//! which suspends the preemption interrupt and borrows the kernel. A
//! dispatch decision leaves the critical section as a [`Switch`] and is only
//! performed once every borrow has been released, so no thread is ever
//! suspended while holding one.
//!
//! ## Preemption
//!
//! The ticker only raises a flag. Public operations begin with a safe point
//! that turns a pending request into a yield; long computations call
//! [`Runtime::checkpoint`].
//!
//! ## Lifecycle
//!
//! After [`Runtime::shutdown`] the kernel is gone and every call becomes a
//! no-op, so code still holding a handle cannot reach freed state.

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use crate::config::RuntimeConfig;
use crate::error::{fatal, or_fatal, RuntimeError, RuntimeResult};
use crate::ipc::mailbox::ReceiveStep;
use crate::ipc::message::{Handoff, Message};
use crate::kern::counters::{Event, SchedStats};
use crate::kern::sched::{Kernel, Switch};
use crate::kern::thread::ThreadEntry;
use crate::kern::timer::{InterruptState, Ticker};
use crate::types::{Priority, ThreadId};

/// Unwind payload carrying a created thread out of its entry function
struct Terminated;

// ============================================================================
// Runtime
// ============================================================================

/// Handle to a thread runtime
///
/// Cheap to clone; every clone refers to the same runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<Inner>,
}

struct Inner {
    /// `None` before init completes and after shutdown
    kernel: RefCell<Option<Kernel>>,
    irq: InterruptState,
    ticker: RefCell<Option<Ticker>>,
    config: RuntimeConfig,
}

impl Runtime {
    /// Initialize with the default configuration
    ///
    /// The caller becomes the bootstrap thread ([`ThreadId::MAIN`], low
    /// priority).
    pub fn init() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Initialize with an explicit configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        or_fatal(Self::start(config))
    }

    fn start(config: RuntimeConfig) -> RuntimeResult<Self> {
        let irq = InterruptState::new();
        let ticker = config
            .quantum
            .map(|quantum| Ticker::start(quantum, irq.flag()))
            .transpose()
            .map_err(|err| RuntimeError::TimerSetup(err.to_string()))?;

        log::debug!(
            "runtime initialized (quantum {:?}, stack {:#x})",
            config.quantum,
            config.stack_size
        );
        Ok(Self {
            inner: Rc::new(Inner {
                kernel: RefCell::new(Some(Kernel::new())),
                irq,
                ticker: RefCell::new(ticker),
                config,
            }),
        })
    }

    /// Configuration this runtime was started with
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------------
    // Critical Sections
    // ------------------------------------------------------------------------

    /// Run `f` on the kernel with the interrupt suspended
    ///
    /// Returns `None` when the runtime is not live.
    pub(crate) fn with_kernel<R>(&self, f: impl FnOnce(&mut Kernel) -> R) -> Option<R> {
        let _guard = self.inner.irq.suspend();
        let mut kernel = self.inner.kernel.borrow_mut();
        kernel.as_mut().map(f)
    }

    /// Like [`with_kernel`](Self::with_kernel), ending the process on error
    pub(crate) fn enter<R>(
        &self,
        op: &str,
        f: impl FnOnce(&mut Kernel) -> RuntimeResult<R>,
    ) -> Option<R> {
        match self.with_kernel(f) {
            Some(result) => Some(or_fatal(result)),
            None => {
                log::trace!("{op}: runtime is not live");
                None
            }
        }
    }

    /// Carry out a dispatch decision, returning once this thread runs again
    pub(crate) fn switch(&self, switch: Switch) {
        // SAFETY: the switch was built inside a critical section that has
        // ended, and the kernel owning both contexts is kept alive by `self`
        unsafe { switch.perform() };
        self.reap();
    }

    /// Free threads that terminated before this one resumed
    fn reap(&self) {
        let zombies = self.with_kernel(Kernel::take_zombies).unwrap_or_default();
        if !zombies.is_empty() {
            log::trace!("reaping {} terminated threads", zombies.len());
        }
        drop(zombies);
    }

    /// Deliver a pending preemption request
    pub(crate) fn safe_point(&self) {
        if self.inner.irq.poll() {
            log::trace!("quantum expired");
            self.yield_with(Event::Preemption);
        }
    }

    /// Explicit preemption point for code that runs long between calls
    pub fn checkpoint(&self) {
        self.safe_point();
    }

    // ------------------------------------------------------------------------
    // Threads
    // ------------------------------------------------------------------------

    /// Create a thread; an invalid or duplicate id ends the process
    ///
    /// `entry` receives the thread's own id. The thread is queued as ready
    /// and first runs when the scheduler dispatches it.
    pub fn create<F>(&self, id: impl Into<ThreadId>, priority: Priority, entry: F)
    where
        F: FnOnce(ThreadId) + 'static,
    {
        if let Err(err) = self.try_create(id, priority, entry) {
            fatal(err);
        }
    }

    /// Create a thread, reporting an invalid or duplicate id as an error
    pub fn try_create<F>(
        &self,
        id: impl Into<ThreadId>,
        priority: Priority,
        entry: F,
    ) -> RuntimeResult<()>
    where
        F: FnOnce(ThreadId) + 'static,
    {
        self.safe_point();
        let id = id.into();
        let entry: ThreadEntry = Box::new(entry);
        let arg = Rc::as_ptr(&self.inner).cast::<()>();
        let stack_size = self.inner.config.stack_size;

        match self.with_kernel(|kernel| {
            kernel.spawn(id, priority, stack_size, entry, thread_start, arg)
        }) {
            Some(result) => result.map(|_| ()),
            None => {
                log::trace!("create: runtime is not live");
                Ok(())
            }
        }
    }

    /// Let the next ready thread run; a no-op when none is ready
    pub fn yield_now(&self) {
        // A voluntary yield answers any pending preemption request too
        self.inner.irq.poll();
        self.yield_with(Event::Yield);
    }

    fn yield_with(&self, cause: Event) {
        let switch = self
            .enter("yield", |kernel| kernel.yield_current(cause))
            .flatten();
        if let Some(switch) = switch {
            self.switch(switch);
        }
    }

    /// End the calling thread
    ///
    /// Does not return while the runtime is live. In a created thread this
    /// unwinds the thread's stack, so destructors run; a `catch_unwind`
    /// inside the thread would intercept it.
    pub fn terminate(&self) {
        match self.with_kernel(|kernel| kernel.current_is_spawned()) {
            None => log::trace!("terminate: runtime is not live"),
            Some(true) => panic::resume_unwind(Box::new(Terminated)),
            Some(false) => self.clone().exit(false),
        }
    }

    /// Destroy the running thread and switch away for good
    fn exit(self, returned: bool) -> ! {
        let decision = self.with_kernel(|kernel| {
            if kernel.thread_count() == 1 {
                Ok(None)
            } else {
                kernel.terminate_current(returned).map(Some)
            }
        });
        let switch = match decision {
            Some(Ok(Some(switch))) => switch,
            Some(Ok(None)) => {
                log::info!("last thread finished, exiting");
                std::process::exit(0)
            }
            Some(Err(err)) => fatal(err),
            None => {
                log::info!("runtime shut down, exiting");
                std::process::exit(0)
            }
        };

        // The zombie's stack belongs to the kernel this handle may be the
        // last owner of
        if Rc::strong_count(&self.inner) > 1 {
            drop(self);
        } else {
            std::mem::forget(self);
        }
        // SAFETY: no borrows are live and the kernel is still owned elsewhere
        unsafe { switch.perform() };
        std::process::abort()
    }

    /// Destroy every thread and the scheduler itself
    ///
    /// Later calls through any handle are no-ops. Called from a created
    /// thread, that thread keeps running on a stack that is leaked.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    // ------------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------------

    /// Queue a message for thread `target`; dropped if no such thread
    pub fn send(&self, target: impl Into<ThreadId>, data: &[u8]) {
        self.safe_point();
        let target = target.into();
        self.with_kernel(|kernel| post(kernel, target, data));
    }

    /// Send, then block until the message is taken out of the mailbox
    ///
    /// Like a semaphore wait, the blocking part is skipped when no other
    /// thread could run to take the message.
    pub fn block_send(&self, target: impl Into<ThreadId>, data: &[u8]) {
        self.safe_point();
        let target = target.into();
        let switch = self
            .enter("block_send", |kernel| match post(kernel, target, data) {
                Some(handoff) => {
                    let mut handoff = handoff.borrow_mut();
                    handoff.wait(kernel)
                }
                None => Ok(None),
            })
            .flatten();
        if let Some(switch) = switch {
            self.switch(switch);
        }
    }

    /// Block until a message accepted by `filter` arrives and take it
    ///
    /// [`ThreadId::WILDCARD`] accepts any sender. Returns the sender and the
    /// payload. `None` means the runtime is not live, or that no message
    /// could ever arrive because no other thread is able to run.
    pub fn receive(&self, filter: impl Into<ThreadId>) -> Option<(ThreadId, Vec<u8>)> {
        self.safe_point();
        let filter = filter.into();
        let mut holding = false;
        loop {
            let step = self.enter("receive", |kernel| {
                let mailbox = kernel.current_mailbox()?;
                let mut mailbox = mailbox.borrow_mut();
                mailbox.receive_step(filter, holding, kernel)
            })?;
            match step {
                ReceiveStep::Delivered(sender, payload) => {
                    return Some((sender, payload.into_vec()));
                }
                ReceiveStep::Parked { switch, holding: token } => {
                    holding = token;
                    self.switch(switch);
                }
                ReceiveStep::Stalled => return None,
            }
        }
    }

    /// Same as [`receive`](Self::receive), which already blocks
    pub fn block_receive(&self, filter: impl Into<ThreadId>) -> Option<(ThreadId, Vec<u8>)> {
        self.receive(filter)
    }

    /// Messages waiting in the calling thread's mailbox
    pub fn pending(&self) -> usize {
        self.with_kernel(|kernel| kernel.queued(kernel.current_id()))
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// ID of the calling thread, `None` once shut down
    pub fn current_id(&self) -> Option<ThreadId> {
        self.with_kernel(|kernel| kernel.current_id())
    }

    /// Whether the runtime has not been shut down
    pub fn is_live(&self) -> bool {
        self.inner
            .kernel
            .try_borrow()
            .map_or(true, |kernel| kernel.is_some())
    }

    /// Number of live threads, the bootstrap thread included
    pub fn thread_count(&self) -> usize {
        self.with_kernel(|kernel| kernel.thread_count())
            .unwrap_or(0)
    }

    /// Number of threads waiting in one ready queue
    pub fn ready_count(&self, priority: Priority) -> usize {
        self.with_kernel(|kernel| kernel.ready_len(priority))
            .unwrap_or(0)
    }

    /// Scheduler statistics, `None` once shut down
    pub fn stats(&self) -> Option<SchedStats> {
        let ticks = self.inner.irq.ticks();
        self.with_kernel(|kernel| kernel.stats(ticks))
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("live", &self.is_live())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Queue a targeted message; returns its hand-off if it was delivered
fn post(kernel: &mut Kernel, target: ThreadId, data: &[u8]) -> Option<Handoff> {
    let Some(mailbox) = kernel.mailbox_of(target) else {
        log::debug!("send to unknown thread {target}: dropped");
        return None;
    };
    let message = Message::new(kernel.current_id(), Some(target), data);
    let handoff = message.handoff();
    mailbox.borrow_mut().deposit(message, kernel);
    kernel.record(Event::MessageSent);
    Some(handoff)
}

// ============================================================================
// Teardown
// ============================================================================

impl Inner {
    fn shutdown(&self) {
        let kernel = {
            let _guard = self.irq.suspend();
            self.kernel.borrow_mut().take()
        };
        let Some(kernel) = kernel else {
            log::trace!("shutdown: runtime is not live");
            return;
        };

        self.irq.disable();
        if let Some(mut ticker) = self.ticker.borrow_mut().take() {
            ticker.stop();
        }

        let current = kernel.current_id();
        let stats = kernel.stats(self.irq.ticks());
        log::debug!(
            "shutdown from thread {current}, ready {:?} / {:?}",
            kernel.ready_ids(Priority::High),
            kernel.ready_ids(Priority::Low)
        );
        // Dropped outside any borrow: entry closures may own handles whose
        // destructors call back into the runtime
        for mut thread in kernel.into_threads() {
            if thread.id == current && thread.has_stack() {
                log::warn!("shutdown from thread {current}: leaking its stack");
                thread.leak_stack();
            }
            drop(thread);
        }
        log::debug!("runtime shut down: {stats:?}");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// Thread Trampoline
// ============================================================================

/// First function run on every created thread's stack
extern "C" fn thread_start(arg: *const ()) -> ! {
    let inner = arg.cast::<Inner>();
    // SAFETY: `arg` is `Rc::as_ptr` of the runtime that created this thread,
    // and that runtime is alive because it just dispatched us
    let rt = unsafe {
        Rc::increment_strong_count(inner);
        Runtime {
            inner: Rc::from_raw(inner),
        }
    };
    rt.reap();

    let returned = match rt.with_kernel(Kernel::start_current).flatten() {
        Some((id, entry)) => run_entry(id, entry),
        None => true,
    };
    rt.exit(returned)
}

/// Run an entry function; `false` if it left through [`Runtime::terminate`]
fn run_entry(id: ThreadId, entry: ThreadEntry) -> bool {
    log::debug!("thread {id} running");
    match panic::catch_unwind(AssertUnwindSafe(move || entry(id))) {
        Ok(()) => true,
        Err(payload) if payload.is::<Terminated>() => false,
        Err(_) => fatal(RuntimeError::ThreadPanicked(id)),
    }
}
