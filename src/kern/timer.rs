//! Preemption Timer
//!
//! The periodic "interrupt" is a ticker running on its own OS thread. Each
//! time a quantum elapses it raises a preemption request; the runtime
//! consumes that request only at safe points, and never while the interrupt
//! is suspended by an [`InterruptGuard`].

use std::cell::Cell;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

// ============================================================================
// Shared Request Flag
// ============================================================================

/// State shared between the ticker thread and the runtime
#[derive(Debug, Default)]
pub struct PreemptFlag {
    /// A quantum expired and nobody has yielded for it yet
    pending: AtomicBool,
    /// Quantum expirations so far
    ticks: AtomicU64,
}

impl PreemptFlag {
    /// Raise a request (ticker side)
    pub fn raise(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.pending.store(true, Ordering::Release);
    }

    /// Consume a pending request
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Quantum expirations so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Interrupt Suspension
// ============================================================================

/// Suspension state of the preemption "interrupt"
///
/// Suspension nests: critical sections can be entered from inside other
/// critical sections, and the interrupt is delivered again only once the
/// outermost one ends.
#[derive(Debug)]
pub struct InterruptState {
    depth: Cell<u32>,
    disabled: Cell<bool>,
    flag: Arc<PreemptFlag>,
}

impl InterruptState {
    /// Interrupt armed, nothing pending
    pub fn new() -> Self {
        Self {
            depth: Cell::new(0),
            disabled: Cell::new(false),
            flag: Arc::new(PreemptFlag::default()),
        }
    }

    /// The flag to hand to a [`Ticker`]
    pub fn flag(&self) -> Arc<PreemptFlag> {
        Arc::clone(&self.flag)
    }

    /// Suspend delivery until the guard drops
    pub fn suspend(&self) -> InterruptGuard<'_> {
        self.depth.set(self.depth.get() + 1);
        InterruptGuard { state: self }
    }

    /// Whether a critical section is active
    pub fn is_suspended(&self) -> bool {
        self.depth.get() > 0
    }

    /// Suspend permanently (shutdown)
    pub fn disable(&self) {
        self.disabled.set(true);
        self.flag.take();
    }

    /// Consume a pending request if it may be delivered now
    pub fn poll(&self) -> bool {
        !self.disabled.get() && !self.is_suspended() && self.flag.take()
    }

    /// Quantum expirations so far
    pub fn ticks(&self) -> u64 {
        self.flag.ticks()
    }
}

impl Default for InterruptState {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for a critical section
pub struct InterruptGuard<'a> {
    state: &'a InterruptState,
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        let depth = self.state.depth.get();
        debug_assert!(depth > 0, "interrupt guard underflow");
        self.state.depth.set(depth - 1);
    }
}

// ============================================================================
// Ticker Thread
// ============================================================================

/// Periodic preemption source
#[derive(Debug)]
pub struct Ticker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    /// Start raising `flag` every `quantum`
    pub fn start(quantum: Duration, flag: Arc<PreemptFlag>) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("udthread-ticker".into())
            .spawn(move || {
                let mut deadline = Instant::now() + quantum;
                loop {
                    let now = Instant::now();
                    if now < deadline {
                        thread::park_timeout(deadline - now);
                    }
                    if stop_thread.load(Ordering::Acquire) {
                        break;
                    }
                    if Instant::now() >= deadline {
                        flag.raise();
                        deadline += quantum;
                    }
                }
            })?;

        log::trace!("preemption ticker started, quantum {quantum:?}");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the ticker and wait for its thread
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        handle.thread().unpark();
        if handle.join().is_err() {
            log::warn!("preemption ticker thread panicked");
        }
        log::trace!("preemption ticker stopped");
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}
