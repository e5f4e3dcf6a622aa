//! Scheduler Counters
//!
//! Event counters kept by the kernel and exported as a [`SchedStats`]
//! snapshot. Everything here is touched only inside the runtime's critical
//! section except the tick count, which the preemption ticker bumps from its
//! own OS thread.

/// Counter categories tracked by the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A context switch actually happened
    ContextSwitch,
    /// A voluntary yield handed the CPU to another thread
    Yield,
    /// A yield forced by the preemption ticker
    Preemption,
    /// A thread was created
    ThreadCreated,
    /// A thread was destroyed
    ThreadTerminated,
    /// A message was queued in a mailbox
    MessageSent,
}

/// Kernel-side counters
#[derive(Debug, Default, Clone)]
pub struct Counters {
    context_switches: u64,
    yields: u64,
    preemptions: u64,
    threads_created: u64,
    threads_terminated: u64,
    messages_sent: u64,
}

impl Counters {
    /// All counters at zero
    pub const fn new() -> Self {
        Self {
            context_switches: 0,
            yields: 0,
            preemptions: 0,
            threads_created: 0,
            threads_terminated: 0,
            messages_sent: 0,
        }
    }

    /// Count one event
    #[inline]
    pub fn record(&mut self, event: Event) {
        let counter = match event {
            Event::ContextSwitch => &mut self.context_switches,
            Event::Yield => &mut self.yields,
            Event::Preemption => &mut self.preemptions,
            Event::ThreadCreated => &mut self.threads_created,
            Event::ThreadTerminated => &mut self.threads_terminated,
            Event::MessageSent => &mut self.messages_sent,
        };
        *counter += 1;
    }

    /// Export with the ticker's tick count
    pub fn snapshot(&self, ticks: u64) -> SchedStats {
        SchedStats {
            context_switches: self.context_switches,
            yields: self.yields,
            preemptions: self.preemptions,
            ticks,
            threads_created: self.threads_created,
            threads_terminated: self.threads_terminated,
            messages_sent: self.messages_sent,
        }
    }
}

/// Point-in-time scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedStats {
    /// Context switches performed
    pub context_switches: u64,
    /// Voluntary yields that switched threads
    pub yields: u64,
    /// Forced yields at preemption safe points
    pub preemptions: u64,
    /// Quantum expirations seen by the ticker
    pub ticks: u64,
    /// Threads created
    pub threads_created: u64,
    /// Threads terminated (returned or called terminate)
    pub threads_terminated: u64,
    /// Messages queued through deposit/send
    pub messages_sent: u64,
}
