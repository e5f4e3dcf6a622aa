//! Kern subsystem - scheduling core
//!
//! Thread control blocks and their queues, the context-switch primitive,
//! the dispatcher, the preemption timer and scheduler statistics.

pub mod context;
pub mod counters;
pub mod queue;
pub mod sched;
pub mod thread;
pub mod timer;

pub use counters::SchedStats;
pub use queue::{ThreadQueue, ThreadRef};
pub use sched::{Kernel, Switch};
pub use thread::{Thread, ThreadState};
