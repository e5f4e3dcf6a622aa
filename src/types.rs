//! Common types used across udthread
//!
//! This module defines shared identifiers to avoid circular dependencies
//! between the scheduler, the semaphores and the mailboxes.

use core::fmt;

/// Logical thread identifier
///
/// Ids are chosen by the caller of `create` and must be positive. Two values
/// are reserved: [`ThreadId::MAIN`] names the bootstrap thread and
/// [`ThreadId::WILDCARD`] is the receive filter that accepts any sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub i32);

impl ThreadId {
    /// The bootstrap thread (whatever called `Runtime::init`)
    pub const MAIN: ThreadId = ThreadId(-1);

    /// Receive filter matching any sender
    pub const WILDCARD: ThreadId = ThreadId(0);

    /// Whether `create` would accept this id (uniqueness aside)
    pub fn is_valid_user_id(self) -> bool {
        self.0 > 0
    }

    /// Whether this is the bootstrap sentinel
    pub fn is_main(self) -> bool {
        self == Self::MAIN
    }

    /// Whether this filter accepts a message from `sender`
    pub fn accepts(self, sender: ThreadId) -> bool {
        self == Self::WILDCARD || self == sender
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            f.write_str("main")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<i32> for ThreadId {
    fn from(raw: i32) -> Self {
        ThreadId(raw)
    }
}

/// Scheduling class
///
/// Only two classes exist. `High` is always drained before `Low` is
/// considered, so a busy high-priority workload starves low priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Priority {
    /// Served first
    High,
    /// Served only when no high-priority thread is ready
    #[default]
    Low,
}

impl Priority {
    /// Numeric level as used by the C-style API (0 = high, 1 = low)
    pub fn level(self) -> i32 {
        match self {
            Priority::High => 0,
            Priority::Low => 1,
        }
    }

    /// Index into per-class arrays
    pub(crate) fn index(self) -> usize {
        self.level() as usize
    }
}

impl TryFrom<i32> for Priority {
    type Error = i32;

    fn try_from(level: i32) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Priority::High),
            1 => Ok(Priority::Low),
            other => Err(other),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => f.write_str("high"),
            Priority::Low => f.write_str("low"),
        }
    }
}
