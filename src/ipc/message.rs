//! Messages
//!
//! A message is an owned copy of the sender's bytes plus routing data. Small
//! payloads are stored inline, larger ones out of line. Each message carries
//! its own hand-off semaphore, signalled when the message leaves its mailbox
//! (delivered or discarded), which is what `block_send` waits on.

use alloc::rc::Rc;
use alloc::vec::Vec as StdVec;
use core::cell::RefCell;
use heapless::Vec;

use crate::kern::sched::Kernel;
use crate::sync::semaphore::SemCore;
use crate::types::ThreadId;

/// Largest payload stored inline
pub const INLINE_CAPACITY: usize = 256;

/// Hand-off semaphore shared by a message and its blocking sender
pub type Handoff = Rc<RefCell<SemCore>>;

/// Message payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Inline data (small messages)
    Inline(Vec<u8, INLINE_CAPACITY>),
    /// Out-of-line data (large messages)
    OutOfLine(StdVec<u8>),
}

impl Payload {
    /// Copy `data`, inline when it fits
    pub fn copy_from(data: &[u8]) -> Self {
        match Vec::from_slice(data) {
            Ok(inline) => Payload::Inline(inline),
            Err(()) => Payload::OutOfLine(data.to_vec()),
        }
    }

    /// Payload bytes
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Payload::Inline(data) => data.as_slice(),
            Payload::OutOfLine(data) => data.as_slice(),
        }
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether the payload is zero-length
    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    /// Take the bytes as an owned vector
    pub fn into_vec(self) -> StdVec<u8> {
        match self {
            Payload::Inline(data) => data.as_slice().to_vec(),
            Payload::OutOfLine(data) => data,
        }
    }
}

/// A queued message
#[derive(Debug)]
pub struct Message {
    /// Thread that sent it (may no longer exist)
    pub sender: ThreadId,
    /// Addressed receiver, `None` for untargeted mailboxes
    pub target: Option<ThreadId>,
    /// Copied bytes
    pub payload: Payload,
    handoff: Handoff,
}

impl Message {
    /// Build a message holding a copy of `data`
    pub fn new(sender: ThreadId, target: Option<ThreadId>, data: &[u8]) -> Self {
        Self {
            sender,
            target,
            payload: Payload::copy_from(data),
            handoff: Rc::new(RefCell::new(SemCore::new(0))),
        }
    }

    /// The hand-off semaphore, for a sender that waits on delivery
    pub fn handoff(&self) -> Handoff {
        Rc::clone(&self.handoff)
    }

    /// Release the hand-off and give up the payload
    ///
    /// Called whenever the message leaves a mailbox, delivered or not.
    pub fn release(self, kernel: &mut Kernel) -> (ThreadId, Payload) {
        self.handoff.borrow_mut().signal(kernel);
        (self.sender, self.payload)
    }
}
