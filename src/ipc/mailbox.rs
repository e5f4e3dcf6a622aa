//! Mailboxes
//!
//! A mailbox is a FIFO list of messages guarded by two semaphores: `mutex`
//! (count 1) excludes concurrent access to the list and `available`
//! (count 0) counts messages that may still be received. Every thread owns
//! one for targeted messaging; [`Mailbox`] is the anonymous, shared kind
//! used with `deposit`/`withdraw`.
//!
//! ## Receive Protocol
//!
//! A receiver first takes an `available` token (blocking while the list is
//! empty), then scans for the first message its filter accepts. On a miss
//! the token is handed back, so `available` never exceeds the number of
//! queued messages, and the receiver parks on `arrivals` until the next
//! deposit makes a rescan worthwhile.

use alloc::collections::VecDeque;
use alloc::rc::Rc;
use core::cell::RefCell;
use core::fmt;

use super::message::{Message, Payload};
use crate::error::{RuntimeError, RuntimeResult};
use crate::kern::counters::Event;
use crate::kern::queue::ThreadQueue;
use crate::kern::sched::{Kernel, Switch};
use crate::runtime::Runtime;
use crate::sync::semaphore::SemCore;
use crate::types::ThreadId;

/// Mailbox shared between its owner and the threads sending to it
pub type SharedMailbox = Rc<RefCell<MailboxCore>>;

/// Outcome of one receive attempt
#[derive(Debug)]
pub enum ReceiveStep {
    /// A matching message was taken
    Delivered(ThreadId, Payload),
    /// The receiver was parked; perform the switch and try again
    Parked {
        switch: Switch,
        /// Whether the receiver will hold an `available` token on wakeup
        holding: bool,
    },
    /// Nothing matched and no other thread could run to send it
    Stalled,
}

// ============================================================================
// Kernel Mailbox
// ============================================================================

/// Message list and its semaphores
pub struct MailboxCore {
    messages: VecDeque<Message>,
    mutex: SemCore,
    available: SemCore,
    /// Receivers waiting for a new message after a filtered miss
    arrivals: ThreadQueue,
}

impl MailboxCore {
    /// Empty mailbox
    pub fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            mutex: SemCore::new(1),
            available: SemCore::new(0),
            arrivals: ThreadQueue::new(),
        }
    }

    /// Empty mailbox behind a shared handle
    pub fn shared() -> SharedMailbox {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether no message is queued
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Count of the receive semaphore
    pub fn available(&self) -> i32 {
        self.available.count()
    }

    /// Senders of the queued messages, oldest first
    pub fn senders(&self) -> Vec<ThreadId> {
        self.messages.iter().map(|m| m.sender).collect()
    }

    fn lock(&mut self) {
        // Held only inside a critical section, so it is always free here
        let acquired = self.mutex.try_wait();
        debug_assert!(acquired, "mailbox lock held across a switch");
    }

    fn unlock(&mut self, kernel: &mut Kernel) {
        self.mutex.signal(kernel);
    }

    /// Append a message and wake receivers
    pub fn deposit(&mut self, message: Message, kernel: &mut Kernel) {
        match message.target {
            Some(target) => log::trace!(
                "deposit {} bytes {} -> {target} ({} queued)",
                message.payload.len(),
                message.sender,
                self.messages.len()
            ),
            None => log::trace!(
                "deposit {} bytes from {} ({} queued)",
                message.payload.len(),
                message.sender,
                self.messages.len()
            ),
        }
        self.lock();
        self.messages.push_back(message);
        self.unlock(kernel);
        self.available.signal(kernel);

        while let Some(receiver) = self.arrivals.pop() {
            kernel.make_ready(receiver);
        }
    }

    /// Take the oldest message without blocking
    ///
    /// `None` is the "empty" signal, not an error.
    pub fn withdraw(&mut self, kernel: &mut Kernel) -> Option<(ThreadId, Payload)> {
        if !self.available.try_wait() {
            log::warn!("withdraw from empty mailbox");
            return None;
        }
        self.lock();
        let message = self.messages.pop_front();
        self.unlock(kernel);
        debug_assert!(message.is_some(), "receive count ahead of message list");
        message.map(|m| m.release(kernel))
    }

    /// One attempt at receiving a message accepted by `filter`
    ///
    /// `holding` says whether the caller already owns an `available` token
    /// (it was woken by a deposit while parked on `available`).
    pub fn receive_step(
        &mut self,
        filter: ThreadId,
        holding: bool,
        kernel: &mut Kernel,
    ) -> RuntimeResult<ReceiveStep> {
        if !holding && !self.available.try_wait() {
            return Ok(match self.available.wait(kernel)? {
                Some(switch) => ReceiveStep::Parked {
                    switch,
                    holding: true,
                },
                None => ReceiveStep::Stalled,
            });
        }

        self.lock();
        let found = self
            .messages
            .iter()
            .position(|m| filter.accepts(m.sender))
            .and_then(|index| self.messages.remove(index));
        self.unlock(kernel);

        match found {
            Some(message) => {
                let (sender, payload) = message.release(kernel);
                log::debug!("received {} bytes from {sender}", payload.len());
                Ok(ReceiveStep::Delivered(sender, payload))
            }
            None => {
                log::trace!("no message from {filter} among {} queued", self.messages.len());
                self.available.signal(kernel);
                match kernel.block_current(&mut self.arrivals) {
                    Ok(switch) => Ok(ReceiveStep::Parked {
                        switch,
                        holding: false,
                    }),
                    Err(RuntimeError::Deadlock(id)) => {
                        log::warn!("thread {id} would wait for {filter} with no other runnable thread");
                        Ok(ReceiveStep::Stalled)
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Discard every message and release everyone waiting on this mailbox
    ///
    /// Each discarded message has its hand-off signalled, so a sender blocked
    /// in `block_send` resumes instead of waiting forever.
    pub fn close(&mut self, kernel: &mut Kernel) {
        if !self.messages.is_empty() {
            log::debug!("mailbox closed with messages from {:?}", self.senders());
        }
        while let Some(message) = self.messages.pop_front() {
            message.release(kernel);
        }
        self.available.drain(kernel);
        self.mutex.drain(kernel);
        while let Some(receiver) = self.arrivals.pop() {
            kernel.make_ready(receiver);
        }
    }
}

impl Default for MailboxCore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MailboxCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailboxCore")
            .field("queued", &self.messages.len())
            .field("available", &self.available.count())
            .field("arrivals", &self.arrivals.len())
            .finish()
    }
}

// ============================================================================
// Anonymous Mailbox
// ============================================================================

/// Shared FIFO mailbox not tied to any thread
///
/// Share it between threads with an `Rc`. Dropping it (or calling
/// [`destroy`](Self::destroy)) discards what is left and releases blocked
/// senders.
#[derive(Debug)]
pub struct Mailbox {
    rt: Runtime,
    core: SharedMailbox,
}

impl Mailbox {
    /// Create an empty mailbox
    pub fn new(rt: &Runtime) -> Self {
        Self {
            rt: rt.clone(),
            core: MailboxCore::shared(),
        }
    }

    /// Queue a copy of `data`
    pub fn deposit(&self, data: &[u8]) {
        self.rt.safe_point();
        self.rt.with_kernel(|kernel| {
            let message = Message::new(kernel.current_id(), None, data);
            self.core.borrow_mut().deposit(message, kernel);
            kernel.record(Event::MessageSent);
        });
    }

    /// Take the oldest message, or `None` right away if there is none
    pub fn withdraw(&self) -> Option<Vec<u8>> {
        self.rt.safe_point();
        self.rt
            .with_kernel(|kernel| self.core.borrow_mut().withdraw(kernel))
            .flatten()
            .map(|(_, payload)| payload.into_vec())
    }

    /// Copy the oldest message into `buf` and return the copied length
    ///
    /// 0 means the mailbox was empty. A message longer than `buf` is
    /// truncated.
    pub fn withdraw_into(&self, buf: &mut [u8]) -> usize {
        let Some(data) = self.withdraw() else {
            return 0;
        };
        let len = data.len().min(buf.len());
        buf[..len].copy_from_slice(&data[..len]);
        len
    }

    /// Number of queued messages
    pub fn len(&self) -> usize {
        self.core.borrow().len()
    }

    /// Whether no message is queued
    pub fn is_empty(&self) -> bool {
        self.core.borrow().is_empty()
    }

    /// Discard remaining messages and free the mailbox
    pub fn destroy(self) {}
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        let core = &self.core;
        self.rt.with_kernel(|kernel| core.borrow_mut().close(kernel));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Priority;

    extern "C" fn never(_: *const ()) -> ! {
        unreachable!("test contexts are never resumed")
    }

    /// Kernel running thread 1 with threads 2..=n ready (all high)
    fn kernel_with_threads(n: i32) -> Kernel {
        let mut kernel = Kernel::new();
        for id in 1..=n {
            kernel
                .spawn(
                    ThreadId(id),
                    Priority::High,
                    0x4000,
                    Box::new(|_| {}),
                    never,
                    core::ptr::null(),
                )
                .unwrap();
        }
        let _ = kernel.yield_current(Event::Yield).unwrap();
        kernel
    }

    fn msg(sender: i32, data: &[u8]) -> Message {
        Message::new(ThreadId(sender), None, data)
    }

    fn delivered(step: ReceiveStep) -> (ThreadId, Vec<u8>) {
        match step {
            ReceiveStep::Delivered(sender, payload) => (sender, payload.into_vec()),
            other => panic!("no message taken: {other:?}"),
        }
    }

    #[test]
    fn test_deposit_withdraw_fifo() {
        let mut kernel = Kernel::new();
        let mut mailbox = MailboxCore::new();
        mailbox.deposit(msg(1, b"first"), &mut kernel);
        mailbox.deposit(msg(2, b"second"), &mut kernel);
        assert_eq!(mailbox.len(), 2);
        assert_eq!(mailbox.available(), 2);

        let (sender, payload) = mailbox.withdraw(&mut kernel).unwrap();
        assert_eq!(sender, ThreadId(1));
        assert_eq!(payload.as_slice(), b"first");
        assert_eq!(mailbox.available(), 1);
        assert_eq!(mailbox.withdraw(&mut kernel).unwrap().1.as_slice(), b"second");
    }

    #[test]
    fn test_withdraw_empty() {
        let mut kernel = Kernel::new();
        let mut mailbox = MailboxCore::new();
        assert!(mailbox.withdraw(&mut kernel).is_none());
        assert_eq!(mailbox.available(), 0);
    }

    #[test]
    fn test_receive_wildcard_takes_oldest() {
        let mut kernel = Kernel::new();
        let mut mailbox = MailboxCore::new();
        mailbox.deposit(msg(4, b"a"), &mut kernel);
        mailbox.deposit(msg(5, b"b"), &mut kernel);

        let step = mailbox
            .receive_step(ThreadId::WILDCARD, false, &mut kernel)
            .unwrap();
        assert_eq!(delivered(step), (ThreadId(4), b"a".to_vec()));
        assert_eq!(mailbox.available(), 1);
    }

    #[test]
    fn test_receive_filter_skips_non_matching() {
        let mut kernel = Kernel::new();
        let mut mailbox = MailboxCore::new();
        mailbox.deposit(msg(4, b"a"), &mut kernel);
        mailbox.deposit(msg(5, b"b"), &mut kernel);
        mailbox.deposit(msg(4, b"c"), &mut kernel);

        let step = mailbox.receive_step(ThreadId(5), false, &mut kernel).unwrap();
        assert_eq!(delivered(step), (ThreadId(5), b"b".to_vec()));
        assert_eq!(mailbox.senders(), vec![ThreadId(4), ThreadId(4)]);
        assert_eq!(mailbox.available(), mailbox.len() as i32);
    }

    #[test]
    fn test_receive_miss_parks_and_keeps_count() {
        let mut kernel = kernel_with_threads(2);
        let mut mailbox = MailboxCore::new();
        mailbox.deposit(msg(9, b"other"), &mut kernel);

        let step = mailbox.receive_step(ThreadId(7), false, &mut kernel).unwrap();
        assert!(matches!(step, ReceiveStep::Parked { holding: false, .. }));
        assert_eq!(mailbox.available(), 1);
        assert_eq!(mailbox.len(), 1);
        assert_eq!(kernel.current_id(), ThreadId(2));

        // The next deposit wakes the parked receiver for a rescan
        mailbox.deposit(msg(7, b"mine"), &mut kernel);
        assert_eq!(kernel.ready_ids(Priority::High), vec![ThreadId(1)]);
        assert_eq!(mailbox.available(), 2);
    }

    #[test]
    fn test_receive_on_empty_parks_holding() {
        let mut kernel = kernel_with_threads(2);
        let mut mailbox = MailboxCore::new();

        let step = mailbox
            .receive_step(ThreadId::WILDCARD, false, &mut kernel)
            .unwrap();
        assert!(matches!(step, ReceiveStep::Parked { holding: true, .. }));
        assert_eq!(mailbox.available(), -1);

        mailbox.deposit(msg(2, b"x"), &mut kernel);
        assert_eq!(mailbox.available(), 0);
        assert_eq!(kernel.ready_ids(Priority::High), vec![ThreadId(1)]);

        let step = mailbox
            .receive_step(ThreadId::WILDCARD, true, &mut kernel)
            .unwrap();
        assert_eq!(delivered(step), (ThreadId(2), b"x".to_vec()));
        assert_eq!(mailbox.available(), 0);
    }

    #[test]
    fn test_receive_with_nothing_ready_stalls() {
        let mut kernel = Kernel::new();
        let mut mailbox = MailboxCore::new();

        let step = mailbox
            .receive_step(ThreadId::WILDCARD, false, &mut kernel)
            .unwrap();
        assert!(matches!(step, ReceiveStep::Stalled));
        assert_eq!(mailbox.available(), 0);
        assert_eq!(kernel.current_id(), ThreadId::MAIN);
    }

    #[test]
    fn test_filtered_miss_with_nothing_ready_stalls() {
        let mut kernel = Kernel::new();
        let mut mailbox = MailboxCore::new();
        mailbox.deposit(msg(9, b"other"), &mut kernel);

        let step = mailbox.receive_step(ThreadId(7), false, &mut kernel).unwrap();
        assert!(matches!(step, ReceiveStep::Stalled));
        assert_eq!(mailbox.len(), 1);
        assert_eq!(mailbox.available(), 1);
    }

    #[test]
    fn test_match_does_not_resignal_receive_count() {
        let mut kernel = Kernel::new();
        let mut mailbox = MailboxCore::new();
        for sender in [4, 5, 6] {
            mailbox.deposit(msg(sender, b"m"), &mut kernel);
        }

        // Taking a message consumes exactly one unit; there is no extra
        // signal after a match, so the count tracks the queue
        let step = mailbox.receive_step(ThreadId(5), false, &mut kernel).unwrap();
        assert_eq!(delivered(step).0, ThreadId(5));
        assert_eq!(mailbox.available(), 2);

        for expected in [4, 6] {
            let step = mailbox
                .receive_step(ThreadId::WILDCARD, false, &mut kernel)
                .unwrap();
            assert_eq!(delivered(step).0, ThreadId(expected));
            assert_eq!(mailbox.available(), mailbox.len() as i32);
        }

        // No leftover unit to let a receive through an empty mailbox
        let step = mailbox
            .receive_step(ThreadId::WILDCARD, false, &mut kernel)
            .unwrap();
        assert!(matches!(step, ReceiveStep::Stalled));
    }

    #[test]
    fn test_close_releases_blocked_sender() {
        let mut kernel = kernel_with_threads(2);
        let mut mailbox = MailboxCore::new();

        let message = Message::new(ThreadId(1), Some(ThreadId(2)), b"sync");
        let handoff = message.handoff();
        mailbox.deposit(message, &mut kernel);
        let _ = handoff.borrow_mut().wait(&mut kernel).unwrap().unwrap();
        assert_eq!(kernel.current_id(), ThreadId(2));
        assert_eq!(handoff.borrow().waiters(), 1);

        mailbox.close(&mut kernel);
        assert!(mailbox.is_empty());
        assert_eq!(handoff.borrow().waiters(), 0);
        assert_eq!(kernel.ready_ids(Priority::High), vec![ThreadId(1)]);
    }
}
