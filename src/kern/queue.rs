//! Thread Queues
//!
//! FIFO queues of thread handles. Every scheduling structure in the runtime
//! (the running slot, the two ready queues, the registry and each semaphore
//! wait queue) is a [`ThreadQueue`].
//!
//! A queue holds [`ThreadRef`]s, which are small copyable handles into the
//! thread table. Queues never own, allocate or free threads; moving a thread
//! between queues is a pop from one and a push onto the other, so a thread
//! that has been destroyed cannot be left dangling in a queue that still
//! points at it.

use alloc::collections::VecDeque;

use crate::kern::thread::Slot;
use crate::types::{Priority, ThreadId};

// ============================================================================
// Queue Entry
// ============================================================================

/// Handle to a live thread, as stored in queues
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadRef {
    /// Thread ID
    pub id: ThreadId,
    /// Scheduling class (selects the ready queue on wakeup)
    pub priority: Priority,
    /// Location in the thread table
    pub slot: Slot,
}

impl ThreadRef {
    /// Create a new handle
    pub fn new(id: ThreadId, priority: Priority, slot: Slot) -> Self {
        Self { id, priority, slot }
    }
}

// ============================================================================
// Thread Queue
// ============================================================================

/// FIFO queue of threads
#[derive(Debug, Default, Clone)]
pub struct ThreadQueue {
    threads: VecDeque<ThreadRef>,
}

impl ThreadQueue {
    /// Create new empty queue
    pub const fn new() -> Self {
        Self {
            threads: VecDeque::new(),
        }
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Get number of threads
    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Add thread to end of queue
    pub fn push(&mut self, entry: ThreadRef) {
        debug_assert!(
            self.find(entry.id).is_none(),
            "thread {} queued twice",
            entry.id
        );
        self.threads.push_back(entry);
    }

    /// Remove thread from front of queue
    pub fn pop(&mut self) -> Option<ThreadRef> {
        self.threads.pop_front()
    }

    /// Peek at front thread
    pub fn front(&self) -> Option<&ThreadRef> {
        self.threads.front()
    }

    /// Remove specific thread by ID, scanning from the front
    pub fn remove(&mut self, id: ThreadId) -> Option<ThreadRef> {
        let pos = self.threads.iter().position(|e| e.id == id)?;
        self.threads.remove(pos)
    }

    /// Find a thread by ID without removing it
    pub fn find(&self, id: ThreadId) -> Option<&ThreadRef> {
        self.threads.iter().find(|e| e.id == id)
    }

    /// Check membership
    pub fn contains(&self, id: ThreadId) -> bool {
        self.find(id).is_some()
    }

    /// Ids in queue order
    pub fn ids(&self) -> Vec<ThreadId> {
        self.threads.iter().map(|e| e.id).collect()
    }

    /// Take every entry, leaving the queue empty
    pub fn drain(&mut self) -> impl Iterator<Item = ThreadRef> + '_ {
        self.threads.drain(..)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i32) -> ThreadRef {
        ThreadRef::new(ThreadId(id), Priority::Low, Slot(id as usize))
    }

    #[test]
    fn test_queue_init() {
        let mut queue = ThreadQueue::new();
        assert!(queue.is_empty());
        assert!(queue.front().is_none());
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_push_pop_fifo() {
        let mut queue = ThreadQueue::new();
        queue.push(entry(1));
        queue.push(entry(2));
        queue.push(entry(3));
        assert_eq!(queue.len(), 3);

        assert_eq!(queue.pop().unwrap().id, ThreadId(1));
        assert_eq!(queue.pop().unwrap().id, ThreadId(2));
        assert_eq!(queue.pop().unwrap().id, ThreadId(3));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_remove_middle_and_tail() {
        let mut queue = ThreadQueue::new();
        queue.push(entry(1));
        queue.push(entry(2));
        queue.push(entry(3));

        assert_eq!(queue.remove(ThreadId(2)).unwrap().id, ThreadId(2));
        assert_eq!(queue.ids(), vec![ThreadId(1), ThreadId(3)]);

        // Removing the tail, then appending, must keep the order intact
        assert!(queue.remove(ThreadId(3)).is_some());
        queue.push(entry(4));
        assert_eq!(queue.ids(), vec![ThreadId(1), ThreadId(4)]);
    }

    #[test]
    fn test_remove_absent() {
        let mut queue = ThreadQueue::new();
        assert!(queue.remove(ThreadId(9)).is_none());
        queue.push(entry(1));
        assert!(queue.remove(ThreadId(9)).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_find_is_read_only() {
        let mut queue = ThreadQueue::new();
        queue.push(entry(5));
        assert_eq!(queue.find(ThreadId(5)).unwrap().slot, Slot(5));
        assert!(queue.contains(ThreadId(5)));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain() {
        let mut queue = ThreadQueue::new();
        queue.push(entry(1));
        queue.push(entry(2));
        let drained: Vec<_> = queue.drain().map(|e| e.id).collect();
        assert_eq!(drained, vec![ThreadId(1), ThreadId(2)]);
        assert!(queue.is_empty());
    }
}
