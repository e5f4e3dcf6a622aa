//! Thread Control Blocks
//!
//! A [`Thread`] is one logical thread: its id, scheduling class, saved
//! context, private stack and private mailbox. Threads live in a
//! [`ThreadTable`] arena and are referred to everywhere else by [`Slot`]
//! handles, so the table is the single owner of every TCB.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use core::fmt;

use crate::error::{RuntimeError, RuntimeResult};
use crate::ipc::mailbox::{MailboxCore, SharedMailbox};
use crate::kern::context::{Context, EntryFn, FRAME_BYTES};
use crate::types::{Priority, ThreadId};

/// Entry function of a created thread
pub type ThreadEntry = Box<dyn FnOnce(ThreadId) + 'static>;

// ============================================================================
// Thread State
// ============================================================================

/// Where a thread currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Occupies the running slot
    Running,
    /// Waiting in a ready queue
    Ready,
    /// Parked on a semaphore wait queue
    Blocked,
    /// Terminated, waiting for its stack to be released
    Zombie,
}

// ============================================================================
// Stack
// ============================================================================

/// Heap-allocated thread stack
pub struct Stack {
    mem: Box<[u8]>,
}

impl Stack {
    /// Allocate a zeroed stack of `size` bytes
    pub fn new(size: usize) -> RuntimeResult<Self> {
        if size < FRAME_BYTES + 16 {
            return Err(RuntimeError::StackAllocation(size));
        }
        let mut mem = Vec::new();
        mem.try_reserve_exact(size)
            .map_err(|_| RuntimeError::StackAllocation(size))?;
        mem.resize(size, 0u8);
        Ok(Self {
            mem: mem.into_boxed_slice(),
        })
    }

    /// One past the highest address of the stack
    pub fn top(&self) -> usize {
        self.mem.as_ptr() as usize + self.mem.len()
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.mem.len()
    }

    /// Always false for an allocated stack
    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("base", &self.mem.as_ptr())
            .field("len", &self.mem.len())
            .finish()
    }
}

// ============================================================================
// Thread
// ============================================================================

/// Thread control block
pub struct Thread {
    /// Thread ID
    pub id: ThreadId,
    /// Scheduling class
    pub priority: Priority,
    /// Current state
    pub state: ThreadState,
    /// Thread that was running when this one was created; control returns
    /// there when the entry function returns. Cleared once the creator
    /// terminates, so a later thread reusing its id is never mistaken for it.
    pub creator: Option<ThreadId>,
    /// Private mailbox for targeted messages
    pub mailbox: SharedMailbox,
    context: UnsafeCell<Context>,
    stack: Option<Stack>,
    entry: Option<ThreadEntry>,
}

impl Thread {
    /// TCB for the bootstrap thread
    ///
    /// Its context is captured from the ambient process state on the first
    /// switch away; it owns no stack.
    pub fn bootstrap() -> Self {
        Self {
            id: ThreadId::MAIN,
            priority: Priority::Low,
            state: ThreadState::Running,
            creator: None,
            mailbox: MailboxCore::shared(),
            context: UnsafeCell::new(Context::empty()),
            stack: None,
            entry: None,
        }
    }

    /// TCB for a created thread, ready to start at `start(arg)`
    pub fn spawn(
        id: ThreadId,
        priority: Priority,
        creator: ThreadId,
        stack: Stack,
        entry: ThreadEntry,
        start: EntryFn,
        arg: *const (),
    ) -> Self {
        // SAFETY: the stack is owned by this TCB and outlives the context
        let context = unsafe { Context::prepare(stack.top(), start, arg) };
        Self {
            id,
            priority,
            state: ThreadState::Ready,
            creator: Some(creator),
            mailbox: MailboxCore::shared(),
            context: UnsafeCell::new(context),
            stack: Some(stack),
            entry: Some(entry),
        }
    }

    /// Raw pointer to the saved context, for [`switch`](crate::kern::context::switch)
    pub fn context_ptr(&self) -> *mut Context {
        self.context.get()
    }

    /// Whether the context can be resumed
    pub fn has_context(&mut self) -> bool {
        self.context.get_mut().is_captured()
    }

    /// Take the entry function (first run only)
    pub fn take_entry(&mut self) -> Option<ThreadEntry> {
        self.entry.take()
    }

    /// Whether this TCB owns a dynamically allocated stack
    pub fn has_stack(&self) -> bool {
        self.stack.is_some()
    }

    /// Give up ownership of the stack without freeing it
    pub fn leak_stack(&mut self) {
        if let Some(stack) = self.stack.take() {
            core::mem::forget(stack);
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("state", &self.state)
            .field("creator", &self.creator)
            .field("stack", &self.stack)
            .field("started", &self.entry.is_none())
            .finish()
    }
}

// ============================================================================
// Thread Table
// ============================================================================

/// Index of a TCB in the [`ThreadTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(pub usize);

/// Arena owning every live TCB
///
/// TCBs are boxed so their contexts keep a fixed address while the table
/// grows.
#[derive(Debug, Default)]
pub struct ThreadTable {
    slots: Vec<Option<Box<Thread>>>,
    free: Vec<usize>,
}

impl ThreadTable {
    /// Create an empty table
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Store a TCB, reusing a free slot when one exists
    pub fn insert(&mut self, thread: Box<Thread>) -> Slot {
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(thread);
                Slot(index)
            }
            None => {
                self.slots.push(Some(thread));
                Slot(self.slots.len() - 1)
            }
        }
    }

    /// Borrow a TCB
    pub fn get(&self, slot: Slot) -> Option<&Thread> {
        self.slots.get(slot.0)?.as_deref()
    }

    /// Mutably borrow a TCB
    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut Thread> {
        self.slots.get_mut(slot.0)?.as_deref_mut()
    }

    /// Remove a TCB, handing ownership to the caller
    pub fn take(&mut self, slot: Slot) -> Option<Box<Thread>> {
        let thread = self.slots.get_mut(slot.0)?.take()?;
        self.free.push(slot.0);
        Some(thread)
    }

    /// Number of live TCBs
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Whether no TCB is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mutably visit every live TCB
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Thread> + '_ {
        self.slots.iter_mut().filter_map(|slot| slot.as_deref_mut())
    }

    /// Remove every TCB
    pub fn drain(&mut self) -> impl Iterator<Item = Box<Thread>> + '_ {
        self.free.clear();
        self.slots.drain(..).flatten()
    }
}
