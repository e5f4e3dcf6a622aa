//! udthread - user-space threads on a single OS thread
//!
//! A small kernel living in user space: logical threads with their own
//! stacks, a two-class priority scheduler with timer-driven preemption,
//! counting semaphores and mailbox message passing. Everything is
//! multiplexed onto the OS thread that calls [`Runtime::init`].
//!
//! ```no_run
//! use udthread::{Priority, Runtime, ThreadId};
//!
//! let rt = Runtime::init();
//! let worker = rt.clone();
//! rt.create(1, Priority::High, move |id| {
//!     worker.send(ThreadId::MAIN, format!("hello from {id}").as_bytes());
//! });
//! let (sender, data) = rt.receive(ThreadId::WILDCARD).unwrap();
//! assert_eq!(sender, ThreadId(1));
//! assert_eq!(data, b"hello from 1");
//! rt.shutdown();
//! ```

// Kernel-style types carry specialized constructors
#![allow(clippy::new_without_default)]

extern crate alloc;

// Core types
pub mod config;
pub mod error;
pub mod types;

pub mod console;
pub mod ipc;
pub mod kern;
pub mod runtime;
pub mod sync;

pub use config::RuntimeConfig;
pub use error::{RuntimeError, RuntimeResult};
pub use ipc::Mailbox;
pub use kern::SchedStats;
pub use runtime::Runtime;
pub use sync::Semaphore;
pub use types::{Priority, ThreadId};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
