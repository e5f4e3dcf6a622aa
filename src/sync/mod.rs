//! Synchronization primitives

pub mod semaphore;

pub use semaphore::{SemCore, Semaphore};
