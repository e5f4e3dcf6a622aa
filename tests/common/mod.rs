//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use udthread::{Runtime, RuntimeConfig};

/// Runtime without the preemption ticker, so interleavings are exact
pub fn runtime() -> Runtime {
    Runtime::with_config(RuntimeConfig::default().without_preemption())
}

/// Yield until the bootstrap thread is the only thread left
///
/// Only valid when every other thread can run to completion.
pub fn drain(rt: &Runtime) {
    while rt.thread_count() > 1 {
        rt.yield_now();
    }
}

/// Event log shared between threads
#[derive(Clone)]
pub struct Trace<T>(Rc<RefCell<Vec<T>>>);

impl<T: Clone> Trace<T> {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(Vec::new())))
    }

    pub fn push(&self, event: T) {
        self.0.borrow_mut().push(event);
    }

    pub fn events(&self) -> Vec<T> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}
