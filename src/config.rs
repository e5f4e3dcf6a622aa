//! Runtime configuration
//!
//! Time quantum and stack sizing, with environment overrides for drivers
//! that do not want to hard-code them.

use std::time::Duration;

/// Default time quantum in milliseconds
pub const TIME_QUANTUM_MS: u64 = 10;

/// Default stack size for created threads
pub const DEFAULT_STACK_SIZE: usize = 0x10000;

/// Smallest stack the runtime will hand out
pub const MIN_STACK_SIZE: usize = 0x4000;

/// Environment variable overriding the quantum (milliseconds, 0 disables)
pub const ENV_QUANTUM_MS: &str = "UDTHREAD_QUANTUM_MS";

/// Environment variable overriding the stack size (bytes)
pub const ENV_STACK_SIZE: &str = "UDTHREAD_STACK_SIZE";

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Preemption interval; `None` disables the ticker entirely
    pub quantum: Option<Duration>,
    /// Stack size for every created thread
    pub stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            quantum: Some(Duration::from_millis(TIME_QUANTUM_MS)),
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `UDTHREAD_QUANTUM_MS` / `UDTHREAD_STACK_SIZE`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_QUANTUM_MS) {
            match raw.trim().parse::<u64>() {
                Ok(0) => config.quantum = None,
                Ok(ms) => config.quantum = Some(Duration::from_millis(ms)),
                Err(_) => log::warn!("ignoring {ENV_QUANTUM_MS}={raw:?}: not a number"),
            }
        }

        if let Some(raw) = lookup(ENV_STACK_SIZE) {
            match raw.trim().parse::<usize>() {
                Ok(size) => config = config.with_stack_size(size),
                Err(_) => log::warn!("ignoring {ENV_STACK_SIZE}={raw:?}: not a number"),
            }
        }

        config
    }

    /// Set the preemption interval
    pub fn with_quantum(mut self, quantum: Duration) -> Self {
        self.quantum = if quantum.is_zero() { None } else { Some(quantum) };
        self
    }

    /// Disable timer-driven preemption
    pub fn without_preemption(mut self) -> Self {
        self.quantum = None;
        self
    }

    /// Set the per-thread stack size (rounded up to the minimum)
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = size.max(MIN_STACK_SIZE);
        self
    }
}
