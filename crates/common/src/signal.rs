//! Level-triggered ready notification
//!
//! A [`ReadySignal`] is a boolean plus a condition variable. Setting it wakes
//! every waiter and it stays set until explicitly reset, so several inserts
//! between two waits coalesce into a single wake. Consumers are expected to
//! drain until empty before resetting.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct ReadySignal {
    ready: Mutex<bool>,
    changed: Condvar,
}

impl ReadySignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark ready and wake all waiters
    pub fn set(&self) {
        *self.lock() = true;
        self.changed.notify_all();
    }

    /// Mark not ready
    pub fn reset(&self) {
        *self.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Block until the signal is set or `timeout` elapses
    ///
    /// Returns the state of the signal on return; `false` means the wait
    /// timed out. Spurious wakeups are absorbed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut ready = self.lock();
        while !*ready {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(ready, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            ready = guard;
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.ready.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
