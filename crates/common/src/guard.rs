//! Callback re-entrancy guard
//!
//! Held by the dispatcher and the error surfacer for the duration of every
//! consumer callback. Session teardown checks it and refuses to run while any
//! callback is in flight. The guard is released by dropping the
//! [`GuardToken`], so a panicking callback cannot leave it held.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct CallbackGuard {
    active: AtomicUsize,
}

impl CallbackGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the guard until the returned token is dropped
    pub fn enter(&self) -> GuardToken<'_> {
        self.active.fetch_add(1, Ordering::AcqRel);
        GuardToken { guard: self }
    }

    /// Whether any callback currently holds the guard
    pub fn is_held(&self) -> bool {
        self.active.load(Ordering::Acquire) > 0
    }
}

/// Scoped hold on a [`CallbackGuard`]
#[must_use = "the guard is released as soon as the token is dropped"]
#[derive(Debug)]
pub struct GuardToken<'a> {
    guard: &'a CallbackGuard,
}

impl Drop for GuardToken<'_> {
    fn drop(&mut self) {
        self.guard.active.fetch_sub(1, Ordering::AcqRel);
    }
}
