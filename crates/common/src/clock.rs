//! Injectable time source
//!
//! Every polling wait in the engine that is measured against wall time goes
//! through a [`Clock`], so tests can substitute a manual clock and observe
//! timeout behaviour deterministically.

use std::time::{Duration, Instant};

/// Monotonic time source with a sleep primitive
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// The real monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Repeat `attempt` every `interval` until it succeeds, fails with a
/// non-retryable error, or `timeout` has elapsed
///
/// The attempt always runs at least once. A retryable failure is only
/// returned once the elapsed time has reached `timeout`; the final sleep is
/// shortened so the deadline is not overshot by more than one attempt.
pub fn retry_until<T, E>(
    clock: &dyn Clock,
    timeout: Duration,
    interval: Duration,
    mut attempt: impl FnMut() -> Result<T, E>,
    retryable: impl Fn(&E) -> bool,
) -> Result<T, E> {
    let start = clock.now();
    loop {
        let err = match attempt() {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if !retryable(&err) {
            return Err(err);
        }

        let elapsed = clock.now().saturating_duration_since(start);
        if elapsed >= timeout {
            return Err(err);
        }
        clock.sleep(interval.min(timeout - elapsed));
    }
}
