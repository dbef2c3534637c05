//! Common utilities for hidlink
//!
//! Concurrency building blocks shared by the session engine: the fixed-record
//! [`RingBuffer`], the level-triggered [`ReadySignal`], the callback
//! re-entrancy [`CallbackGuard`] and the injectable [`Clock`]. Also hosts
//! logging setup and the mock device backend used by tests across crates.

pub mod clock;
pub mod error;
pub mod guard;
pub mod logging;
pub mod ring;
pub mod signal;
pub mod test_utils;

pub use clock::{Clock, SystemClock, retry_until};
pub use error::{Error, Result};
pub use guard::{CallbackGuard, GuardToken};
pub use logging::setup_logging;
pub use ring::{PutOutcome, RingBuffer, RingError};
pub use signal::ReadySignal;
