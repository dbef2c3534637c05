//! Device channels
//!
//! A channel is one direction of device I/O: an OS handle owned by a worker
//! thread, a ring buffer of fixed-length records and a ready signal. The
//! [`ChannelCore`] is the part shared between the worker and the session;
//! the handle itself never leaves the worker.
//!
//! ```text
//!  read:  device ──► ReadWorker ──► ring ──► dispatcher / read_next
//!  write: write() ──► ring ──► WriteWorker ──► device
//! ```

pub(crate) mod reader;
pub(crate) mod writer;

use hidlink_common::{ReadySignal, RingBuffer};
use hidlink_protocol::{ChannelFault, DeviceHandle, Direction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

pub(crate) use reader::ReadWorker;
pub(crate) use writer::WriteWorker;

/// Session-wide runtime switches read by the workers on every iteration
#[derive(Debug, Default)]
pub(crate) struct SessionFlags {
    pub suppress_duplicates: AtomicBool,
    pub disable_reporting: AtomicBool,
}

impl SessionFlags {
    pub fn new(suppress_duplicates: bool, disable_reporting: bool) -> Self {
        Self {
            suppress_duplicates: AtomicBool::new(suppress_duplicates),
            disable_reporting: AtomicBool::new(disable_reporting),
        }
    }

    pub fn suppress_duplicates(&self) -> bool {
        self.suppress_duplicates.load(Ordering::Relaxed)
    }

    pub fn reporting_disabled(&self) -> bool {
        self.disable_reporting.load(Ordering::Relaxed)
    }
}

/// Fault state of one channel
///
/// `current` persists until the channel is torn down and is what reads and
/// writes report. `latched` is the copy sampled and cleared by the error
/// surfacer.
#[derive(Debug, Default)]
pub(crate) struct FaultState {
    current: Mutex<Option<ChannelFault>>,
    latched: Mutex<Option<ChannelFault>>,
}

impl FaultState {
    pub fn record(&self, fault: ChannelFault) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(fault);
        *self.latched.lock().unwrap_or_else(PoisonError::into_inner) = Some(fault);
    }

    pub fn current(&self) -> Option<ChannelFault> {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn latched(&self) -> Option<ChannelFault> {
        *self.latched.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clear_latched(&self) {
        *self.latched.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// State shared between a channel worker and the session
#[derive(Debug)]
pub(crate) struct ChannelCore {
    pub direction: Direction,
    pub ring: RingBuffer,
    pub ready: ReadySignal,
    pub fault: FaultState,
    active: AtomicBool,
    /// Set by the write worker while it is draining the ring
    draining: AtomicBool,
}

impl ChannelCore {
    pub fn new(direction: Direction, capacity: usize, record_len: usize) -> Self {
        Self {
            direction,
            ring: RingBuffer::new(capacity, record_len),
            ready: ReadySignal::new(),
            fault: FaultState::default(),
            active: AtomicBool::new(true),
            draining: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Ask the worker to stop and wake it if it is waiting for records
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.ready.set();
    }

    pub fn record_len(&self) -> usize {
        self.ring.record_len()
    }

    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::Release);
    }

    /// No record queued and none being handed to the OS
    pub fn is_idle(&self) -> bool {
        self.ring.is_empty() && !self.draining.load(Ordering::Acquire)
    }
}

/// How a worker disposes of its handle on exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandleRelease {
    Close,
    /// Leak the handle; closing it hangs some legacy devices
    Leak,
}

pub(crate) fn release_handle(
    handle: Box<dyn DeviceHandle>,
    release: HandleRelease,
    direction: Direction,
) {
    match release {
        HandleRelease::Close => handle.close(),
        HandleRelease::Leak => {
            warn!("Leaking {} handle: device is known to hang on close", direction);
            std::mem::forget(handle);
        }
    }
}
