//! OS device-access interface
//!
//! The engine never talks to the operating system directly. Enumeration and
//! the per-handle I/O primitives are supplied by a [`HidBackend`]; the engine
//! only relies on success/failure reporting and cancellation.
//!
//! I/O follows the overlapped model: an operation is *issued* and either
//! completes immediately or is reported as [`IoStatus::Pending`], after which
//! the caller awaits completion with a bounded timeout.
//!
//! ```text
//! read(len) ──► Complete(bytes)
//!          └──► Pending ──► wait_read(timeout) ──► Signaled(Ok(bytes))
//!                                             ├──► Signaled(Err(e))
//!                                             └──► TimedOut (still pending)
//! ```

use crate::error::IoError;
use crate::types::{DeviceDescriptor, DevicePath, Direction};
use std::time::Duration;

/// Outcome of issuing an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IoStatus<T> {
    /// Finished synchronously
    Complete(T),
    /// Accepted; await with `wait_read` / `wait_write`
    Pending,
    /// Rejected by the OS
    Failed(IoError),
}

/// Outcome of awaiting a pending operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T> {
    /// The operation finished, successfully or not
    Signaled(Result<T, IoError>),
    /// The timeout elapsed; the operation is still outstanding
    TimedOut,
}

/// Device discovery and handle acquisition
pub trait HidBackend: Send + Sync {
    /// List attached devices, optionally restricted to one vendor
    fn enumerate(&self, vendor_filter: Option<u16>) -> Result<Vec<DeviceDescriptor>, IoError>;

    /// Open one direction of a device
    fn open(
        &self,
        path: &DevicePath,
        direction: Direction,
    ) -> Result<Box<dyn DeviceHandle>, IoError>;
}

/// One open direction of a device
///
/// A handle is owned by exactly one worker thread at a time.
pub trait DeviceHandle: Send {
    /// Whether the handle still refers to an open device
    fn is_valid(&self) -> bool;

    /// Issue a read of exactly `length` bytes
    fn read(&mut self, length: usize) -> IoStatus<Vec<u8>>;

    /// Issue a write of `report`; completes with the number of bytes written
    fn write(&mut self, report: &[u8]) -> IoStatus<usize>;

    /// Await a pending read
    fn wait_read(&mut self, timeout: Duration) -> Completion<Vec<u8>>;

    /// Await a pending write
    fn wait_write(&mut self, timeout: Duration) -> Completion<usize>;

    /// Abandon any outstanding operation
    fn cancel(&mut self);

    /// Release the handle
    fn close(self: Box<Self>);
}
