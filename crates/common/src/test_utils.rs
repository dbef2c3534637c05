//! Test utilities for hidlink
//!
//! Provides a scriptable in-memory device backend, a manual clock and
//! descriptor builders for testing across crates.
//!
//! # Example
//!
//! ```
//! use hidlink_common::test_utils::{MockBackend, mock_descriptor};
//! use hidlink_protocol::{Direction, HidBackend, IoStatus};
//!
//! let backend = MockBackend::new();
//! let device = backend.add_device(mock_descriptor("mock:1", 8, 0));
//! device.push_report(vec![1; 8]);
//!
//! let mut handle = backend.open(&"mock:1".into(), Direction::Read).unwrap();
//! assert_eq!(handle.read(8), IoStatus::Complete(vec![1; 8]));
//! ```

use crate::clock::Clock;
use hidlink_protocol::{
    Completion, DEFAULT_VENDOR_ID, DeviceDescriptor, DeviceHandle, DevicePath, Direction,
    HidBackend, IoError, IoStatus,
};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a descriptor for a mock device with the default vendor id
///
/// # Example
/// ```
/// use hidlink_common::test_utils::mock_descriptor;
///
/// let desc = mock_descriptor("mock:1", 8, 0);
/// assert_eq!(desc.read_len, 8);
/// assert_eq!(desc.vendor_id, 0x05F3);
/// ```
pub fn mock_descriptor(path: &str, read_len: usize, write_len: usize) -> DeviceDescriptor {
    mock_descriptor_with_ids(path, DEFAULT_VENDOR_ID, 0x00fa, 0x0110, read_len, write_len)
}

/// Create a descriptor with explicit identity
pub fn mock_descriptor_with_ids(
    path: &str,
    vendor_id: u16,
    product_id: u16,
    version: u16,
    read_len: usize,
    write_len: usize,
) -> DeviceDescriptor {
    DeviceDescriptor {
        path: DevicePath::new(path),
        vendor_id,
        product_id,
        version,
        usage: 0x0001,
        usage_page: 0x000c,
        read_len,
        write_len,
        manufacturer: "Test Manufacturer".to_string(),
        product: format!("Test Device {:04x}", product_id),
    }
}

/// Random report payload of `len` bytes
pub fn random_report(len: usize) -> Vec<u8> {
    let mut report = vec![0u8; len];
    rand::rng().fill(report.as_mut_slice());
    report
}

/// Poll `condition` every millisecond until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Clock that only moves when slept on or advanced
///
/// Sleeping returns immediately after advancing the clock, so timeout loops
/// run to completion without real waiting.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner) += duration;
    }

    /// Total simulated time since construction
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// How a mock device completes writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteMode {
    /// Complete synchronously with the full length
    Complete,
    /// Complete asynchronously through `wait_write`
    Deferred,
    /// Complete synchronously with only `n` bytes written
    Short(usize),
    /// Stay pending forever
    NeverComplete,
    /// Reject the write
    Fail(IoError),
}

enum ReadEvent {
    Report(Vec<u8>),
    Fail(IoError),
}

struct DeviceState {
    reads: VecDeque<ReadEvent>,
    written: Vec<Vec<u8>>,
    write_mode: WriteMode,
    writes_stalled: bool,
    invalidated: bool,
    open_failures: [Option<IoError>; 2],
}

/// Scriptable in-memory device
///
/// Reports pushed with [`MockDevice::push_report`] are handed to the read
/// handle in order. Writes are recorded and can be inspected with
/// [`MockDevice::written`].
pub struct MockDevice {
    descriptor: DeviceDescriptor,
    state: Mutex<DeviceState>,
    changed: Condvar,
    opens: AtomicUsize,
    closes: AtomicUsize,
    cancels: AtomicUsize,
}

impl MockDevice {
    fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            state: Mutex::new(DeviceState {
                reads: VecDeque::new(),
                written: Vec::new(),
                write_mode: WriteMode::Complete,
                writes_stalled: false,
                invalidated: false,
                open_failures: [None, None],
            }),
            changed: Condvar::new(),
            opens: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    /// Queue an input report
    pub fn push_report(&self, report: Vec<u8>) {
        self.lock().reads.push_back(ReadEvent::Report(report));
        self.changed.notify_all();
    }

    /// Queue a read failure behind any reports already queued
    pub fn push_read_error(&self, error: IoError) {
        self.lock().reads.push_back(ReadEvent::Fail(error));
        self.changed.notify_all();
    }

    /// Mark every handle to this device as invalid
    pub fn invalidate(&self) {
        self.lock().invalidated = true;
        self.changed.notify_all();
    }

    /// Make the next `open` of `direction` fail
    pub fn fail_open(&self, direction: Direction, error: IoError) {
        self.lock().open_failures[slot(direction)] = Some(error);
    }

    pub fn set_write_mode(&self, mode: WriteMode) {
        self.lock().write_mode = mode;
    }

    /// Hold every write pending until [`MockDevice::release_writes`]
    pub fn stall_writes(&self) {
        self.lock().writes_stalled = true;
    }

    pub fn release_writes(&self) {
        self.lock().writes_stalled = false;
        self.changed.notify_all();
    }

    /// Reports written so far
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn slot(direction: Direction) -> usize {
    match direction {
        Direction::Read => 0,
        Direction::Write => 1,
    }
}

/// In-memory [`HidBackend`]
#[derive(Default)]
pub struct MockBackend {
    devices: Mutex<Vec<Arc<MockDevice>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device and return its control handle
    pub fn add_device(&self, descriptor: DeviceDescriptor) -> Arc<MockDevice> {
        let device = Arc::new(MockDevice::new(descriptor));
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(device.clone());
        device
    }

    fn find(&self, path: &DevicePath) -> Option<Arc<MockDevice>> {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|d| &d.descriptor.path == path)
            .cloned()
    }
}

impl HidBackend for MockBackend {
    fn enumerate(&self, vendor_filter: Option<u16>) -> Result<Vec<DeviceDescriptor>, IoError> {
        Ok(self
            .devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|d| vendor_filter.is_none_or(|vid| d.descriptor.vendor_id == vid))
            .map(|d| d.descriptor.clone())
            .collect())
    }

    fn open(
        &self,
        path: &DevicePath,
        direction: Direction,
    ) -> Result<Box<dyn DeviceHandle>, IoError> {
        let device = self.find(path).ok_or(IoError::DeviceNotConnected)?;
        if let Some(error) = device.lock().open_failures[slot(direction)].take() {
            return Err(error);
        }
        device.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockHandle {
            device,
            direction,
            pending_write: None,
        }))
    }
}

/// One open direction of a [`MockDevice`]
pub struct MockHandle {
    device: Arc<MockDevice>,
    direction: Direction,
    pending_write: Option<Vec<u8>>,
}

impl MockHandle {
    fn take_read(state: &mut DeviceState) -> Option<Result<Vec<u8>, IoError>> {
        if state.invalidated {
            return Some(Err(IoError::InvalidHandle));
        }
        state.reads.pop_front().map(|event| match event {
            ReadEvent::Report(report) => Ok(report),
            ReadEvent::Fail(error) => Err(error),
        })
    }

    fn finish_write(state: &mut DeviceState, report: Vec<u8>) -> Result<usize, IoError> {
        let len = report.len();
        match state.write_mode.clone() {
            WriteMode::Fail(error) => Err(error),
            WriteMode::Short(n) => {
                state.written.push(report);
                Ok(n.min(len))
            }
            _ => {
                state.written.push(report);
                Ok(len)
            }
        }
    }
}

impl DeviceHandle for MockHandle {
    fn is_valid(&self) -> bool {
        !self.device.lock().invalidated
    }

    fn read(&mut self, _length: usize) -> IoStatus<Vec<u8>> {
        debug_assert_eq!(self.direction, Direction::Read);
        let mut state = self.device.lock();
        match Self::take_read(&mut state) {
            Some(Ok(report)) => IoStatus::Complete(report),
            Some(Err(error)) => IoStatus::Failed(error),
            None => IoStatus::Pending,
        }
    }

    fn write(&mut self, report: &[u8]) -> IoStatus<usize> {
        debug_assert_eq!(self.direction, Direction::Write);
        let mut state = self.device.lock();
        if state.invalidated {
            return IoStatus::Failed(IoError::InvalidHandle);
        }
        match state.write_mode {
            WriteMode::Deferred | WriteMode::NeverComplete => {
                self.pending_write = Some(report.to_vec());
                return IoStatus::Pending;
            }
            _ if state.writes_stalled => {
                self.pending_write = Some(report.to_vec());
                return IoStatus::Pending;
            }
            _ => {}
        }
        match Self::finish_write(&mut state, report.to_vec()) {
            Ok(written) => IoStatus::Complete(written),
            Err(error) => IoStatus::Failed(error),
        }
    }

    fn wait_read(&mut self, timeout: Duration) -> Completion<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.device.lock();
        loop {
            if let Some(result) = Self::take_read(&mut state) {
                return Completion::Signaled(result);
            }
            let now = Instant::now();
            if now >= deadline {
                return Completion::TimedOut;
            }
            state = self
                .device
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn wait_write(&mut self, timeout: Duration) -> Completion<usize> {
        let deadline = Instant::now() + timeout;
        let mut state = self.device.lock();
        loop {
            if state.invalidated {
                return Completion::Signaled(Err(IoError::InvalidHandle));
            }
            let completes = !state.writes_stalled && state.write_mode != WriteMode::NeverComplete;
            if completes {
                if let Some(report) = self.pending_write.take() {
                    return Completion::Signaled(Self::finish_write(&mut state, report));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Completion::TimedOut;
            }
            state = self
                .device
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn cancel(&mut self) {
        self.pending_write = None;
        self.device.cancels.fetch_add(1, Ordering::SeqCst);
        self.device.changed.notify_all();
    }

    fn close(self: Box<Self>) {
        self.device.closes.fetch_add(1, Ordering::SeqCst);
    }
}
