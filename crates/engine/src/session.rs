//! Device session façade
//!
//! A [`DeviceSession`] owns one device: its descriptor, lifecycle state,
//! runtime flags and, while connected, up to four background threads:
//!
//! | Thread             | Exists when                          |
//! |--------------------|--------------------------------------|
//! | `hid-read-<pid>`   | read direction opened                |
//! | `hid-write-<pid>`  | write direction opened               |
//! | `hid-dispatch-<pid>` | a data handler is registered       |
//! | `hid-error-<pid>`  | an error handler is registered       |
//!
//! Lifecycle operations take `&mut self`. The data path is available through
//! [`SessionHandle`], which the session derefs to and which handlers receive;
//! a handle cannot close the session.
//!
//! # Example
//!
//! ```
//! use hidlink_common::test_utils::{MockBackend, mock_descriptor};
//! use hidlink_engine::{CloseOutcome, DeviceSession, EngineConfig};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(MockBackend::new());
//! backend.add_device(mock_descriptor("mock:1", 8, 8));
//!
//! let config = EngineConfig::default();
//! let mut sessions = DeviceSession::enumerate(backend, None, &config).unwrap();
//! let session = &mut sessions[0];
//!
//! session.open().unwrap();
//! session.write(&[0u8; 8]).unwrap();
//! assert_eq!(session.close(), CloseOutcome::Closed);
//! ```

use crate::channel::{ChannelCore, HandleRelease, ReadWorker, SessionFlags, WriteWorker};
use crate::config::{EngineConfig, TimingSettings};
use crate::dispatcher::ReportDispatcher;
use crate::handler::{DataHandler, ErrorHandler};
use crate::surfacer::ErrorSurfacer;
use crate::worker::{Worker, thread_name};
use hidlink_common::{CallbackGuard, Clock, PutOutcome, RingError, SystemClock, retry_until};
use hidlink_protocol::{
    ChannelFault, ConnectError, DataHandlerError, DeviceDescriptor, DeviceHandle, Direction,
    ErrorHandlerError, HidBackend, IoError, QueryError, ReadError, WriteError,
};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Result of [`DeviceSession::close`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The session is disconnected
    Closed,
    /// A callback was executing; nothing was done
    CallbackActive,
}

struct Shared {
    descriptor: DeviceDescriptor,
    timing: TimingSettings,
    flags: Arc<SessionFlags>,
    state: Mutex<SessionState>,
    read: Mutex<Option<Arc<ChannelCore>>>,
    write: Mutex<Option<Arc<ChannelCore>>>,
    clock: Arc<dyn Clock>,
}

/// Cloneable data-path view of a session
///
/// Safe to use from any thread, including from inside handlers.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.shared.descriptor
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    fn set_state(&self, state: SessionState) {
        *self.shared.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn channel(&self, direction: Direction) -> Option<Arc<ChannelCore>> {
        let slot = match direction {
            Direction::Read => &self.shared.read,
            Direction::Write => &self.shared.write,
        };
        slot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_channel(&self, direction: Direction, core: Option<Arc<ChannelCore>>) {
        let slot = match direction {
            Direction::Read => &self.shared.read,
            Direction::Write => &self.shared.write,
        };
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = core;
    }

    /// Copy the most recent input report without consuming it
    pub fn read_latest(&self, dest: &mut [u8]) -> Result<(), QueryError> {
        let len = self.shared.descriptor.read_len;
        if len == 0 {
            return Err(QueryError::ReadDisabled);
        }
        if !self.is_connected() {
            return Err(QueryError::NotConnected);
        }
        if dest.len() < len {
            return Err(QueryError::DestinationTooSmall {
                needed: len,
                actual: dest.len(),
            });
        }
        let core = self
            .channel(Direction::Read)
            .ok_or(QueryError::ChannelUnavailable)?;

        core.ring.get_last(dest).map_err(|e| match e {
            RingError::NoLastRecord => QueryError::NoData,
            _ => QueryError::DestinationTooSmall {
                needed: len,
                actual: dest.len(),
            },
        })
    }

    /// Take the oldest queued input report
    ///
    /// Reports queued before a read-channel fault are still returned; once
    /// the queue is empty the fault is reported on every call.
    pub fn read_next(&self, dest: &mut [u8]) -> Result<(), ReadError> {
        let len = self.shared.descriptor.read_len;
        if len == 0 {
            return Err(ReadError::ReadDisabled);
        }
        if !self.is_connected() {
            return Err(ReadError::NotConnected);
        }
        if dest.len() < len {
            return Err(ReadError::DestinationTooSmall {
                needed: len,
                actual: dest.len(),
            });
        }
        let core = self
            .channel(Direction::Read)
            .ok_or(ReadError::ChannelUnavailable)?;

        match core.ring.get(dest) {
            Ok(()) => Ok(()),
            Err(RingError::Empty) => match core.fault.current() {
                Some(fault) => Err(ReadError::Channel(fault)),
                None => Err(ReadError::Empty),
            },
            Err(_) => Err(ReadError::DestinationTooSmall {
                needed: len,
                actual: dest.len(),
            }),
        }
    }

    /// Poll [`SessionHandle::read_next`] until a report arrives or `timeout`
    /// elapses
    ///
    /// Always attempts at least once. [`ReadError::Empty`] is only returned
    /// after the full timeout has elapsed; any other error returns at once.
    pub fn blocking_read(&self, dest: &mut [u8], timeout: Duration) -> Result<(), ReadError> {
        retry_until(
            self.shared.clock.as_ref(),
            timeout,
            self.shared.timing.blocking_read_poll(),
            || self.read_next(dest),
            |e| *e == ReadError::Empty,
        )
    }

    /// Queue an output report
    ///
    /// Only the first `write_len` bytes of `data` are sent. Never blocks on a
    /// full buffer: [`WriteError::BufferFull`] asks the caller to retry.
    pub fn write(&self, data: &[u8]) -> Result<(), WriteError> {
        let len = self.shared.descriptor.write_len;
        if len == 0 {
            return Err(WriteError::WriteDisabled);
        }
        if !self.is_connected() {
            return Err(WriteError::NotConnected);
        }
        if data.len() < len {
            return Err(WriteError::Undersized {
                needed: len,
                actual: data.len(),
            });
        }
        let core = self
            .channel(Direction::Write)
            .ok_or(WriteError::ChannelUnavailable)?;
        if let Some(fault) = core.fault.current() {
            return Err(WriteError::Channel(fault));
        }

        match core.ring.try_put(data) {
            Ok(PutOutcome::Full) => {
                debug!("Write buffer full");
                self.shared
                    .clock
                    .sleep(self.shared.timing.backpressure_pause());
                Err(WriteError::BufferFull)
            }
            Ok(_) => {
                core.ready.set();
                Ok(())
            }
            Err(_) => Err(WriteError::Undersized {
                needed: len,
                actual: data.len(),
            }),
        }
    }

    /// Wait until every queued output report has been handed to the OS
    ///
    /// Returns [`WriteError::BufferFull`] if reports are still queued after
    /// `timeout`, or the write-channel fault if the channel failed. A short
    /// write does not stop the drain and is not reported here.
    pub fn flush(&self, timeout: Duration) -> Result<(), WriteError> {
        if !self.is_connected() {
            return Err(WriteError::NotConnected);
        }
        let core = self
            .channel(Direction::Write)
            .ok_or(WriteError::ChannelUnavailable)?;

        retry_until(
            self.shared.clock.as_ref(),
            timeout,
            self.shared.timing.shutdown_poll(),
            || match core.fault.current() {
                Some(fault) if !matches!(fault, ChannelFault::ShortWrite { .. }) => {
                    Err(WriteError::Channel(fault))
                }
                _ if core.is_idle() => Ok(()),
                _ => Err(WriteError::BufferFull),
            },
            |e| *e == WriteError::BufferFull,
        )
    }

    /// Suppress input reports identical to the previous one
    pub fn set_suppress_duplicates(&self, enabled: bool) {
        self.shared
            .flags
            .suppress_duplicates
            .store(enabled, Ordering::Relaxed);
    }

    pub fn suppress_duplicates(&self) -> bool {
        self.shared.flags.suppress_duplicates()
    }

    /// Pause delivery to the data handler; reports keep being buffered
    pub fn set_disable_reporting(&self, disabled: bool) {
        self.shared
            .flags
            .disable_reporting
            .store(disabled, Ordering::Relaxed);
    }

    pub fn reporting_disabled(&self) -> bool {
        self.shared.flags.reporting_disabled()
    }

    /// Fatal fault of the read channel, if any
    pub fn read_fault(&self) -> Option<ChannelFault> {
        self.channel(Direction::Read)
            .and_then(|core| core.fault.current())
    }

    /// Fault of the write channel, if any
    pub fn write_fault(&self) -> Option<ChannelFault> {
        self.channel(Direction::Write)
            .and_then(|core| core.fault.current())
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("device", &self.shared.descriptor.path)
            .field("state", &self.state())
            .finish()
    }
}

/// One device and the machinery to talk to it
pub struct DeviceSession {
    handle: SessionHandle,
    backend: Arc<dyn HidBackend>,
    capacity: usize,
    release: HandleRelease,
    guard: Arc<CallbackGuard>,
    /// Stops the dispatcher and the error surfacer
    running: Arc<AtomicBool>,
    channel_workers: Vec<Worker>,
    dispatcher: Option<Worker>,
    surfacer: Option<Worker>,
}

impl DeviceSession {
    /// Create a disconnected session for `descriptor`
    pub fn new(
        backend: Arc<dyn HidBackend>,
        descriptor: DeviceDescriptor,
        config: &EngineConfig,
    ) -> Self {
        Self::with_clock(backend, descriptor, config, Arc::new(SystemClock))
    }

    /// Create a session whose timed waits use `clock`
    pub fn with_clock(
        backend: Arc<dyn HidBackend>,
        descriptor: DeviceDescriptor,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let release = if config.quirk_table().skip_handle_close(&descriptor) {
            HandleRelease::Leak
        } else {
            HandleRelease::Close
        };

        let shared = Shared {
            descriptor,
            timing: config.timing.clone(),
            flags: Arc::new(SessionFlags::new(
                config.device.suppress_duplicates,
                config.device.disable_reporting,
            )),
            state: Mutex::new(SessionState::Disconnected),
            read: Mutex::new(None),
            write: Mutex::new(None),
            clock,
        };

        Self {
            handle: SessionHandle {
                shared: Arc::new(shared),
            },
            backend,
            capacity: config.buffer.capacity,
            release,
            guard: Arc::new(CallbackGuard::new()),
            running: Arc::new(AtomicBool::new(false)),
            channel_workers: Vec::new(),
            dispatcher: None,
            surfacer: None,
        }
    }

    /// One disconnected session per device of `vendor`
    ///
    /// `None` uses the vendor id from the configuration.
    pub fn enumerate(
        backend: Arc<dyn HidBackend>,
        vendor: Option<u16>,
        config: &EngineConfig,
    ) -> Result<Vec<DeviceSession>, IoError> {
        let vendor = vendor.unwrap_or(config.device.vendor_id);
        let descriptors = backend.enumerate(Some(vendor))?;
        debug!("Found {} device(s) for vendor {:04x}", descriptors.len(), vendor);
        Ok(descriptors
            .into_iter()
            .map(|descriptor| DeviceSession::new(backend.clone(), descriptor, config))
            .collect())
    }

    /// A data-path handle that outlives borrows of the session
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Whether a consumer callback is currently executing
    pub fn callback_active(&self) -> bool {
        self.guard.is_held()
    }

    /// Open every configured direction and start its worker
    ///
    /// When exactly one of two requested directions fails, the session still
    /// becomes connected with the working half running and the failure of
    /// the other half is returned.
    pub fn open(&mut self) -> Result<(), ConnectError> {
        if self.handle.state() != SessionState::Disconnected {
            return Err(ConnectError::AlreadyConnected);
        }
        if self.capacity == 0 {
            return Err(ConnectError::ZeroCapacity);
        }
        self.handle.set_state(SessionState::Connecting);

        let descriptor = self.handle.descriptor().clone();
        info!("Opening {} ({})", descriptor, descriptor.path);

        let read = descriptor
            .supports(Direction::Read)
            .then(|| self.start_channel(Direction::Read));
        let write = descriptor
            .supports(Direction::Write)
            .then(|| self.start_channel(Direction::Write));

        let requested = read.is_some() || write.is_some();
        let result = match (read, write) {
            (Some(Err(read)), Some(Err(write))) => Err(ConnectError::BothOpenFailed { read, write }),
            (Some(Err(err)), _) => Err(ConnectError::ReadOpenFailed(err)),
            (_, Some(Err(err))) => Err(ConnectError::WriteOpenFailed(err)),
            _ => Ok(()),
        };

        if requested && self.channel_workers.is_empty() {
            self.handle.set_state(SessionState::Disconnected);
            warn!("Failed to open {}: no direction could be opened", descriptor.path);
            return result;
        }

        self.running.store(true, Ordering::Release);
        self.handle.set_state(SessionState::Connected);
        match &result {
            Ok(()) => info!("Connected to {}", descriptor.path),
            Err(e) => warn!("Partially connected to {}: {}", descriptor.path, e),
        }
        result
    }

    fn start_channel(&mut self, direction: Direction) -> Result<(), IoError> {
        let shared = &self.handle.shared;
        let descriptor = &shared.descriptor;
        let handle: Box<dyn DeviceHandle> = self
            .backend
            .open(&descriptor.path, direction)
            .inspect_err(|e| warn!("Failed to open {} handle: {}", direction, e))?;

        let core = Arc::new(ChannelCore::new(
            direction,
            self.capacity,
            descriptor.record_len(direction),
        ));

        let timing = &shared.timing;
        let (role, body): (&str, Box<dyn FnOnce() + Send>) = match direction {
            Direction::Read => {
                let worker = ReadWorker {
                    handle,
                    core: core.clone(),
                    flags: shared.flags.clone(),
                    poll: timing.read_poll(),
                    release: self.release,
                };
                ("read", Box::new(move || worker.run()))
            }
            Direction::Write => {
                let worker = WriteWorker {
                    handle,
                    core: core.clone(),
                    idle_wait: timing.write_idle_wait(),
                    completion_timeout: timing.write_completion_timeout(),
                    release: self.release,
                };
                ("write", Box::new(move || worker.run()))
            }
        };

        let worker = Worker::spawn(thread_name(role, descriptor.product_id), body).map_err(|e| {
            IoError::Os {
                code: e.raw_os_error().unwrap_or(-1),
                message: format!("failed to spawn {} worker: {}", direction, e),
            }
        })?;

        self.handle.set_channel(direction, Some(core));
        self.channel_workers.push(worker);
        Ok(())
    }

    /// Stop every worker and release the device
    ///
    /// Returns [`CloseOutcome::CallbackActive`] without touching anything if
    /// a consumer callback is executing. Workers that do not exit within the
    /// shutdown budget are detached.
    pub fn close(&mut self) -> CloseOutcome {
        if self.guard.is_held() {
            debug!("Close requested during a callback, ignoring");
            return CloseOutcome::CallbackActive;
        }
        self.shutdown();
        CloseOutcome::Closed
    }

    fn shutdown(&mut self) {
        if self.handle.state() == SessionState::Disconnected {
            return;
        }
        self.handle.set_state(SessionState::Closing);
        info!("Closing {}", self.handle.descriptor().path);

        self.running.store(false, Ordering::Release);
        for direction in [Direction::Read, Direction::Write] {
            if let Some(core) = self.handle.channel(direction) {
                core.deactivate();
            }
        }

        let timing = &self.handle.shared.timing;
        let (budget, poll) = (timing.shutdown_budget(), timing.shutdown_poll());
        let workers = self
            .dispatcher
            .take()
            .into_iter()
            .chain(self.surfacer.take())
            .chain(self.channel_workers.drain(..));
        for worker in workers {
            debug!("Stopping {}", worker.name());
            worker.join_within(budget, poll);
        }

        self.handle.set_channel(Direction::Read, None);
        self.handle.set_channel(Direction::Write, None);
        self.handle.set_state(SessionState::Disconnected);
        info!("Closed {}", self.handle.descriptor().path);
    }

    /// Deliver input reports to `handler` on a dedicated thread
    pub fn register_data_handler(
        &mut self,
        handler: impl DataHandler,
    ) -> Result<(), DataHandlerError> {
        if !self.handle.is_connected() {
            return Err(DataHandlerError::NotConnected);
        }
        let core = self
            .handle
            .channel(Direction::Read)
            .ok_or(DataHandlerError::ReadUnavailable)?;
        if self.dispatcher.is_some() {
            return Err(DataHandlerError::AlreadyRegistered);
        }

        let shared = &self.handle.shared;
        let dispatcher = ReportDispatcher {
            core,
            flags: shared.flags.clone(),
            handler: Box::new(handler),
            session: self.handle.clone(),
            guard: self.guard.clone(),
            running: self.running.clone(),
            wait: shared.timing.dispatch_wait(),
        };
        let name = thread_name("dispatch", shared.descriptor.product_id);
        match Worker::spawn(name, move || dispatcher.run()) {
            Ok(worker) => self.dispatcher = Some(worker),
            Err(e) => {
                warn!("Failed to spawn dispatcher: {}", e);
                return Err(DataHandlerError::SpawnFailed {
                    os_code: e.raw_os_error().unwrap_or(-1),
                });
            }
        }
        Ok(())
    }

    /// Deliver channel faults to `handler` on a dedicated thread
    pub fn register_error_handler(
        &mut self,
        handler: impl ErrorHandler,
    ) -> Result<(), ErrorHandlerError> {
        if !self.handle.is_connected() {
            return Err(ErrorHandlerError::NotConnected);
        }
        if self.surfacer.is_some() {
            return Err(ErrorHandlerError::AlreadyRegistered);
        }

        let shared = &self.handle.shared;
        let surfacer = ErrorSurfacer {
            read: self.handle.channel(Direction::Read),
            write: self.handle.channel(Direction::Write),
            handler: Box::new(handler),
            session: self.handle.clone(),
            guard: self.guard.clone(),
            running: self.running.clone(),
            poll: shared.timing.error_poll(),
        };
        let name = thread_name("error", shared.descriptor.product_id);
        match Worker::spawn(name, move || surfacer.run()) {
            Ok(worker) => self.surfacer = Some(worker),
            Err(e) => {
                warn!("Failed to spawn error surfacer: {}", e);
                return Err(ErrorHandlerError::SpawnFailed {
                    os_code: e.raw_os_error().unwrap_or(-1),
                });
            }
        }
        Ok(())
    }
}

impl Deref for DeviceSession {
    type Target = SessionHandle;

    fn deref(&self) -> &SessionHandle {
        &self.handle
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("device", &self.handle.descriptor().path)
            .field("state", &self.handle.state())
            .field("workers", &self.channel_workers.len())
            .field("dispatcher", &self.dispatcher.is_some())
            .field("surfacer", &self.surfacer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidlink_common::test_utils::{MockBackend, mock_descriptor, mock_descriptor_with_ids};
    use hidlink_protocol::ErrorCode;

    fn session(read_len: usize, write_len: usize) -> (Arc<MockBackend>, DeviceSession) {
        let backend = Arc::new(MockBackend::new());
        let descriptor = mock_descriptor("mock:1", read_len, write_len);
        backend.add_device(descriptor.clone());
        let session = DeviceSession::new(backend.clone(), descriptor, &EngineConfig::default());
        (backend, session)
    }

    #[test]
    fn test_lifecycle_state() {
        let (_backend, mut session) = session(8, 8);
        assert_eq!(session.state(), SessionState::Disconnected);

        session.open().unwrap();
        assert_eq!(session.state(), SessionState::Connected);
        assert_eq!(session.open(), Err(ConnectError::AlreadyConnected));

        assert_eq!(session.close(), CloseOutcome::Closed);
        assert_eq!(session.state(), SessionState::Disconnected);

        // Reopen after close
        session.open().unwrap();
        assert!(session.is_connected());
    }

    #[test]
    fn test_disconnected_calls_rejected() {
        let (_backend, mut session) = session(8, 8);
        let mut buf = [0u8; 8];
        assert_eq!(session.read_next(&mut buf), Err(ReadError::NotConnected));
        assert_eq!(session.read_latest(&mut buf), Err(QueryError::NotConnected));
        assert_eq!(session.write(&buf), Err(WriteError::NotConnected));
        assert_eq!(
            session
                .register_data_handler(|_: &[u8], _: &SessionHandle, _: Option<ChannelFault>| {}),
            Err(DataHandlerError::NotConnected)
        );
        assert_eq!(
            session.register_error_handler(|_: &SessionHandle, _: ChannelFault| {}),
            Err(ErrorHandlerError::NotConnected)
        );
        // Closing a disconnected session is harmless
        assert_eq!(session.close(), CloseOutcome::Closed);
    }

    #[test]
    fn test_disabled_directions() {
        let (_backend, mut session) = session(0, 0);
        let mut buf = [0u8; 8];
        assert_eq!(session.read_next(&mut buf), Err(ReadError::ReadDisabled));
        assert_eq!(session.read_latest(&mut buf), Err(QueryError::ReadDisabled));
        assert_eq!(session.write(&buf), Err(WriteError::WriteDisabled));

        session.open().unwrap();
        assert!(session.is_connected());
        assert_eq!(
            session
                .register_data_handler(|_: &[u8], _: &SessionHandle, _: Option<ChannelFault>| {}),
            Err(DataHandlerError::ReadUnavailable)
        );
    }

    #[test]
    fn test_size_checks() {
        let (_backend, mut session) = session(8, 8);
        session.open().unwrap();

        let mut small = [0u8; 4];
        assert_eq!(
            session.read_next(&mut small),
            Err(ReadError::DestinationTooSmall {
                needed: 8,
                actual: 4
            })
        );
        assert_eq!(
            session.read_latest(&mut small),
            Err(QueryError::DestinationTooSmall {
                needed: 8,
                actual: 4
            })
        );
        assert_eq!(
            session.write(&small),
            Err(WriteError::Undersized {
                needed: 8,
                actual: 4
            })
        );

        let mut buf = [0u8; 8];
        assert_eq!(session.read_next(&mut buf), Err(ReadError::Empty));
        assert_eq!(session.read_latest(&mut buf), Err(QueryError::NoData));
    }

    #[test]
    fn test_partial_open_keeps_working_half() {
        let backend = Arc::new(MockBackend::new());
        let descriptor = mock_descriptor("mock:1", 8, 8);
        let device = backend.add_device(descriptor.clone());
        device.fail_open(Direction::Write, IoError::InvalidParameter);
        let mut session = DeviceSession::new(backend, descriptor, &EngineConfig::default());

        assert_eq!(
            session.open(),
            Err(ConnectError::WriteOpenFailed(IoError::InvalidParameter))
        );
        assert!(session.is_connected());
        assert_eq!(session.write(&[0u8; 8]), Err(WriteError::ChannelUnavailable));

        let mut buf = [0u8; 8];
        assert_eq!(session.read_next(&mut buf), Err(ReadError::Empty));
        device.push_report(vec![7; 8]);
        assert!(session.blocking_read(&mut buf, Duration::from_secs(5)).is_ok());
        assert_eq!(buf, [7; 8]);
    }

    #[test]
    fn test_only_direction_failing_stays_disconnected() {
        let backend = Arc::new(MockBackend::new());
        let descriptor = mock_descriptor("mock:1", 8, 0);
        let device = backend.add_device(descriptor.clone());
        device.fail_open(Direction::Read, IoError::DeviceNotConnected);
        let mut session = DeviceSession::new(backend, descriptor, &EngineConfig::default());

        assert_eq!(
            session.open(),
            Err(ConnectError::ReadOpenFailed(IoError::DeviceNotConnected))
        );
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_both_directions_failing_stays_disconnected() {
        let backend = Arc::new(MockBackend::new());
        let descriptor = mock_descriptor("mock:1", 8, 8);
        let device = backend.add_device(descriptor.clone());
        device.fail_open(Direction::Read, IoError::DeviceNotConnected);
        device.fail_open(Direction::Write, IoError::DeviceNotConnected);
        let mut session = DeviceSession::new(backend, descriptor, &EngineConfig::default());

        let err = session.open().unwrap_err();
        assert!(matches!(err, ConnectError::BothOpenFailed { .. }));
        assert_eq!(session.state(), SessionState::Disconnected);

        // The failures were one-shot; a retry succeeds
        session.open().unwrap();
    }

    #[test]
    fn test_zero_capacity_rejected_on_open() {
        let backend = Arc::new(MockBackend::new());
        let descriptor = mock_descriptor("mock:1", 8, 8);
        let device = backend.add_device(descriptor.clone());
        let mut config = EngineConfig::default();
        config.buffer.capacity = 0;
        let mut session = DeviceSession::new(backend, descriptor, &config);

        assert_eq!(session.open(), Err(ConnectError::ZeroCapacity));
        assert_eq!(session.open().unwrap_err().code(), 210);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(device.open_count(), 0);
    }

    #[test]
    fn test_quirk_leaks_handles() {
        let backend = Arc::new(MockBackend::new());
        let descriptor = mock_descriptor_with_ids("mock:legacy", 0x05F3, 0x00FC, 0x0100, 8, 8);
        let device = backend.add_device(descriptor.clone());
        let mut session = DeviceSession::new(backend, descriptor, &EngineConfig::default());

        session.open().unwrap();
        assert_eq!(session.close(), CloseOutcome::Closed);
        assert_eq!(device.open_count(), 2);
        assert_eq!(device.close_count(), 0);
    }

    #[test]
    fn test_close_releases_handles() {
        let backend = Arc::new(MockBackend::new());
        let descriptor = mock_descriptor("mock:1", 8, 8);
        let device = backend.add_device(descriptor.clone());
        let mut session = DeviceSession::new(backend, descriptor, &EngineConfig::default());

        session.open().unwrap();
        session.close();
        assert_eq!(device.close_count(), 2);
        assert!(device.cancel_count() >= 2);
    }

    #[test]
    fn test_drop_shuts_down() {
        let backend = Arc::new(MockBackend::new());
        let descriptor = mock_descriptor("mock:1", 8, 0);
        let device = backend.add_device(descriptor.clone());
        {
            let mut session = DeviceSession::new(backend, descriptor, &EngineConfig::default());
            session.open().unwrap();
        }
        assert_eq!(device.close_count(), 1);
    }

    #[test]
    fn test_flags_follow_config_and_setters() {
        let backend = Arc::new(MockBackend::new());
        let descriptor = mock_descriptor("mock:1", 8, 0);
        backend.add_device(descriptor.clone());
        let mut config = EngineConfig::default();
        config.device.suppress_duplicates = true;
        let session = DeviceSession::new(backend, descriptor, &config);

        assert!(session.suppress_duplicates());
        assert!(!session.reporting_disabled());
        session.set_suppress_duplicates(false);
        session.set_disable_reporting(true);
        assert!(!session.suppress_duplicates());
        assert!(session.reporting_disabled());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Closing.to_string(), "closing");
    }
}
