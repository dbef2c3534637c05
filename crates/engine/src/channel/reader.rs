//! Read channel worker
//!
//! Issues reads of exactly one record, awaits pending completions in bounded
//! slices so it stays responsive to shutdown, and pushes every complete
//! record into the ring. The first failure is fatal: the fault is recorded,
//! outstanding I/O is cancelled, the handle is released and the loop ends.

use super::{ChannelCore, HandleRelease, SessionFlags, release_handle};
use hidlink_common::PutOutcome;
use hidlink_protocol::{ChannelFault, Completion, DeviceHandle, ErrorCode, IoError, IoStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

pub(crate) struct ReadWorker {
    pub handle: Box<dyn DeviceHandle>,
    pub core: Arc<ChannelCore>,
    pub flags: Arc<SessionFlags>,
    pub poll: Duration,
    pub release: HandleRelease,
}

impl ReadWorker {
    pub fn run(mut self) {
        debug!("Read worker started ({} byte records)", self.core.record_len());

        if let Some(fault) = self.read_loop() {
            error!("Read channel failed: {} (code {})", fault, fault.code());
            self.core.fault.record(fault);
            // Wake the dispatcher so it can deliver the terminal notification
            self.core.ready.set();
        }

        self.handle.cancel();
        release_handle(self.handle, self.release, self.core.direction);
        debug!("Read worker stopped");
    }

    /// Returns the fault that ended the loop, or `None` on shutdown
    fn read_loop(&mut self) -> Option<ChannelFault> {
        let len = self.core.record_len();

        while self.core.is_active() {
            if !self.handle.is_valid() {
                return Some(ChannelFault::ReadHandleInvalid);
            }

            let report = match self.handle.read(len) {
                IoStatus::Complete(report) => report,
                IoStatus::Failed(err) => return Some(issue_fault(&err)),
                IoStatus::Pending => match self.await_completion()? {
                    Ok(report) => report,
                    Err(err) => return Some(completion_fault(&err)),
                },
            };

            if report.len() != len {
                return Some(ChannelFault::ShortRead {
                    expected: len,
                    actual: report.len(),
                });
            }

            self.store(&report);
        }

        None
    }

    /// Wait for the pending read; `None` if the worker was stopped first
    fn await_completion(&mut self) -> Option<Result<Vec<u8>, IoError>> {
        while self.core.is_active() {
            match self.handle.wait_read(self.poll) {
                Completion::Signaled(result) => return Some(result),
                Completion::TimedOut => continue,
            }
        }
        None
    }

    fn store(&self, report: &[u8]) {
        let outcome = if self.flags.suppress_duplicates() {
            self.core.ring.try_put_if_changed(report)
        } else {
            self.core.ring.put(report)
        };

        match outcome {
            Ok(PutOutcome::Duplicate) => trace!("Suppressed duplicate report"),
            Ok(PutOutcome::Overwrote) => {
                trace!("Read buffer full, oldest report overwritten");
                self.core.ready.set();
            }
            Ok(_) => self.core.ready.set(),
            Err(e) => warn!("Dropped report: {}", e),
        }
    }
}

/// Fault for a read the OS rejected at issue time
fn issue_fault(err: &IoError) -> ChannelFault {
    match err {
        IoError::InvalidHandle => ChannelFault::ReadHandleLost,
        IoError::DeviceNotConnected => ChannelFault::ReadDisconnected,
        other => ChannelFault::ReadFailed {
            os_code: other.os_code(),
        },
    }
}

/// Fault for a pending read that completed with an error
fn completion_fault(err: &IoError) -> ChannelFault {
    match err {
        IoError::InvalidHandle | IoError::DeviceNotConnected => ChannelFault::ReadDisconnected,
        other => ChannelFault::ReadFailed {
            os_code: other.os_code(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidlink_common::test_utils::{
        DEFAULT_TEST_TIMEOUT, MockBackend, mock_descriptor, wait_until,
    };
    use hidlink_protocol::{Direction, HidBackend};
    use std::thread;

    fn spawn_reader(
        backend: &MockBackend,
        suppress: bool,
    ) -> (Arc<ChannelCore>, thread::JoinHandle<()>) {
        let handle = backend.open(&"mock:1".into(), Direction::Read).unwrap();
        let core = Arc::new(ChannelCore::new(Direction::Read, 16, 4));
        let worker = ReadWorker {
            handle,
            core: core.clone(),
            flags: Arc::new(SessionFlags::new(suppress, false)),
            poll: Duration::from_millis(5),
            release: HandleRelease::Close,
        };
        (core, thread::spawn(move || worker.run()))
    }

    #[test]
    fn test_reports_reach_ring_in_order() {
        let backend = MockBackend::new();
        let device = backend.add_device(mock_descriptor("mock:1", 4, 0));
        let (core, thread) = spawn_reader(&backend, false);

        for i in 1..=3u8 {
            device.push_report(vec![i; 4]);
        }
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || core.ring.len() == 3));
        assert!(core.ready.is_set());

        let mut out = [0u8; 4];
        for i in 1..=3u8 {
            core.ring.get(&mut out).unwrap();
            assert_eq!(out, [i; 4]);
        }

        core.deactivate();
        thread.join().unwrap();
        assert_eq!(core.fault.current(), None);
        assert_eq!(device.close_count(), 1);
        assert_eq!(device.cancel_count(), 1);
    }

    #[test]
    fn test_duplicates_suppressed_when_enabled() {
        let backend = MockBackend::new();
        let device = backend.add_device(mock_descriptor("mock:1", 4, 0));
        let (core, thread) = spawn_reader(&backend, true);

        device.push_report(vec![1; 4]);
        device.push_report(vec![1; 4]);
        device.push_report(vec![2; 4]);
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || {
            let mut last = [0u8; 4];
            core.ring.get_last(&mut last).is_ok() && last == [2; 4]
        }));
        assert_eq!(core.ring.len(), 2);

        core.deactivate();
        thread.join().unwrap();
    }

    #[test]
    fn test_short_read_is_fatal() {
        let backend = MockBackend::new();
        let device = backend.add_device(mock_descriptor("mock:1", 4, 0));
        let (core, thread) = spawn_reader(&backend, false);

        device.push_report(vec![1; 2]);
        thread.join().unwrap();
        assert_eq!(
            core.fault.current(),
            Some(ChannelFault::ShortRead {
                expected: 4,
                actual: 2
            })
        );
        assert!(core.ring.is_empty());
    }

    #[test]
    fn test_invalid_handle_is_fatal() {
        let backend = MockBackend::new();
        let device = backend.add_device(mock_descriptor("mock:1", 4, 0));
        device.invalidate();
        let (core, thread) = spawn_reader(&backend, false);

        thread.join().unwrap();
        assert_eq!(core.fault.current(), Some(ChannelFault::ReadHandleInvalid));
        assert_eq!(core.fault.latched(), Some(ChannelFault::ReadHandleInvalid));
        assert!(core.ready.is_set());
    }

    #[test]
    fn test_fault_mapping() {
        assert_eq!(issue_fault(&IoError::InvalidHandle), ChannelFault::ReadHandleLost);
        assert_eq!(
            issue_fault(&IoError::DeviceNotConnected),
            ChannelFault::ReadDisconnected
        );
        assert_eq!(
            completion_fault(&IoError::InvalidHandle),
            ChannelFault::ReadDisconnected
        );
        assert_eq!(
            completion_fault(&IoError::Os {
                code: 31,
                message: "gen failure".to_string()
            }),
            ChannelFault::ReadFailed { os_code: 31 }
        );
    }
}
