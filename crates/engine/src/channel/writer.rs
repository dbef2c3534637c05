//! Write channel worker
//!
//! Drains the write ring one record at a time and hands each record to the
//! OS. A write that stays pending longer than the completion timeout, or any
//! OS failure, ends the worker. A short write is recorded as a fault but the
//! loop keeps draining.

use super::{ChannelCore, HandleRelease, release_handle};
use hidlink_protocol::{ChannelFault, Completion, DeviceHandle, ErrorCode, IoError, IoStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

pub(crate) struct WriteWorker {
    pub handle: Box<dyn DeviceHandle>,
    pub core: Arc<ChannelCore>,
    pub idle_wait: Duration,
    pub completion_timeout: Duration,
    pub release: HandleRelease,
}

impl WriteWorker {
    pub fn run(mut self) {
        debug!("Write worker started ({} byte records)", self.core.record_len());

        if let Some(fault) = self.write_loop() {
            error!("Write channel failed: {} (code {})", fault, fault.code());
            self.core.fault.record(fault);
        }

        self.handle.cancel();
        release_handle(self.handle, self.release, self.core.direction);
        debug!("Write worker stopped");
    }

    /// Returns the fault that ended the loop, or `None` on shutdown
    fn write_loop(&mut self) -> Option<ChannelFault> {
        let len = self.core.record_len();
        let mut record = vec![0u8; len];

        while self.core.is_active() {
            self.core.set_draining(true);
            while self.core.is_active() && self.core.ring.get(&mut record).is_ok() {
                match self.send(&record)? {
                    Ok(written) if written == len => trace!("Wrote {} byte report", written),
                    Ok(written) => {
                        let fault = ChannelFault::ShortWrite {
                            expected: len,
                            actual: written,
                        };
                        warn!("{}", fault);
                        self.core.fault.record(fault);
                    }
                    Err(fault) => return Some(fault),
                }
            }
            self.core.set_draining(false);

            // Level-triggered: a record queued after the drain keeps the
            // signal set, and the next pass drains it after the reset.
            self.core.ready.wait_timeout(self.idle_wait);
            self.core.ready.reset();
        }

        None
    }

    /// Write one record; `None` if the worker was stopped while it was pending
    fn send(&mut self, record: &[u8]) -> Option<Result<usize, ChannelFault>> {
        match self.handle.write(record) {
            IoStatus::Complete(written) => Some(Ok(written)),
            IoStatus::Failed(err) => Some(Err(write_fault(&err))),
            IoStatus::Pending => self.await_completion(),
        }
    }

    fn await_completion(&mut self) -> Option<Result<usize, ChannelFault>> {
        let deadline = Instant::now() + self.completion_timeout;

        while self.core.is_active() {
            let now = Instant::now();
            if now >= deadline {
                self.handle.cancel();
                return Some(Err(ChannelFault::WriteTimeout));
            }

            match self.handle.wait_write(self.idle_wait.min(deadline - now)) {
                Completion::Signaled(Ok(written)) => return Some(Ok(written)),
                Completion::Signaled(Err(err)) => return Some(Err(write_fault(&err))),
                Completion::TimedOut => continue,
            }
        }
        None
    }
}

fn write_fault(err: &IoError) -> ChannelFault {
    match err {
        IoError::InvalidParameter => ChannelFault::WriteInvalidParameter,
        other => ChannelFault::WriteFailed {
            os_code: other.os_code(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidlink_common::PutOutcome;
    use hidlink_common::test_utils::{
        DEFAULT_TEST_TIMEOUT, MockBackend, MockDevice, WriteMode, mock_descriptor, wait_until,
    };
    use hidlink_protocol::{Direction, HidBackend};
    use std::thread;

    fn spawn_writer(
        completion_timeout: Duration,
    ) -> (Arc<MockDevice>, Arc<ChannelCore>, thread::JoinHandle<()>) {
        let backend = MockBackend::new();
        let device = backend.add_device(mock_descriptor("mock:1", 0, 4));
        let handle = backend.open(&"mock:1".into(), Direction::Write).unwrap();
        let core = Arc::new(ChannelCore::new(Direction::Write, 8, 4));
        let worker = WriteWorker {
            handle,
            core: core.clone(),
            idle_wait: Duration::from_millis(10),
            completion_timeout,
            release: HandleRelease::Close,
        };
        (device, core, thread::spawn(move || worker.run()))
    }

    fn queue(core: &ChannelCore, record: [u8; 4]) {
        assert_eq!(core.ring.try_put(&record).unwrap(), PutOutcome::Stored);
        core.ready.set();
    }

    #[test]
    fn test_records_written_in_order() {
        let (device, core, thread) = spawn_writer(Duration::from_secs(1));
        device.set_write_mode(WriteMode::Deferred);

        for i in 1..=3u8 {
            queue(&core, [i; 4]);
        }
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || device.written().len() == 3));
        assert_eq!(device.written(), vec![vec![1; 4], vec![2; 4], vec![3; 4]]);
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || core.is_idle()));

        core.deactivate();
        thread.join().unwrap();
        assert_eq!(core.fault.current(), None);
        assert_eq!(device.close_count(), 1);
    }

    #[test]
    fn test_short_write_recorded_but_not_fatal() {
        let (device, core, thread) = spawn_writer(Duration::from_secs(1));
        device.set_write_mode(WriteMode::Short(2));

        queue(&core, [1; 4]);
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || core.fault.current().is_some()));
        assert_eq!(
            core.fault.current(),
            Some(ChannelFault::ShortWrite {
                expected: 4,
                actual: 2
            })
        );

        // The worker keeps draining
        device.set_write_mode(WriteMode::Complete);
        queue(&core, [2; 4]);
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || device.written().len() == 2));
        assert!(!thread.is_finished());

        core.deactivate();
        thread.join().unwrap();
    }

    #[test]
    fn test_completion_timeout_is_fatal() {
        let (device, core, thread) = spawn_writer(Duration::from_millis(30));
        device.set_write_mode(WriteMode::NeverComplete);

        queue(&core, [1; 4]);
        thread.join().unwrap();
        assert_eq!(core.fault.current(), Some(ChannelFault::WriteTimeout));
        assert!(device.cancel_count() >= 1);
    }

    #[test]
    fn test_os_failure_is_fatal() {
        let (device, core, thread) = spawn_writer(Duration::from_secs(1));
        device.set_write_mode(WriteMode::Fail(IoError::InvalidParameter));

        queue(&core, [1; 4]);
        thread.join().unwrap();
        assert_eq!(
            core.fault.current(),
            Some(ChannelFault::WriteInvalidParameter)
        );
        assert_eq!(device.close_count(), 1);
    }

    #[test]
    fn test_stop_while_pending() {
        let (device, core, thread) = spawn_writer(Duration::from_secs(10));
        device.stall_writes();

        queue(&core, [1; 4]);
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || core.ring.is_empty()));
        core.deactivate();
        thread.join().unwrap();

        // Abandoned on shutdown rather than reported as a timeout
        assert_eq!(core.fault.current(), None);
        assert!(device.written().is_empty());
    }
}
