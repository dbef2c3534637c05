//! Report dispatcher
//!
//! Decouples consumer processing from device I/O: input reports are taken
//! from the read ring on a dedicated thread and handed to the registered
//! [`DataHandler`], one per wake. Once the read channel has failed, the
//! handler receives a single terminal notification with an all-zero payload
//! and the dispatcher exits. Reports still queued at that point are left in
//! the ring for `read_next`.

use crate::channel::{ChannelCore, SessionFlags};
use crate::handler::DataHandler;
use crate::session::SessionHandle;
use hidlink_common::CallbackGuard;
use hidlink_protocol::{ChannelFault, ErrorCode};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, trace};

pub(crate) struct ReportDispatcher {
    pub core: Arc<ChannelCore>,
    pub flags: Arc<SessionFlags>,
    pub handler: Box<dyn DataHandler>,
    pub session: SessionHandle,
    pub guard: Arc<CallbackGuard>,
    pub running: Arc<AtomicBool>,
    pub wait: Duration,
}

impl ReportDispatcher {
    pub fn run(mut self) {
        debug!("Report dispatcher started");
        let mut report = vec![0u8; self.core.record_len()];

        while self.running.load(Ordering::Acquire) {
            // A timed-out wait still falls through to a pop, which bounds the
            // latency of a wake lost between the emptiness check and reset.
            self.core.ready.wait_timeout(self.wait);
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            if self.flags.reporting_disabled() {
                std::thread::sleep(self.wait);
                continue;
            }

            if let Some(fault) = self.core.fault.current() {
                // Reports still queued stay available to read_next
                report.fill(0);
                self.deliver(&report, Some(fault));
                debug!("Read channel failed with code {}, dispatcher exiting", fault.code());
                break;
            }

            if self.core.ring.get(&mut report).is_ok() {
                trace!("Dispatching {} byte report", report.len());
                self.deliver(&report, None);
            }

            if self.core.ring.is_empty() && self.core.fault.current().is_none() {
                self.core.ready.reset();
            }
        }

        debug!("Report dispatcher stopped");
    }

    fn deliver(&mut self, report: &[u8], fault: Option<ChannelFault>) {
        let _token = self.guard.enter();
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.handler.on_report(report, &self.session, fault)
        }));
        if result.is_err() {
            error!("Panic in data handler");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::session::DeviceSession;
    use hidlink_common::test_utils::{
        DEFAULT_TEST_TIMEOUT, MockBackend, mock_descriptor, wait_until,
    };
    use hidlink_protocol::Direction;
    use std::sync::Mutex;

    type Calls = Arc<Mutex<Vec<(Vec<u8>, Option<ChannelFault>)>>>;

    fn dispatcher_for(
        core: Arc<ChannelCore>,
        calls: Calls,
        running: Arc<AtomicBool>,
    ) -> ReportDispatcher {
        let backend = Arc::new(MockBackend::new());
        let descriptor = mock_descriptor("mock:1", 2, 0);
        let session = DeviceSession::new(backend, descriptor, &EngineConfig::default());
        ReportDispatcher {
            core,
            flags: Arc::new(SessionFlags::new(false, false)),
            handler: Box::new(
                move |report: &[u8], _: &SessionHandle, fault: Option<ChannelFault>| {
                    calls.lock().unwrap().push((report.to_vec(), fault));
                },
            ),
            session: session.handle(),
            guard: Arc::new(CallbackGuard::new()),
            running,
            wait: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_fault_takes_precedence_over_queued_reports() {
        let core = Arc::new(ChannelCore::new(Direction::Read, 8, 2));
        core.ring.put(&[1, 1]).unwrap();
        core.ring.put(&[2, 2]).unwrap();
        core.fault.record(ChannelFault::ReadDisconnected);
        core.ready.set();

        let calls: Calls = Arc::default();
        let running = Arc::new(AtomicBool::new(true));
        let dispatcher = dispatcher_for(core.clone(), calls.clone(), running.clone());
        let thread = std::thread::spawn(move || dispatcher.run());

        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || thread.is_finished()));
        thread.join().unwrap();
        assert_eq!(
            *calls.lock().unwrap(),
            vec![(vec![0, 0], Some(ChannelFault::ReadDisconnected))]
        );

        // Queued reports are untouched
        assert_eq!(core.ring.len(), 2);
        let mut report = [0u8; 2];
        core.ring.get(&mut report).unwrap();
        assert_eq!(report, [1, 1]);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_dispatch() {
        let core = Arc::new(ChannelCore::new(Direction::Read, 8, 2));
        let running = Arc::new(AtomicBool::new(true));
        let backend = Arc::new(MockBackend::new());
        let session = DeviceSession::new(
            backend,
            mock_descriptor("mock:1", 2, 0),
            &EngineConfig::default(),
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let guard = Arc::new(CallbackGuard::new());
        let dispatcher = ReportDispatcher {
            core: core.clone(),
            flags: Arc::new(SessionFlags::new(false, false)),
            handler: Box::new({
                let seen = seen.clone();
                move |report: &[u8], _: &SessionHandle, _: Option<ChannelFault>| {
                    seen.lock().unwrap().push(report.to_vec());
                    if report[0] == 1 {
                        panic!("handler failure");
                    }
                }
            }),
            session: session.handle(),
            guard: guard.clone(),
            running: running.clone(),
            wait: Duration::from_millis(5),
        };
        let thread = std::thread::spawn(move || dispatcher.run());

        core.ring.put(&[1, 1]).unwrap();
        core.ring.put(&[2, 2]).unwrap();
        core.ready.set();
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || seen.lock().unwrap().len() == 2));
        assert!(!guard.is_held());

        running.store(false, Ordering::Release);
        core.ready.set();
        thread.join().unwrap();
    }
}
