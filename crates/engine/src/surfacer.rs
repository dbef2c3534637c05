//! Error surfacer
//!
//! Polls the latched fault of both channels at a fixed cadence and hands
//! them to the registered [`ErrorHandler`]. Faults are latched and cleared,
//! not queued: both latches are cleared at the end of every cycle, so a
//! fault recorded between sampling and clearing is never delivered.

use crate::channel::ChannelCore;
use crate::handler::ErrorHandler;
use crate::session::SessionHandle;
use hidlink_common::CallbackGuard;
use hidlink_protocol::{ChannelFault, ErrorCode};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error};

pub(crate) struct ErrorSurfacer {
    pub read: Option<Arc<ChannelCore>>,
    pub write: Option<Arc<ChannelCore>>,
    pub handler: Box<dyn ErrorHandler>,
    pub session: SessionHandle,
    pub guard: Arc<CallbackGuard>,
    pub running: Arc<AtomicBool>,
    pub poll: Duration,
}

impl ErrorSurfacer {
    pub fn run(mut self) {
        debug!("Error surfacer started");
        while self.running.load(Ordering::Acquire) {
            self.cycle();
            std::thread::sleep(self.poll);
        }
        debug!("Error surfacer stopped");
    }

    fn cycle(&mut self) {
        let read = self.read.as_ref().and_then(|core| core.fault.latched());
        let write = self.write.as_ref().and_then(|core| core.fault.latched());

        if let Some(fault) = read {
            self.deliver(fault);
        }
        if let Some(fault) = write {
            self.deliver(fault);
        }

        for core in self.read.iter().chain(self.write.iter()) {
            core.fault.clear_latched();
        }
    }

    fn deliver(&mut self, fault: ChannelFault) {
        debug!("Surfacing channel fault {}", fault.code());
        let _token = self.guard.enter();
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.handler.on_error(&self.session, fault)
        }));
        if result.is_err() {
            error!("Panic in error handler while reporting code {}", fault.code());
        }
    }
}
