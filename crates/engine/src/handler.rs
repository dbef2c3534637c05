//! Consumer callback interfaces
//!
//! Handlers run on the session's dispatch and error threads, never on the
//! caller's thread. Closures with the matching signature implement both
//! traits:
//!
//! ```
//! use hidlink_engine::{DataHandler, SessionHandle};
//! use hidlink_protocol::ChannelFault;
//!
//! fn accepts(_: impl DataHandler) {}
//!
//! accepts(|report: &[u8], _session: &SessionHandle, fault: Option<ChannelFault>| {
//!     if fault.is_none() {
//!         println!("{:02x?}", report);
//!     }
//! });
//! ```

use crate::session::SessionHandle;
use hidlink_protocol::ChannelFault;

/// Receives input reports
pub trait DataHandler: Send + 'static {
    /// Called once per report with `fault == None`
    ///
    /// When the read channel fails the handler is called one last time with
    /// an all-zero payload and `Some(fault)`, after which no further reports
    /// are delivered.
    fn on_report(&mut self, report: &[u8], session: &SessionHandle, fault: Option<ChannelFault>);
}

impl<F> DataHandler for F
where
    F: FnMut(&[u8], &SessionHandle, Option<ChannelFault>) + Send + 'static,
{
    fn on_report(&mut self, report: &[u8], session: &SessionHandle, fault: Option<ChannelFault>) {
        self(report, session, fault)
    }
}

/// Receives fatal channel faults of either direction
pub trait ErrorHandler: Send + 'static {
    fn on_error(&mut self, session: &SessionHandle, fault: ChannelFault);
}

impl<F> ErrorHandler for F
where
    F: FnMut(&SessionHandle, ChannelFault) + Send + 'static,
{
    fn on_error(&mut self, session: &SessionHandle, fault: ChannelFault) {
        self(session, fault)
    }
}
