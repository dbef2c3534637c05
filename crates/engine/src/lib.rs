//! hidlink engine
//!
//! Buffered, callback-driven sessions over HID devices. A [`DeviceSession`]
//! runs a read worker and a write worker per device, each with its own ring
//! buffer, and optionally a dispatcher thread feeding input reports to a
//! [`DataHandler`] and a surfacer thread feeding channel faults to an
//! [`ErrorHandler`].
//!
//! The OS device layer is pluggable through
//! [`HidBackend`](hidlink_protocol::HidBackend); [`UsbHidBackend`] talks to
//! real hardware through libusb.

mod channel;
pub mod config;
mod dispatcher;
pub mod handler;
pub mod quirks;
pub mod session;
mod surfacer;
pub mod usb;
mod worker;

pub use config::{EngineConfig, load_config};
pub use handler::{DataHandler, ErrorHandler};
pub use quirks::{DeviceQuirk, QuirkTable, builtin_quirks};
pub use session::{CloseOutcome, DeviceSession, SessionHandle, SessionState};
pub use usb::UsbHidBackend;
