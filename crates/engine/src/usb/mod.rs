//! USB subsystem
//!
//! A [`HidBackend`](hidlink_protocol::HidBackend) on top of `rusb`. Each HID
//! interface of an attached device is one enumerable device; its interrupt
//! endpoints carry the input and output reports.

pub mod backend;
pub mod report_descriptor;

pub use backend::{UsbHidBackend, map_rusb_error};
pub use report_descriptor::top_level_usage;
