//! Device identity types
//!
//! This module defines the immutable description of an attached HID device
//! as produced by enumeration, plus the small value types used to address a
//! device and one of its I/O directions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vendor id enumerated when the caller does not ask for a specific one
pub const DEFAULT_VENDOR_ID: u16 = 0x05F3;

/// Identity token for an attached device interface
///
/// The format is owned by the backend that produced it. The rusb backend
/// uses `usb:<bus>:<address>:<interface>`, mock backends use anything unique.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevicePath(pub String);

impl DevicePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DevicePath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One direction of device I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Input reports (device -> host)
    Read,
    /// Output reports (host -> device)
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// Device information returned by enumeration
///
/// Immutable for the life of a session. A record length of zero disables the
/// corresponding direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Backend-specific identity token
    pub path: DevicePath,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Firmware version (BCD, as reported by the device descriptor)
    pub version: u16,
    /// HID usage of the top-level collection
    pub usage: u16,
    /// HID usage page of the top-level collection
    pub usage_page: u16,
    /// Input report length in bytes (0 = no read direction)
    pub read_len: usize,
    /// Output report length in bytes (0 = no write direction)
    pub write_len: usize,
    /// Manufacturer string (empty if the device has none)
    pub manufacturer: String,
    /// Product string (empty if the device has none)
    pub product: String,
}

impl DeviceDescriptor {
    /// Record length for the given direction
    pub fn record_len(&self, direction: Direction) -> usize {
        match direction {
            Direction::Read => self.read_len,
            Direction::Write => self.write_len,
        }
    }

    /// Whether the given direction is configured at all
    pub fn supports(&self, direction: Direction) -> bool {
        self.record_len(direction) > 0
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} v{:04x} {} {}",
            self.vendor_id, self.product_id, self.version, self.manufacturer, self.product
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(read_len: usize, write_len: usize) -> DeviceDescriptor {
        DeviceDescriptor {
            path: DevicePath::new("test:1"),
            vendor_id: DEFAULT_VENDOR_ID,
            product_id: 0x00fa,
            version: 0x0110,
            usage: 1,
            usage_page: 0x000c,
            read_len,
            write_len,
            manufacturer: "P.I. Engineering".to_string(),
            product: "Pedal".to_string(),
        }
    }

    #[test]
    fn test_direction_support() {
        let desc = descriptor(8, 0);
        assert!(desc.supports(Direction::Read));
        assert!(!desc.supports(Direction::Write));
        assert_eq!(desc.record_len(Direction::Read), 8);
    }

    #[test]
    fn test_descriptor_display() {
        let desc = descriptor(8, 8);
        assert_eq!(desc.to_string(), "05f3:00fa v0110 P.I. Engineering Pedal");
    }

    #[test]
    fn test_descriptor_json_shape() {
        let desc = descriptor(33, 36);
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["path"], "test:1");
        assert_eq!(json["read_len"], 33);
        let back: DeviceDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back, desc);
    }
}
