//! Device-specific close quirks
//!
//! Some legacy devices hang the host when their handle is closed. Rather than
//! hard-coding product checks into teardown, quirks are looked up in a table
//! keyed by vendor id, product id and an inclusive firmware version range.
//!
//! # Example Configuration
//! ```toml
//! [[quirks]]
//! vendor_id = 0x05F3
//! product_ids = [0x00FB, 0x00FC]
//! max_version = 272
//! skip_handle_close = true
//! description = "Legacy firmware hangs on close"
//! ```

use hidlink_protocol::{DEFAULT_VENDOR_ID, DeviceDescriptor};
use serde::{Deserialize, Serialize};

/// One quirk entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceQuirk {
    pub vendor_id: u16,
    /// Product ids covered by this entry (empty = every product of the vendor)
    #[serde(default)]
    pub product_ids: Vec<u16>,
    /// Lowest affected firmware version, inclusive
    #[serde(default)]
    pub min_version: Option<u16>,
    /// Highest affected firmware version, inclusive
    #[serde(default)]
    pub max_version: Option<u16>,
    /// Leak the OS handle instead of closing it
    #[serde(default)]
    pub skip_handle_close: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl DeviceQuirk {
    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        self.vendor_id == device.vendor_id
            && (self.product_ids.is_empty() || self.product_ids.contains(&device.product_id))
            && self.min_version.is_none_or(|min| device.version >= min)
            && self.max_version.is_none_or(|max| device.version <= max)
    }
}

/// Ordered collection of quirks; every matching entry applies
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuirkTable {
    entries: Vec<DeviceQuirk>,
}

impl QuirkTable {
    pub fn new(entries: Vec<DeviceQuirk>) -> Self {
        Self { entries }
    }

    /// Quirks known to affect shipped hardware
    pub fn builtin() -> Self {
        Self::new(builtin_quirks())
    }

    pub fn entries(&self) -> &[DeviceQuirk] {
        &self.entries
    }

    /// Entries matching `device`
    pub fn matching<'a>(
        &'a self,
        device: &'a DeviceDescriptor,
    ) -> impl Iterator<Item = &'a DeviceQuirk> + 'a {
        self.entries.iter().filter(move |q| q.matches(device))
    }

    /// Whether handles to `device` must be leaked rather than closed
    pub fn skip_handle_close(&self, device: &DeviceDescriptor) -> bool {
        self.matching(device).any(|q| q.skip_handle_close)
    }
}

/// Built-in quirk entries
pub fn builtin_quirks() -> Vec<DeviceQuirk> {
    vec![DeviceQuirk {
        vendor_id: DEFAULT_VENDOR_ID,
        product_ids: vec![0x00FB, 0x00FC, 0x00FD, 0x00FE, 0x00FF],
        min_version: None,
        max_version: Some(272),
        skip_handle_close: true,
        description: Some("Legacy firmware hangs when its handle is closed".to_string()),
    }]
}
