//! rusb-backed HID device access
//!
//! Every HID-class interface is exposed as its own device with the path
//! `usb:<bus>:<address>:<interface>`. Opening either direction claims the
//! interface (detaching the kernel driver if needed); the claim is shared by
//! both directions and released when the last handle is dropped.
//!
//! Interrupt transfers are issued with a short timeout. A transfer that has
//! not finished by then is reported as pending and re-issued by the
//! `wait_*` calls with the caller's timeout.

use super::report_descriptor::top_level_usage;
use hidlink_protocol::{
    Completion, DeviceDescriptor, DeviceHandle, DevicePath, Direction, HidBackend, IoError,
    IoStatus,
};
use rusb::{Context, Device, TransferType, UsbContext};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, trace, warn};

const HID_CLASS: u8 = 0x03;

/// Timeout used when a transfer is first issued
const ISSUE_TIMEOUT: Duration = Duration::from_millis(1);

/// Timeout for descriptor and string requests during enumeration
const CONTROL_TIMEOUT: Duration = Duration::from_millis(500);

const GET_DESCRIPTOR: u8 = 0x06;
const REPORT_DESCRIPTOR_TYPE: u16 = 0x22;
const MAX_REPORT_DESCRIPTOR: usize = 4096;

/// Parsed `usb:<bus>:<address>:<interface>` path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UsbPath {
    bus: u8,
    address: u8,
    interface: u8,
}

impl UsbPath {
    fn parse(path: &DevicePath) -> Option<Self> {
        let mut parts = path.as_str().strip_prefix("usb:")?.split(':');
        let bus = parts.next()?.parse().ok()?;
        let address = parts.next()?.parse().ok()?;
        let interface = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            bus,
            address,
            interface,
        })
    }

    fn to_device_path(self) -> DevicePath {
        DevicePath::new(format!(
            "usb:{}:{}:{}",
            self.bus, self.address, self.interface
        ))
    }
}

/// Interrupt endpoints of one HID interface
#[derive(Debug, Clone, Copy, Default)]
struct Endpoints {
    input: Option<(u8, usize)>,
    output: Option<(u8, usize)>,
}

impl Endpoints {
    fn of(&self, direction: Direction) -> Option<(u8, usize)> {
        match direction {
            Direction::Read => self.input,
            Direction::Write => self.output,
        }
    }
}

/// A claimed HID interface shared by the read and write handles
struct ClaimedInterface {
    handle: rusb::DeviceHandle<Context>,
    interface: u8,
    endpoints: Endpoints,
    driver_detached: bool,
    valid: AtomicBool,
}

impl ClaimedInterface {
    fn claim(device: &Device<Context>, path: UsbPath) -> Result<Self, IoError> {
        let endpoints = interface_endpoints(device, path.interface)
            .ok_or(IoError::DeviceNotConnected)?;
        let handle = device.open().map_err(map_rusb_error)?;

        let driver_detached = match handle.kernel_driver_active(path.interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", path.interface);
                match handle.detach_kernel_driver(path.interface) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            path.interface, e
                        );
                        false
                    }
                }
            }
            Ok(false) => false,
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    path.interface, e
                );
                false
            }
        };

        if let Err(e) = handle.claim_interface(path.interface) {
            warn!("Failed to claim interface {}: {}", path.interface, e);
            if driver_detached {
                let _ = handle.attach_kernel_driver(path.interface);
            }
            return Err(map_rusb_error(e));
        }

        debug!("Claimed interface {} of {}", path.interface, path.to_device_path());
        Ok(Self {
            handle,
            interface: path.interface,
            endpoints,
            driver_detached,
            valid: AtomicBool::new(true),
        })
    }
}

impl Drop for ClaimedInterface {
    fn drop(&mut self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            warn!("Failed to release interface {}: {}", self.interface, e);
        }
        if self.driver_detached {
            if let Err(e) = self.handle.attach_kernel_driver(self.interface) {
                debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    self.interface, e
                );
            }
        }
        debug!("Released interface {}", self.interface);
    }
}

/// [`HidBackend`] over libusb
pub struct UsbHidBackend {
    context: Context,
    claims: Mutex<HashMap<DevicePath, Weak<ClaimedInterface>>>,
}

impl UsbHidBackend {
    pub fn new() -> Result<Self, IoError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self {
            context,
            claims: Mutex::new(HashMap::new()),
        })
    }

    fn find_device(&self, path: UsbPath) -> Result<Device<Context>, IoError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        devices
            .iter()
            .find(|d| d.bus_number() == path.bus && d.address() == path.address)
            .ok_or(IoError::DeviceNotConnected)
    }

    fn claim(&self, path: &DevicePath) -> Result<Arc<ClaimedInterface>, IoError> {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(claim) = claims.get(path).and_then(Weak::upgrade) {
            return Ok(claim);
        }

        let usb_path = UsbPath::parse(path).ok_or(IoError::InvalidParameter)?;
        let device = self.find_device(usb_path)?;
        let claim = Arc::new(ClaimedInterface::claim(&device, usb_path)?);
        claims.retain(|_, weak| weak.strong_count() > 0);
        claims.insert(path.clone(), Arc::downgrade(&claim));
        Ok(claim)
    }

    fn describe_interfaces(&self, device: &Device<Context>) -> Vec<DeviceDescriptor> {
        let Ok(desc) = device.device_descriptor() else {
            return Vec::new();
        };
        let Ok(config) = device.active_config_descriptor() else {
            return Vec::new();
        };

        let hid_interfaces: Vec<u8> = config
            .interfaces()
            .filter_map(|iface| iface.descriptors().next())
            .filter(|d| d.class_code() == HID_CLASS)
            .map(|d| d.interface_number())
            .collect();
        if hid_interfaces.is_empty() {
            return Vec::new();
        }

        // Strings and report descriptors need an open handle; without access
        // the interfaces are still listed with what the bus reports.
        let handle = device
            .open()
            .inspect_err(|e| {
                debug!(
                    "Cannot open {:04x}:{:04x}: {}",
                    desc.vendor_id(),
                    desc.product_id(),
                    e
                )
            })
            .ok();
        let read_string = |index: Option<u8>| {
            handle
                .as_ref()
                .zip(index)
                .and_then(|(h, idx)| h.read_string_descriptor_ascii(idx).ok())
                .unwrap_or_default()
        };
        let manufacturer = read_string(desc.manufacturer_string_index());
        let product = read_string(desc.product_string_index());

        hid_interfaces
            .into_iter()
            .map(|interface| {
                let endpoints = interface_endpoints(device, interface).unwrap_or_default();
                let (usage_page, usage) = handle
                    .as_ref()
                    .and_then(|h| read_report_descriptor(h, interface))
                    .and_then(|report| top_level_usage(&report))
                    .unwrap_or((0, 0));
                let path = UsbPath {
                    bus: device.bus_number(),
                    address: device.address(),
                    interface,
                };

                DeviceDescriptor {
                    path: path.to_device_path(),
                    vendor_id: desc.vendor_id(),
                    product_id: desc.product_id(),
                    version: bcd_version(desc.device_version()),
                    usage,
                    usage_page,
                    read_len: endpoints.input.map_or(0, |(_, len)| len),
                    write_len: endpoints.output.map_or(0, |(_, len)| len),
                    manufacturer: manufacturer.clone(),
                    product: product.clone(),
                }
            })
            .collect()
    }
}

impl HidBackend for UsbHidBackend {
    fn enumerate(&self, vendor_filter: Option<u16>) -> Result<Vec<DeviceDescriptor>, IoError> {
        let devices = self.context.devices().map_err(map_rusb_error)?;
        let mut found = Vec::new();

        for device in devices.iter() {
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };
            if vendor_filter.is_some_and(|vid| desc.vendor_id() != vid) {
                continue;
            }
            found.extend(self.describe_interfaces(&device));
        }

        debug!("Enumerated {} HID interface(s)", found.len());
        Ok(found)
    }

    fn open(
        &self,
        path: &DevicePath,
        direction: Direction,
    ) -> Result<Box<dyn DeviceHandle>, IoError> {
        let claim = self.claim(path)?;
        let (endpoint, _) = claim
            .endpoints
            .of(direction)
            .ok_or(IoError::InvalidParameter)?;

        debug!("Opened {} endpoint {:#04x} of {}", direction, endpoint, path);
        Ok(Box::new(UsbHidHandle {
            claim,
            endpoint,
            pending_read: None,
            pending_write: None,
        }))
    }
}

/// One direction of a claimed HID interface
struct UsbHidHandle {
    claim: Arc<ClaimedInterface>,
    endpoint: u8,
    /// Length of the read that timed out at issue
    pending_read: Option<usize>,
    /// Report whose write timed out at issue
    pending_write: Option<Vec<u8>>,
}

impl UsbHidHandle {
    fn interrupt_read(&self, length: usize, timeout: Duration) -> rusb::Result<Vec<u8>> {
        let mut buffer = vec![0u8; length];
        let len = self
            .claim
            .handle
            .read_interrupt(self.endpoint, &mut buffer, timeout)?;
        buffer.truncate(len);
        Ok(buffer)
    }

    fn note_failure(&self, err: &rusb::Error) {
        if matches!(err, rusb::Error::NoDevice) {
            self.claim.valid.store(false, Ordering::Release);
        }
    }
}

impl DeviceHandle for UsbHidHandle {
    fn is_valid(&self) -> bool {
        self.claim.valid.load(Ordering::Acquire)
    }

    fn read(&mut self, length: usize) -> IoStatus<Vec<u8>> {
        match self.interrupt_read(length, ISSUE_TIMEOUT) {
            Ok(report) => IoStatus::Complete(report),
            Err(rusb::Error::Timeout) => {
                self.pending_read = Some(length);
                IoStatus::Pending
            }
            Err(e) => {
                self.note_failure(&e);
                IoStatus::Failed(map_rusb_error(e))
            }
        }
    }

    fn write(&mut self, report: &[u8]) -> IoStatus<usize> {
        match self
            .claim
            .handle
            .write_interrupt(self.endpoint, report, ISSUE_TIMEOUT)
        {
            Ok(written) => IoStatus::Complete(written),
            Err(rusb::Error::Timeout) => {
                self.pending_write = Some(report.to_vec());
                IoStatus::Pending
            }
            Err(e) => {
                self.note_failure(&e);
                IoStatus::Failed(map_rusb_error(e))
            }
        }
    }

    fn wait_read(&mut self, timeout: Duration) -> Completion<Vec<u8>> {
        let Some(length) = self.pending_read else {
            return Completion::Signaled(Err(IoError::InvalidParameter));
        };
        match self.interrupt_read(length, timeout) {
            Ok(report) => {
                self.pending_read = None;
                Completion::Signaled(Ok(report))
            }
            Err(rusb::Error::Timeout) => Completion::TimedOut,
            Err(e) => {
                self.pending_read = None;
                self.note_failure(&e);
                Completion::Signaled(Err(map_rusb_error(e)))
            }
        }
    }

    fn wait_write(&mut self, timeout: Duration) -> Completion<usize> {
        let Some(report) = self.pending_write.as_deref() else {
            return Completion::Signaled(Err(IoError::InvalidParameter));
        };
        match self
            .claim
            .handle
            .write_interrupt(self.endpoint, report, timeout)
        {
            Ok(written) => {
                self.pending_write = None;
                Completion::Signaled(Ok(written))
            }
            Err(rusb::Error::Timeout) => Completion::TimedOut,
            Err(e) => {
                self.pending_write = None;
                self.note_failure(&e);
                Completion::Signaled(Err(map_rusb_error(e)))
            }
        }
    }

    fn cancel(&mut self) {
        if self.pending_read.take().is_some() || self.pending_write.take().is_some() {
            trace!("Cancelled pending transfer on endpoint {:#04x}", self.endpoint);
        }
    }

    fn close(self: Box<Self>) {
        trace!("Closed endpoint {:#04x}", self.endpoint);
    }
}

/// Interrupt endpoints of `interface` in the active configuration
fn interface_endpoints(device: &Device<Context>, interface: u8) -> Option<Endpoints> {
    let config = device.active_config_descriptor().ok()?;
    let iface = config.interfaces().find(|i| i.number() == interface)?;
    let setting = iface.descriptors().next()?;

    let mut endpoints = Endpoints::default();
    for endpoint in setting.endpoint_descriptors() {
        if endpoint.transfer_type() != TransferType::Interrupt {
            continue;
        }
        let entry = Some((endpoint.address(), endpoint.max_packet_size() as usize));
        match endpoint.direction() {
            rusb::Direction::In if endpoints.input.is_none() => endpoints.input = entry,
            rusb::Direction::Out if endpoints.output.is_none() => endpoints.output = entry,
            _ => {}
        }
    }
    Some(endpoints)
}

fn read_report_descriptor(handle: &rusb::DeviceHandle<Context>, interface: u8) -> Option<Vec<u8>> {
    let mut buffer = vec![0u8; MAX_REPORT_DESCRIPTOR];
    let request_type = rusb::request_type(
        rusb::Direction::In,
        rusb::RequestType::Standard,
        rusb::Recipient::Interface,
    );
    let len = handle
        .read_control(
            request_type,
            GET_DESCRIPTOR,
            REPORT_DESCRIPTOR_TYPE << 8,
            interface as u16,
            &mut buffer,
            CONTROL_TIMEOUT,
        )
        .inspect_err(|e| debug!("No report descriptor for interface {}: {}", interface, e))
        .ok()?;
    buffer.truncate(len);
    Some(buffer)
}

/// Pack a device release number back into its BCD form
fn bcd_version(version: rusb::Version) -> u16 {
    let major = version.major() as u16;
    ((major / 10) << 12)
        | ((major % 10) << 8)
        | ((version.minor() as u16) << 4)
        | version.sub_minor() as u16
}

/// Map a rusb error onto the backend error type
///
/// Errors without a dedicated variant keep their libusb code.
pub fn map_rusb_error(err: rusb::Error) -> IoError {
    match err {
        rusb::Error::NoDevice | rusb::Error::NotFound => IoError::DeviceNotConnected,
        rusb::Error::InvalidParam => IoError::InvalidParameter,
        other => IoError::Os {
            code: libusb_code(&other),
            message: other.to_string(),
        },
    }
}

fn libusb_code(err: &rusb::Error) -> i32 {
    match err {
        rusb::Error::Io => -1,
        rusb::Error::InvalidParam => -2,
        rusb::Error::Access => -3,
        rusb::Error::NoDevice => -4,
        rusb::Error::NotFound => -5,
        rusb::Error::Busy => -6,
        rusb::Error::Timeout => -7,
        rusb::Error::Overflow => -8,
        rusb::Error::Pipe => -9,
        rusb::Error::Interrupted => -10,
        rusb::Error::NoMem => -11,
        rusb::Error::NotSupported => -12,
        _ => -99,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_round_trip() {
        let path = UsbPath {
            bus: 3,
            address: 17,
            interface: 1,
        };
        let device_path = path.to_device_path();
        assert_eq!(device_path.as_str(), "usb:3:17:1");
        assert_eq!(UsbPath::parse(&device_path), Some(path));
    }

    #[test]
    fn test_path_rejects_malformed() {
        for bad in ["usb:1:2", "usb:1:2:3:4", "hid:1:2:3", "usb:a:2:3", "usb:1:2:300"] {
            assert_eq!(UsbPath::parse(&DevicePath::new(bad)), None, "{}", bad);
        }
    }

    #[test]
    fn test_map_rusb_error() {
        assert_eq!(map_rusb_error(rusb::Error::NoDevice), IoError::DeviceNotConnected);
        assert_eq!(map_rusb_error(rusb::Error::InvalidParam), IoError::InvalidParameter);
        assert_eq!(map_rusb_error(rusb::Error::Pipe).os_code(), -9);
        assert_eq!(map_rusb_error(rusb::Error::Io).os_code(), -1);
    }

    #[test]
    fn test_bcd_version() {
        assert_eq!(bcd_version(rusb::Version(1, 1, 0)), 0x0110);
        assert_eq!(bcd_version(rusb::Version(2, 0, 5)), 0x0205);
        assert_eq!(bcd_version(rusb::Version(12, 3, 4)), 0x1234);
    }
}
