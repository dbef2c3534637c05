//! Integration tests for the hidlink protocol crate
//!
//! Exercises the public vocabulary the way a backend or consumer would:
//! - return codes stay inside their operation family
//! - descriptors serialize to a stable JSON shape
//! - the backend traits are usable as trait objects

use hidlink_protocol::*;
use std::time::Duration;

#[test]
fn test_codes_stay_in_their_family() {
    let families: [(&str, Vec<u16>, std::ops::Range<u16>); 6] = [
        (
            "connect",
            vec![
                ConnectError::AlreadyConnected.code(),
                ConnectError::ReadOpenFailed(IoError::InvalidHandle).code(),
                ConnectError::WriteOpenFailed(IoError::InvalidHandle).code(),
            ],
            200..300,
        ),
        (
            "read",
            vec![
                ReadError::ReadDisabled.code(),
                ReadError::NotConnected.code(),
                ReadError::Empty.code(),
                ReadError::ChannelUnavailable.code(),
                ReadError::DestinationTooSmall {
                    needed: 8,
                    actual: 1,
                }
                .code(),
                ReadError::Channel(ChannelFault::ReadDisconnected).code(),
            ],
            300..400,
        ),
        (
            "write",
            vec![
                WriteError::WriteDisabled.code(),
                WriteError::BufferFull.code(),
                WriteError::NotConnected.code(),
                WriteError::Channel(ChannelFault::WriteTimeout).code(),
            ],
            400..500,
        ),
        (
            "query",
            vec![QueryError::NoData.code(), QueryError::NotConnected.code()],
            500..600,
        ),
        (
            "data handler",
            vec![
                DataHandlerError::NotConnected.code(),
                DataHandlerError::ReadUnavailable.code(),
                DataHandlerError::SpawnFailed { os_code: 11 }.code(),
            ],
            700..800,
        ),
        (
            "error handler",
            vec![
                ErrorHandlerError::NotConnected.code(),
                ErrorHandlerError::AlreadyRegistered.code(),
                ErrorHandlerError::SpawnFailed { os_code: 11 }.code(),
            ],
            800..900,
        ),
    ];

    for (family, codes, range) in families {
        for code in codes {
            assert!(range.contains(&code), "{} code {} out of range", family, code);
        }
    }
}

#[test]
fn test_read_and_write_faults_are_distinguishable() {
    let read = [
        ChannelFault::ReadFailed { os_code: 1 },
        ChannelFault::ReadDisconnected,
        ChannelFault::ShortRead {
            expected: 8,
            actual: 2,
        },
        ChannelFault::ReadHandleInvalid,
        ChannelFault::ReadHandleLost,
    ];
    let write = [
        ChannelFault::WriteFailed { os_code: 1 },
        ChannelFault::ShortWrite {
            expected: 8,
            actual: 2,
        },
        ChannelFault::WriteTimeout,
        ChannelFault::WriteInvalidParameter,
    ];

    for fault in read {
        assert!(fault.is_read());
        assert_eq!(fault.code() / 100, 3);
    }
    for fault in write {
        assert!(!fault.is_read());
        assert_eq!(fault.code() / 100, 4);
    }
}

#[test]
fn test_error_messages_carry_details() {
    let err = ReadError::DestinationTooSmall {
        needed: 33,
        actual: 8,
    };
    assert_eq!(err.to_string(), "Destination too small: need 33 bytes, got 8");

    let err = WriteError::Channel(ChannelFault::WriteFailed { os_code: 31 });
    assert!(err.to_string().contains("os code 31"));
}

#[test]
fn test_descriptor_serialization() {
    let descriptor = DeviceDescriptor {
        path: DevicePath::new("usb:1:4:0"),
        vendor_id: DEFAULT_VENDOR_ID,
        product_id: 0x0426,
        version: 0x0100,
        usage: 0x0001,
        usage_page: 0x000c,
        read_len: 33,
        write_len: 36,
        manufacturer: "P.I. Engineering".to_string(),
        product: "XK-24".to_string(),
    };

    let json = serde_json::to_string(&descriptor).unwrap();
    assert!(json.contains("\"path\":\"usb:1:4:0\""));
    let back: DeviceDescriptor = serde_json::from_str(&json).unwrap();
    assert_eq!(back, descriptor);
}

/// Backend exposing `idle:0`, whose reads always stay pending
struct IdleBackend;

struct IdleHandle;

impl HidBackend for IdleBackend {
    fn enumerate(&self, _vendor_filter: Option<u16>) -> Result<Vec<DeviceDescriptor>, IoError> {
        Ok(Vec::new())
    }

    fn open(
        &self,
        path: &DevicePath,
        _direction: Direction,
    ) -> Result<Box<dyn DeviceHandle>, IoError> {
        if path.as_str() == "idle:0" {
            Ok(Box::new(IdleHandle))
        } else {
            Err(IoError::DeviceNotConnected)
        }
    }
}

impl DeviceHandle for IdleHandle {
    fn is_valid(&self) -> bool {
        true
    }

    fn read(&mut self, _length: usize) -> IoStatus<Vec<u8>> {
        IoStatus::Pending
    }

    fn write(&mut self, report: &[u8]) -> IoStatus<usize> {
        IoStatus::Complete(report.len())
    }

    fn wait_read(&mut self, _timeout: Duration) -> Completion<Vec<u8>> {
        Completion::TimedOut
    }

    fn wait_write(&mut self, _timeout: Duration) -> Completion<usize> {
        Completion::TimedOut
    }

    fn cancel(&mut self) {}

    fn close(self: Box<Self>) {}
}

#[test]
fn test_backend_as_trait_object() {
    let backend: Box<dyn HidBackend> = Box::new(IdleBackend);
    assert!(backend.enumerate(None).unwrap().is_empty());

    let path: DevicePath = "idle:0".into();
    let mut handle = backend.open(&path, Direction::Read).unwrap();
    assert_eq!(handle.read(8), IoStatus::Pending);
    assert_eq!(
        handle.wait_read(Duration::from_millis(1)),
        Completion::TimedOut
    );
    assert_eq!(handle.write(&[1, 2, 3]), IoStatus::Complete(3));
    handle.cancel();
    handle.close();

    assert_eq!(
        backend.open(&"idle:1".into(), Direction::Write).err(),
        Some(IoError::DeviceNotConnected)
    );
}
