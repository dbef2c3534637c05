//! Protocol library for hidlink
//!
//! This crate defines the vocabulary shared by the session engine, its
//! consumers and the OS device-access layer:
//!
//! - [`DeviceDescriptor`] and friends, the immutable identity of a device
//! - the numeric return-code taxonomy as typed errors ([`ErrorCode`])
//! - [`ChannelFault`], the fatal errors that end a channel worker
//! - [`HidBackend`] / [`DeviceHandle`], the OS collaborator interface
//!
//! # Example
//!
//! ```
//! use hidlink_protocol::{describe, ErrorCode, WriteError};
//!
//! let err = WriteError::BufferFull;
//! assert_eq!(err.code(), 404);
//! assert!(err.is_retryable());
//! assert_eq!(describe(err.code()), "Write buffer full, retry");
//! ```

pub mod backend;
pub mod error;
pub mod types;

pub use backend::{Completion, DeviceHandle, HidBackend, IoStatus};
pub use error::{
    ChannelFault, ConnectError, DataHandlerError, ErrorCode, ErrorHandlerError, IoError,
    QueryError, ReadError, WriteError, describe,
};
pub use types::{DEFAULT_VENDOR_ID, DeviceDescriptor, DevicePath, Direction};
