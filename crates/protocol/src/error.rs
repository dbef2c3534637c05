//! Return-code taxonomy
//!
//! Every failure on the public surface is a typed error with a stable numeric
//! code. The codes are grouped by operation family:
//!
//! | Range | Family                               |
//! |-------|--------------------------------------|
//! | 2xx   | connection (`open`)                  |
//! | 3xx   | reads and fatal read-channel faults  |
//! | 4xx   | writes and fatal write-channel faults|
//! | 5xx   | last-report queries                  |
//! | 7xx   | data handler registration            |
//! | 8xx   | error handler registration           |
//!
//! Zero is never an error code; a successful call returns `Ok`.

use thiserror::Error;

/// Stable numeric code of an error value
pub trait ErrorCode {
    fn code(&self) -> u16;
}

/// Failure reported by the OS device-access layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    #[error("Device handle is invalid")]
    InvalidHandle,

    #[error("Device is not connected")]
    DeviceNotConnected,

    #[error("Invalid parameter")]
    InvalidParameter,

    #[error("OS error {code}: {message}")]
    Os { code: i32, message: String },
}

impl IoError {
    /// Raw code carried into fatal channel faults
    pub fn os_code(&self) -> i32 {
        match self {
            IoError::InvalidHandle => -5,
            IoError::DeviceNotConnected => -4,
            IoError::InvalidParameter => -2,
            IoError::Os { code, .. } => *code,
        }
    }
}

/// Fatal condition that permanently ends a channel worker
///
/// Only close + reopen recovers from a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelFault {
    #[error("OS read failed (os code {os_code})")]
    ReadFailed { os_code: i32 },

    #[error("Device disconnected or handle invalidated during read")]
    ReadDisconnected,

    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Read handle invalid")]
    ReadHandleInvalid,

    #[error("Read handle invalidated by a failed read")]
    ReadHandleLost,

    #[error("OS write failed (os code {os_code})")]
    WriteFailed { os_code: i32 },

    #[error("Short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },

    #[error("Write did not complete in time")]
    WriteTimeout,

    #[error("OS rejected write parameters")]
    WriteInvalidParameter,
}

impl ChannelFault {
    /// Whether the fault belongs to the read channel
    pub fn is_read(&self) -> bool {
        self.code() < 400
    }
}

impl ErrorCode for ChannelFault {
    fn code(&self) -> u16 {
        match self {
            ChannelFault::ReadFailed { .. } => 308,
            ChannelFault::ReadDisconnected => 309,
            ChannelFault::ShortRead { .. } => 310,
            ChannelFault::ReadHandleInvalid => 320,
            ChannelFault::ReadHandleLost => 321,
            ChannelFault::WriteFailed { .. } => 408,
            ChannelFault::ShortWrite { .. } => 410,
            ChannelFault::WriteTimeout => 411,
            ChannelFault::WriteInvalidParameter => 412,
        }
    }
}

/// `open` failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("Session is already connected")]
    AlreadyConnected,

    #[error("Failed to open read handle: {0}")]
    ReadOpenFailed(IoError),

    #[error("Failed to open write handle: {0}")]
    WriteOpenFailed(IoError),

    #[error("Failed to open read ({read}) and write ({write}) handles")]
    BothOpenFailed { read: IoError, write: IoError },

    #[error("Buffer capacity must be non-zero")]
    ZeroCapacity,
}

impl ErrorCode for ConnectError {
    fn code(&self) -> u16 {
        match self {
            ConnectError::AlreadyConnected => 203,
            ConnectError::ReadOpenFailed(_) => 207,
            ConnectError::WriteOpenFailed(_) => 208,
            ConnectError::BothOpenFailed { .. } => 209,
            ConnectError::ZeroCapacity => 210,
        }
    }
}

/// `read_next` / `blocking_read` failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("Read direction is not configured")]
    ReadDisabled,

    #[error("Session is not connected")]
    NotConnected,

    #[error("No report available")]
    Empty,

    #[error("Read channel is unavailable")]
    ChannelUnavailable,

    #[error("Destination too small: need {needed} bytes, got {actual}")]
    DestinationTooSmall { needed: usize, actual: usize },

    #[error("Read channel failed: {0}")]
    Channel(ChannelFault),
}

impl ErrorCode for ReadError {
    fn code(&self) -> u16 {
        match self {
            ReadError::ReadDisabled => 302,
            ReadError::NotConnected => 303,
            ReadError::Empty => 304,
            ReadError::ChannelUnavailable => 305,
            ReadError::DestinationTooSmall { .. } => 311,
            ReadError::Channel(fault) => fault.code(),
        }
    }
}

/// `write` failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("Write direction is not configured")]
    WriteDisabled,

    #[error("Report too short: need {needed} bytes, got {actual}")]
    Undersized { needed: usize, actual: usize },

    #[error("Write buffer full, retry later")]
    BufferFull,

    #[error("Write channel is unavailable")]
    ChannelUnavailable,

    #[error("Session is not connected")]
    NotConnected,

    #[error("Write channel failed: {0}")]
    Channel(ChannelFault),
}

impl WriteError {
    /// Transient backpressure, as opposed to a dead or misused channel
    pub fn is_retryable(&self) -> bool {
        matches!(self, WriteError::BufferFull)
    }
}

impl ErrorCode for WriteError {
    fn code(&self) -> u16 {
        match self {
            WriteError::WriteDisabled => 402,
            WriteError::Undersized { .. } => 403,
            WriteError::BufferFull => 404,
            WriteError::ChannelUnavailable => 405,
            WriteError::NotConnected => 406,
            WriteError::Channel(fault) => fault.code(),
        }
    }
}

/// `read_latest` failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Read direction is not configured")]
    ReadDisabled,

    #[error("Destination too small: need {needed} bytes, got {actual}")]
    DestinationTooSmall { needed: usize, actual: usize },

    #[error("No report received yet")]
    NoData,

    #[error("Read channel is unavailable")]
    ChannelUnavailable,

    #[error("Session is not connected")]
    NotConnected,
}

impl ErrorCode for QueryError {
    fn code(&self) -> u16 {
        match self {
            QueryError::ReadDisabled => 502,
            QueryError::DestinationTooSmall { .. } => 503,
            QueryError::NoData => 504,
            QueryError::ChannelUnavailable => 505,
            QueryError::NotConnected => 507,
        }
    }
}

/// Data handler registration failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DataHandlerError {
    #[error("Session is not connected")]
    NotConnected,

    #[error("Read direction is not available")]
    ReadUnavailable,

    #[error("A data handler is already registered")]
    AlreadyRegistered,

    #[error("Failed to start the dispatch thread (OS error {os_code})")]
    SpawnFailed { os_code: i32 },
}

impl ErrorCode for DataHandlerError {
    fn code(&self) -> u16 {
        match self {
            DataHandlerError::NotConnected => 702,
            DataHandlerError::ReadUnavailable => 703,
            DataHandlerError::AlreadyRegistered => 704,
            DataHandlerError::SpawnFailed { .. } => 705,
        }
    }
}

/// Error handler registration failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorHandlerError {
    #[error("Session is not connected")]
    NotConnected,

    #[error("An error handler is already registered")]
    AlreadyRegistered,

    #[error("Failed to start the error thread (OS error {os_code})")]
    SpawnFailed { os_code: i32 },
}

impl ErrorCode for ErrorHandlerError {
    fn code(&self) -> u16 {
        match self {
            ErrorHandlerError::NotConnected => 802,
            ErrorHandlerError::AlreadyRegistered => 804,
            ErrorHandlerError::SpawnFailed { .. } => 805,
        }
    }
}

/// Translate a numeric code into a human readable message
pub fn describe(code: u16) -> String {
    let message = match code {
        0 => "Success",
        203 => "Device already connected",
        207 => "Cannot open read handle",
        208 => "Cannot open write handle",
        209 => "Cannot open read and write handles",
        210 => "Buffer capacity is zero",
        302 => "Read length is zero",
        303 => "Not connected",
        304 => "No data available",
        305 => "Read channel unavailable",
        308 => "OS read failed",
        309 => "Device disconnected during read",
        310 => "Short read",
        311 => "Read destination too small",
        320 => "Read handle invalid",
        321 => "Read handle invalidated",
        402 => "Write length is zero",
        403 => "Supplied buffer smaller than write length",
        404 => "Write buffer full, retry",
        405 => "Write channel unavailable",
        406 => "Not connected",
        407 => "Write buffer missing",
        408 => "OS write failed",
        410 => "Short write",
        411 => "Write timed out",
        412 => "Invalid write parameter",
        502 => "Read length is zero",
        503 => "Query destination too small",
        504 => "No report received yet",
        505 => "Read channel unavailable",
        507 => "Not connected",
        702 => "Cannot register data handler: not connected",
        703 => "Cannot register data handler: read direction unavailable",
        704 => "Data handler already registered",
        705 => "Cannot start data handler thread",
        802 => "Cannot register error handler: not connected",
        804 => "Error handler already registered",
        805 => "Cannot start error handler thread",
        _ => return format!("Unknown error {}", code),
    };
    message.to_string()
}
