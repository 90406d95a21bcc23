//! Protocol Error Types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the device could not be located or claimed
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimError {
    #[error("No USB devices found")]
    NoDevices,

    #[error("PEQ Link device not found ({present} other USB devices present)")]
    NoMatchingDevice { present: usize },

    #[error("Device found but the driver is not installed: {0}")]
    DriverUnavailable(String),

    #[error("Device found but access was denied: {0}")]
    AccessDenied(String),

    #[error("Failed to open device: {0}")]
    Other(String),
}

impl ClaimError {
    /// Whether the device itself was seen on the bus
    pub fn device_present(&self) -> bool {
        matches!(
            self,
            ClaimError::DriverUnavailable(_) | ClaimError::AccessDenied(_) | ClaimError::Other(_)
        )
    }
}

/// Errors from a single exchange with the device
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("No device connected")]
    NotConnected,

    #[error("Device was removed")]
    DeviceGone,

    #[error("Transfer timed out")]
    Timeout,

    #[error("USB transfer failed: {0}")]
    Usb(String),

    #[error("Short write: sent {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },

    #[error("Short read: got {got} of {expected} bytes")]
    ShortRead { expected: usize, got: usize },

    #[error("Response for {what} too short: expected {expected} bytes, got {got}")]
    Decode {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Unknown filter kind code {0}")]
    UnknownFilterKind(u32),

    #[error("Invalid channel: {0}")]
    InvalidChannel(u8),

    #[error("Invalid band index: {0}")]
    InvalidBand(u8),

    #[error("Claim failed: {0}")]
    Claim(#[from] ClaimError),

    #[error("Feature not available: {0}")]
    FeatureNotAvailable(String),
}

impl ProtocolError {
    /// Whether this failure means the channel to the device is no longer usable
    ///
    /// An undersized response counts: the transfer itself came back short.
    /// Argument errors and unknown codes leave the link intact.
    pub fn is_link_failure(&self) -> bool {
        matches!(
            self,
            ProtocolError::NotConnected
                | ProtocolError::DeviceGone
                | ProtocolError::Timeout
                | ProtocolError::Usb(_)
                | ProtocolError::ShortWrite { .. }
                | ProtocolError::ShortRead { .. }
                | ProtocolError::Decode { .. }
        )
    }
}

/// Result type alias for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
