//! PEQ Link Protocol - Device Command Channel
//!
//! This crate provides:
//! - The fixed channel catalog
//! - Packet encoding and decoding for every request
//! - A serialized request/response transport over USB vendor control transfers
//!
//! # Backends
//!
//! | Build            | Backend        | Finds devices |
//! |------------------|----------------|---------------|
//! | `usb` feature    | `RusbBackend`  | Yes (libusb)  |
//! | default          | `StubBackend`  | No            |
//! | `mock` / tests   | `MockBackend`  | In-memory     |

mod channel;
mod codec;
mod error;
mod transport;

#[cfg(not(feature = "usb"))]
mod stub;
#[cfg(feature = "usb")]
mod usb;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use channel::{channel, channel_by_code, Channel, BANDS_PER_CHANNEL, CHANNELS, CHANNEL_COUNT};
pub use codec::{
    decode_bool, decode_eq_param, decode_f32, decode_i32, decode_telemetry, decode_u32,
    encode_bool, encode_eq_param, encode_f32, encode_set_eq, encode_u32, eq_param_address,
    split_eq_param_address, BandReadback, Direction, EnvironmentStats, EqParam, EqParamValue,
    PersistResult, Request, SetEqCommand, SystemStatus, TelemetryField, TelemetryValue,
    SET_EQ_PAYLOAD_LEN, STATUS_COMBINED_VALUE, STATUS_PAYLOAD_LEN, WORD_LEN,
};
pub use error::{ClaimError, ProtocolError, ProtocolResult};
pub use transport::{ControlHandle, DeviceIdentity, Transport, UsbBackend};

#[cfg(not(feature = "usb"))]
pub use stub::StubBackend;
#[cfg(feature = "usb")]
pub use usb::{RusbBackend, RusbHandle};

use std::time::Duration;

/// Backend for the current build
///
/// `timeout` bounds every control transfer.
pub fn default_backend(timeout: Duration) -> ProtocolResult<Box<dyn UsbBackend>> {
    #[cfg(feature = "usb")]
    {
        Ok(Box::new(RusbBackend::new(timeout)?))
    }
    #[cfg(not(feature = "usb"))]
    {
        let _ = timeout;
        Ok(Box::new(StubBackend::new()))
    }
}

/// Whether this build can talk to real hardware
pub fn usb_enabled() -> bool {
    cfg!(feature = "usb")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backend() {
        let backend = default_backend(Duration::from_millis(100)).unwrap();
        if usb_enabled() {
            assert_eq!(backend.name(), "libusb");
        } else {
            assert!(backend.name().starts_with("Stub"));
        }
    }
}
