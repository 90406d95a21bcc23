//! Stub backend for builds without the `usb` feature

use crate::error::ClaimError;
use crate::transport::{ControlHandle, DeviceIdentity, UsbBackend};

/// Backend that never finds a device
pub struct StubBackend;

impl StubBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbBackend for StubBackend {
    fn name(&self) -> &'static str {
        "Stub (USB disabled)"
    }

    fn open(&mut self, _identity: DeviceIdentity) -> Result<Box<dyn ControlHandle>, ClaimError> {
        Err(ClaimError::DriverUnavailable(
            "USB support not compiled in (enable the `usb` feature)".into(),
        ))
    }
}
