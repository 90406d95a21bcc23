//! libusb Backend
//!
//! Vendor control transfers on endpoint 0 through `rusb`. The device exposes
//! a single vendor interface (0), claimed for the lifetime of the handle.

use std::time::Duration;

use rusb::{Context, Device, DeviceHandle, Direction, Recipient, RequestType, UsbContext};
use tracing::{debug, warn};

use crate::error::{ClaimError, ProtocolError, ProtocolResult};
use crate::transport::{ControlHandle, DeviceIdentity, UsbBackend};

const INTERFACE: u8 = 0;

fn map_transfer_error(err: rusb::Error) -> ProtocolError {
    match err {
        rusb::Error::NoDevice => ProtocolError::DeviceGone,
        rusb::Error::Timeout => ProtocolError::Timeout,
        other => ProtocolError::Usb(other.to_string()),
    }
}

fn map_claim_error(err: rusb::Error) -> ClaimError {
    match err {
        rusb::Error::Access => ClaimError::AccessDenied(err.to_string()),
        rusb::Error::NotSupported | rusb::Error::NotFound => {
            ClaimError::DriverUnavailable(err.to_string())
        }
        other => ClaimError::Other(other.to_string()),
    }
}

/// Backend over a private libusb context
pub struct RusbBackend {
    context: Context,
    timeout: Duration,
}

impl RusbBackend {
    pub fn new(timeout: Duration) -> ProtocolResult<Self> {
        let context = Context::new().map_err(|e| ProtocolError::Usb(e.to_string()))?;
        Ok(Self { context, timeout })
    }

    fn find(&self, identity: DeviceIdentity) -> Result<Device<Context>, ClaimError> {
        let devices = self
            .context
            .devices()
            .map_err(|e| ClaimError::Other(e.to_string()))?;

        let mut present = 0;
        for device in devices.iter() {
            present += 1;
            let Ok(desc) = device.device_descriptor() else {
                continue;
            };
            if desc.vendor_id() == identity.vendor_id && desc.product_id() == identity.product_id {
                return Ok(device);
            }
        }

        if present == 0 {
            Err(ClaimError::NoDevices)
        } else {
            Err(ClaimError::NoMatchingDevice { present })
        }
    }
}

impl UsbBackend for RusbBackend {
    fn name(&self) -> &'static str {
        "libusb"
    }

    fn open(&mut self, identity: DeviceIdentity) -> Result<Box<dyn ControlHandle>, ClaimError> {
        let device = self.find(identity)?;
        debug!(
            "Found {} on bus {} address {}",
            identity,
            device.bus_number(),
            device.address()
        );

        let handle = device.open().map_err(map_claim_error)?;

        // Not supported on every platform; a bound kernel driver then shows up as a claim error
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", e);
        }
        handle.claim_interface(INTERFACE).map_err(map_claim_error)?;

        Ok(Box::new(RusbHandle {
            handle,
            timeout: self.timeout,
        }))
    }
}

/// Claimed device; the interface is released on drop
pub struct RusbHandle {
    handle: DeviceHandle<Context>,
    timeout: Duration,
}

impl ControlHandle for RusbHandle {
    fn write_control(&mut self, request: u8, value: u16, data: &[u8]) -> ProtocolResult<usize> {
        let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        self.handle
            .write_control(request_type, request, value, 0, data, self.timeout)
            .map_err(map_transfer_error)
    }

    fn read_control(&mut self, request: u8, value: u16, buf: &mut [u8]) -> ProtocolResult<usize> {
        let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        self.handle
            .read_control(request_type, request, value, 0, buf, self.timeout)
            .map_err(map_transfer_error)
    }
}

impl Drop for RusbHandle {
    fn drop(&mut self) {
        match self.handle.release_interface(INTERFACE) {
            Ok(()) | Err(rusb::Error::NoDevice) => {}
            Err(e) => warn!("Failed to release interface: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert_eq!(map_transfer_error(rusb::Error::NoDevice), ProtocolError::DeviceGone);
        assert_eq!(map_transfer_error(rusb::Error::Timeout), ProtocolError::Timeout);
        assert!(matches!(map_transfer_error(rusb::Error::Pipe), ProtocolError::Usb(_)));

        assert!(matches!(map_claim_error(rusb::Error::Access), ClaimError::AccessDenied(_)));
        assert!(matches!(
            map_claim_error(rusb::Error::NotSupported),
            ClaimError::DriverUnavailable(_)
        ));
        assert!(matches!(map_claim_error(rusb::Error::Busy), ClaimError::Other(_)));
    }
}
