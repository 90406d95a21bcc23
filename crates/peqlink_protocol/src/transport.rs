//! Control Transport
//!
//! One synchronous request/response primitive over the vendor control
//! channel. Every transfer, open and close takes the same lock, so at most
//! one transfer is ever in flight and transfers run in lock-acquisition order.
//!
//! The handle epoch changes whenever the handle is replaced or released, so a
//! failure can be matched to the claim it happened on.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::codec::Request;
use crate::error::{ClaimError, ProtocolError, ProtocolResult};

/// USB vendor/product pair the device enumerates with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    /// Identity of the PEQ Link hardware
    pub const PEQ_LINK: DeviceIdentity = DeviceIdentity {
        vendor_id: 0x1209,
        product_id: 0x7EC1,
    };

    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self::PEQ_LINK
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// A claimed device handle
///
/// Implementations perform exactly one control transfer per call and
/// report the number of bytes actually moved.
pub trait ControlHandle: Send {
    /// Vendor OUT transfer of `data`
    fn write_control(&mut self, request: u8, value: u16, data: &[u8]) -> ProtocolResult<usize>;

    /// Vendor IN transfer into `buf`
    fn read_control(&mut self, request: u8, value: u16, buf: &mut [u8]) -> ProtocolResult<usize>;
}

/// Something that can locate and claim the device
pub trait UsbBackend: Send {
    /// Backend name for diagnostics (e.g., "libusb", "stub")
    fn name(&self) -> &'static str;

    /// Locate the device by `identity` and claim its control interface
    fn open(&mut self, identity: DeviceIdentity) -> Result<Box<dyn ControlHandle>, ClaimError>;
}

struct Inner {
    backend: Box<dyn UsbBackend>,
    handle: Option<Box<dyn ControlHandle>>,
}

/// Serialized access to the single control channel
pub struct Transport {
    inner: Mutex<Inner>,
    /// Written only under `inner`
    epoch: AtomicU64,
}

impl Transport {
    pub fn new(backend: Box<dyn UsbBackend>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                backend,
                handle: None,
            }),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.lock().backend.name()
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().handle.is_some()
    }

    /// Generation of the current handle
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Claim the device, replacing any handle already held
    ///
    /// Returns the epoch of the new handle.
    pub fn open(&self, identity: DeviceIdentity) -> Result<u64, ClaimError> {
        let mut inner = self.inner.lock();
        // Release the old claim before asking for a new one
        inner.handle = None;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = inner.backend.open(identity)?;
        inner.handle = Some(handle);
        debug!("Claimed device {} (epoch {})", identity, epoch);
        Ok(epoch)
    }

    /// Drop the handle, releasing the claim
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.handle.take().is_some() {
            self.epoch.fetch_add(1, Ordering::SeqCst);
            debug!("Released device handle");
        }
    }

    /// OUT transfer; fewer bytes written than `payload` holds is a failure
    pub fn send(&self, request: Request, value: u16, payload: &[u8]) -> ProtocolResult<()> {
        let mut inner = self.inner.lock();
        let handle = inner.handle.as_mut().ok_or(ProtocolError::NotConnected)?;

        trace!("-> {} value=0x{:04x} len={}", request, value, payload.len());
        let written = handle.write_control(request.code(), value, payload)?;
        if written < payload.len() {
            return Err(ProtocolError::ShortWrite {
                expected: payload.len(),
                written,
            });
        }
        Ok(())
    }

    /// IN transfer of up to `len` bytes
    ///
    /// A short response is returned truncated, not rejected; callers decide
    /// whether it is enough.
    pub fn receive(&self, request: Request, value: u16, len: usize) -> ProtocolResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let handle = inner.handle.as_mut().ok_or(ProtocolError::NotConnected)?;

        let mut buf = vec![0u8; len];
        let got = handle.read_control(request.code(), value, &mut buf)?;
        buf.truncate(got.min(len));
        trace!("<- {} value=0x{:04x} len={}/{}", request, value, buf.len(), len);
        Ok(buf)
    }

    /// IN transfer that fails with [`ProtocolError::ShortRead`] unless all
    /// `len` bytes arrive
    pub fn receive_exact(&self, request: Request, value: u16, len: usize) -> ProtocolResult<Vec<u8>> {
        let buf = self.receive(request, value, len)?;
        if buf.len() < len {
            return Err(ProtocolError::ShortRead {
                expected: len,
                got: buf.len(),
            });
        }
        Ok(buf)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Transport")
            .field("backend", &inner.backend.name())
            .field("open", &inner.handle.is_some())
            .finish()
    }
}
