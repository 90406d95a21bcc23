//! Connection Manager
//!
//! Owns the connection state machine over the shared [`Transport`]:
//!
//! ```text
//!            claim ok
//! Searching ──────────▶ Connected
//!     ▲                     │
//!     └─────────────────────┘
//!      link failure / reconnect
//! ```
//!
//! Only this module changes the state. Every transition happens under the
//! state lock, so concurrent failure reports collapse into one transition.
//! Lock order is state, then transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use peqlink_protocol::{
    DeviceIdentity, ProtocolError, ProtocolResult, Request, SystemStatus, Transport,
    STATUS_COMBINED_VALUE, STATUS_PAYLOAD_LEN,
};

use crate::events::EventBus;
use crate::message::Event;

/// Coarse connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No device claimed; the presence loop keeps trying
    Searching,
    Connected,
}

/// Snapshot of the connection for collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Diagnostic from the last failed search or the last removal
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }
}

/// Read and decode the combined status payload
pub(crate) fn read_status(transport: &Transport) -> ProtocolResult<SystemStatus> {
    let buf = transport.receive(Request::GetStatus, STATUS_COMBINED_VALUE, STATUS_PAYLOAD_LEN)?;
    SystemStatus::decode(&buf)
}

pub struct ConnectionManager {
    transport: Arc<Transport>,
    identity: DeviceIdentity,
    events: Arc<EventBus>,
    status: Mutex<ConnectionStatus>,
    /// Gate for the status loop; on only while connected
    status_polling: AtomicBool,
}

impl ConnectionManager {
    pub fn new(transport: Arc<Transport>, identity: DeviceIdentity, events: Arc<EventBus>) -> Self {
        Self {
            transport,
            identity,
            events,
            status: Mutex::new(ConnectionStatus {
                state: ConnectionState::Searching,
                last_error: None,
            }),
            status_polling: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status.lock().is_connected()
    }

    /// Whether the fast status loop should read this tick
    pub fn status_polling_enabled(&self) -> bool {
        self.status_polling.load(Ordering::SeqCst)
    }

    pub fn identity(&self) -> DeviceIdentity {
        self.identity
    }

    /// One search attempt; `true` if connected afterwards
    ///
    /// A failed claim stores a diagnostic and leaves the state alone. The
    /// claim itself runs outside the state lock; a claim superseded by a
    /// close or another claim in the meantime is not committed.
    pub fn search_step(&self) -> bool {
        if self.is_connected() {
            return true;
        }

        let claim = self.transport.open(self.identity);
        let mut status = self.status.lock();
        if status.is_connected() {
            return true;
        }

        match claim {
            Ok(epoch) if epoch == self.transport.epoch() => {
                status.state = ConnectionState::Connected;
                status.last_error = None;
                self.status_polling.store(true, Ordering::SeqCst);
                info!("Connected to {} via {}", self.identity, self.transport.backend_name());
                self.events.publish(Event::Connected);
                true
            }
            Ok(epoch) => {
                debug!("Claim at epoch {} superseded", epoch);
                false
            }
            Err(err) => {
                let message = err.to_string();
                // Same failure every tick; log it once
                if status.last_error.as_deref() != Some(message.as_str()) {
                    warn!("Device search failed: {}", message);
                } else {
                    debug!("Device search failed: {}", message);
                }
                status.last_error = Some(message);
                self.events.publish(Event::search_failed(err));
                false
            }
        }
    }

    /// Handle a failed call; `true` if it caused the Connected -> Searching transition
    ///
    /// `epoch` is the transport epoch sampled before the call. Only link
    /// failures count, only while connected, and only on the handle that is
    /// still current. "Device removed" is published once per transition.
    pub fn report_failure(&self, err: &ProtocolError, epoch: u64) -> bool {
        if !err.is_link_failure() {
            return false;
        }

        let mut status = self.status.lock();
        if !status.is_connected() {
            return false;
        }
        if epoch != self.transport.epoch() {
            debug!("Ignoring failure from epoch {}: {}", epoch, err);
            return false;
        }

        self.status_polling.store(false, Ordering::SeqCst);
        self.transport.close();
        status.state = ConnectionState::Searching;
        status.last_error = Some(format!("Device removed: {}", err));
        warn!("Device removed: {}", err);
        self.events.publish(Event::DeviceRemoved);
        true
    }

    /// Release the device without treating it as a removal
    pub fn disconnect(&self, reason: &str) {
        let mut status = self.status.lock();
        self.status_polling.store(false, Ordering::SeqCst);
        self.transport.close();
        if status.is_connected() {
            status.state = ConnectionState::Searching;
            info!("Disconnected: {}", reason);
            self.events.publish(Event::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// Force a fresh claim regardless of current health
    pub fn reconnect(&self) -> bool {
        self.disconnect("reconnect requested");
        self.search_step()
    }

    /// Status read for the fast loop; failures feed [`Self::report_failure`]
    pub fn poll_status(&self) -> Option<SystemStatus> {
        let epoch = self.transport.epoch();
        match read_status(&self.transport) {
            Ok(status) => {
                self.events.publish(Event::StatusUpdate(status));
                Some(status)
            }
            Err(err) => {
                debug!("Status poll failed: {}", err);
                self.report_failure(&err, epoch);
                None
            }
        }
    }
}
