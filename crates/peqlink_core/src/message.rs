//! Controller Events
//!
//! Events flow from the controller and its poller threads to subscribers.

use serde::{Deserialize, Serialize};

use peqlink_dsp::FilterParams;
use peqlink_protocol::SystemStatus;

/// Notifications published by the controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    /// Device located and claimed
    Connected,

    /// Handle released on request (reconnect or shutdown)
    Disconnected { reason: String },

    /// A previously connected device stopped answering
    DeviceRemoved,

    /// A search attempt failed; the manager keeps searching
    SearchFailed { message: String },

    /// Fresh telemetry from the status loop
    StatusUpdate(SystemStatus),

    /// A device read-back replaced a cached band
    FilterChanged {
        channel: u8,
        band: u8,
        params: FilterParams,
    },
}

impl Event {
    pub fn search_failed<E: std::fmt::Display>(err: E) -> Self {
        Event::SearchFailed {
            message: err.to_string(),
        }
    }
}
