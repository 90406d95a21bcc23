//! PEQ Link Core - Device Controller
//!
//! This crate provides the host side of the PEQ Link control channel:
//! - Connection lifecycle (search, claim, loss detection, reconnect)
//! - Background presence and status polling
//! - The command surface used by front ends
//! - Event fan-out to any number of subscribers
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Front end (CLI/UI)                      │
//! │    commands ──▶ DeviceController ◀── Receiver<Event>        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!   peqlink-presence    peqlink-status       caller thread
//!          │                   │                   │
//!          └──────── ConnectionManager ────────────┘
//!                              │
//!                    Transport (one Mutex)
//!                              │
//!                   USB vendor control transfers
//! ```

mod config;
mod connection;
mod controller;
mod error;
mod events;
mod message;
mod poller;

pub use config::ControllerConfig;
pub use connection::{ConnectionManager, ConnectionState, ConnectionStatus};
pub use controller::DeviceController;
pub use error::{ControllerError, ControllerResult};
pub use events::EventBus;
pub use message::Event;
pub use poller::Poller;

// Re-export the types front ends pass through the controller
pub use peqlink_dsp::{CurvePoint, CurveSpec, FilterKind, FilterParams};
pub use peqlink_protocol::{
    Channel, ClaimError, DeviceIdentity, EnvironmentStats, PersistResult, ProtocolError,
    SystemStatus, TelemetryField, TelemetryValue, CHANNELS,
};
