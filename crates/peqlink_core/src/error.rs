//! Controller Error Types

use thiserror::Error;

/// Errors surfaced by the device controller
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] peqlink_protocol::ProtocolError),

    #[error("Invalid filter: {0}")]
    Dsp(#[from] peqlink_dsp::DspError),

    #[error("Channel {0} has no delay line")]
    NotDelayCapable(u8),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to spawn poller thread: {0}")]
    Thread(String),
}

impl ControllerError {
    /// Whether the failure came from the link rather than the arguments
    pub fn is_link_failure(&self) -> bool {
        matches!(self, ControllerError::Protocol(e) if e.is_link_failure())
    }
}

/// Result type alias for controller operations
pub type ControllerResult<T> = Result<T, ControllerError>;
