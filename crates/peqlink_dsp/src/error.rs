//! DSP Error Types

use thiserror::Error;

/// Errors raised by caller-side validation of filter parameters
///
/// The coefficient engine itself never fails; these come from
/// [`FilterParams::validate`](crate::FilterParams::validate) and parsing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DspError {
    #[error("Invalid frequency {frequency}Hz for sample rate {sample_rate}Hz")]
    InvalidFrequency { frequency: f32, sample_rate: f64 },

    #[error("Q must be positive, got {0}")]
    InvalidQ(f32),

    #[error("Gain {0}dB is outside the supported range")]
    InvalidGain(f32),

    #[error("Non-finite value for {0}")]
    NonFinite(&'static str),

    #[error("Unknown filter kind: {0}")]
    UnknownFilterKind(String),

    #[error("Invalid curve specification: {0}")]
    InvalidCurve(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DspError::InvalidFrequency {
            frequency: 30000.0,
            sample_rate: 48000.0,
        };
        assert!(err.to_string().contains("30000"));

        let err = DspError::UnknownFilterKind("notch".into());
        assert!(err.to_string().contains("notch"));
    }
}
