//! PEQ Link DSP - Filter Mathematics
//!
//! This crate holds the numeric side of PEQ Link:
//! - Filter band description (`FilterKind`, `FilterParams`)
//! - RBJ cookbook biquad coefficients, using the same formulas as the unit firmware
//! - Single-point and sampled magnitude response of a cascade of bands
//!
//! # Architecture
//!
//! Nothing here touches the device. The host sends band *parameters*; the
//! firmware derives its own coefficients. What lives here is only used to draw
//! the curve locally, so it must stay formula-for-formula with the firmware.

mod coefficients;
mod error;
mod filter;
mod response;

pub use coefficients::{Coefficients, RawCoefficients, DEFAULT_SAMPLE_RATE};
pub use error::DspError;
pub use filter::{
    FilterKind, FilterParams, FREQUENCY_TOLERANCE, GAIN_TOLERANCE, MAX_GAIN_DB, Q_TOLERANCE,
};
pub use response::{
    log_frequencies, magnitude_db, response_curve, CurvePoint, CurveSpec, ResponseEvaluator,
};
