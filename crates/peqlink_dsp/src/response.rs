//! Magnitude Response Evaluator
//!
//! Evaluates `|H(e^jw)|` of each band directly at one frequency and multiplies
//! the squared magnitudes of the cascade. Curves are a fixed number of
//! log-spaced points, computed on demand.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::coefficients::Coefficients;
use crate::error::DspError;
use crate::filter::FilterParams;

/// Below this squared denominator magnitude a stage is left out of the product
const DENOMINATOR_EPSILON: f64 = 1e-9;

/// Floor for the total power ratio, -200 dB
const MIN_POWER_RATIO: f64 = 1e-20;

/// Sampling of a response curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurveSpec {
    pub min_hz: f64,
    pub max_hz: f64,
    pub points: usize,
}

impl Default for CurveSpec {
    fn default() -> Self {
        Self {
            min_hz: 20.0,
            max_hz: 20_000.0,
            points: 201,
        }
    }
}

impl CurveSpec {
    pub fn validate(&self) -> Result<(), DspError> {
        if !(self.min_hz.is_finite() && self.max_hz.is_finite()) || self.min_hz <= 0.0 {
            return Err(DspError::InvalidCurve(format!(
                "bounds must be positive, got {}..{}",
                self.min_hz, self.max_hz
            )));
        }
        if self.max_hz <= self.min_hz {
            return Err(DspError::InvalidCurve(format!(
                "max {}Hz must exceed min {}Hz",
                self.max_hz, self.min_hz
            )));
        }
        if self.points < 2 {
            return Err(DspError::InvalidCurve(format!(
                "need at least 2 points, got {}",
                self.points
            )));
        }
        Ok(())
    }
}

/// One sample of a response curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub frequency: f64,
    pub db: f64,
}

/// Log-spaced frequencies from `min_hz` to `max_hz` inclusive
///
/// The iterator is `Clone`, so a curve can be walked again from the start.
pub fn log_frequencies(spec: &CurveSpec) -> impl Iterator<Item = f64> + Clone {
    let CurveSpec {
        min_hz,
        max_hz,
        points,
    } = *spec;
    let log_min = min_hz.log10();
    let span = max_hz.log10() - log_min;
    let steps = points.saturating_sub(1).max(1) as f64;

    (0..points).map(move |i| {
        if i == 0 {
            min_hz
        } else if i + 1 == points {
            max_hz
        } else {
            10.0_f64.powf(log_min + span * i as f64 / steps)
        }
    })
}

/// Squared magnitude of one section at normalized angular frequency `omega`
///
/// `None` when the denominator is too close to zero to trust.
fn stage_power(c: &Coefficients, omega: f64) -> Option<f64> {
    let (sin1, cos1) = omega.sin_cos();
    let (sin2, cos2) = (2.0 * omega).sin_cos();

    // H(z) at z = e^{jw}, with z^-1 = cos w - j sin w
    let num_re = c.b0 + c.b1 * cos1 + c.b2 * cos2;
    let num_im = -(c.b1 * sin1 + c.b2 * sin2);
    let den_re = 1.0 + c.a1 * cos1 + c.a2 * cos2;
    let den_im = -(c.a1 * sin1 + c.a2 * sin2);

    let den = den_re * den_re + den_im * den_im;
    if den < DENOMINATOR_EPSILON {
        return None;
    }
    Some((num_re * num_re + num_im * num_im) / den)
}

/// Cascade of bands with coefficients computed once
///
/// Flat and inactive bands are dropped at construction.
#[derive(Debug, Clone)]
pub struct ResponseEvaluator {
    stages: Vec<Coefficients>,
    sample_rate: f64,
}

impl ResponseEvaluator {
    pub fn new<'a, I>(filters: I, sample_rate: f64) -> Self
    where
        I: IntoIterator<Item = &'a FilterParams>,
    {
        let stages = filters
            .into_iter()
            .filter(|band| band.contributes())
            .map(|band| band.coefficients(sample_rate))
            .collect();

        Self {
            stages,
            sample_rate,
        }
    }

    /// Number of bands that shape the response
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Combined magnitude in dB at `frequency` Hz
    ///
    /// Deep notches are floored at -200 dB. A stage with non-finite
    /// coefficients (e.g. Q = 0) makes the result NaN.
    pub fn magnitude_db(&self, frequency: f64) -> f64 {
        let omega = 2.0 * PI * frequency / self.sample_rate;
        let total = self
            .stages
            .iter()
            .filter_map(|stage| stage_power(stage, omega))
            .product::<f64>();

        if total.is_nan() {
            return f64::NAN;
        }
        10.0 * total.max(MIN_POWER_RATIO).log10()
    }

    /// Sample the response over `spec`
    pub fn curve(&self, spec: &CurveSpec) -> Vec<CurvePoint> {
        log_frequencies(spec)
            .map(|frequency| CurvePoint {
                frequency,
                db: self.magnitude_db(frequency),
            })
            .collect()
    }
}

/// Combined magnitude in dB of `filters` at `frequency`
///
/// Band order does not matter; the cascade is a product.
pub fn magnitude_db(frequency: f64, filters: &[FilterParams], sample_rate: f64) -> f64 {
    ResponseEvaluator::new(filters, sample_rate).magnitude_db(frequency)
}

/// Response of `filters` sampled over `spec`
pub fn response_curve(filters: &[FilterParams], sample_rate: f64, spec: &CurveSpec) -> Vec<CurvePoint> {
    ResponseEvaluator::new(filters, sample_rate).curve(spec)
}
