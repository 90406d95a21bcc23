//! Biquad Coefficient Engine
//!
//! Based on the RBJ (Robert Bristow-Johnson) Audio EQ Cookbook, matching the
//! firmware's formulas term for term. No clamping happens here: a band with
//! Q <= 0 or a non-positive frequency produces non-finite coefficients.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::filter::{FilterKind, FilterParams};

/// Sample rate the unit runs at
pub const DEFAULT_SAMPLE_RATE: f64 = 48_000.0;

/// Normalized biquad section, implicit `a0 = 1`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Coefficients {
    /// Pass-through section
    pub const IDENTITY: Coefficients = Coefficients {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// Coefficients for `params` at `sample_rate`
    pub fn from_params(params: &FilterParams, sample_rate: f64) -> Self {
        RawCoefficients::from_params(params, sample_rate).normalize()
    }

    /// Back to the six-term form with `a0 = 1`
    pub fn to_raw(self) -> RawCoefficients {
        RawCoefficients {
            b0: self.b0,
            b1: self.b1,
            b2: self.b2,
            a0: 1.0,
            a1: self.a1,
            a2: self.a2,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    pub fn is_finite(&self) -> bool {
        [self.b0, self.b1, self.b2, self.a1, self.a2]
            .iter()
            .all(|c| c.is_finite())
    }
}

impl Default for Coefficients {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Coefficients> for biquad::Coefficients<f64> {
    fn from(c: Coefficients) -> Self {
        biquad::Coefficients {
            a1: c.a1,
            a2: c.a2,
            b0: c.b0,
            b1: c.b1,
            b2: c.b2,
        }
    }
}

/// Unnormalized cookbook terms, before division by `a0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawCoefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
}

impl RawCoefficients {
    pub fn from_params(params: &FilterParams, sample_rate: f64) -> Self {
        // Flat never reaches the trig below
        if params.kind == FilterKind::Flat {
            return Coefficients::IDENTITY.to_raw();
        }

        let omega = 2.0 * PI * f64::from(params.frequency) / sample_rate;
        let sn = omega.sin();
        let cs = omega.cos();
        let alpha = sn / (2.0 * f64::from(params.q));
        let a = 10.0_f64.powf(f64::from(params.gain) / 40.0);

        match params.kind {
            FilterKind::Flat => Coefficients::IDENTITY.to_raw(),
            FilterKind::LowPass => Self {
                b0: (1.0 - cs) / 2.0,
                b1: 1.0 - cs,
                b2: (1.0 - cs) / 2.0,
                a0: 1.0 + alpha,
                a1: -2.0 * cs,
                a2: 1.0 - alpha,
            },
            FilterKind::HighPass => Self {
                b0: (1.0 + cs) / 2.0,
                b1: -(1.0 + cs),
                b2: (1.0 + cs) / 2.0,
                a0: 1.0 + alpha,
                a1: -2.0 * cs,
                a2: 1.0 - alpha,
            },
            FilterKind::Peaking => Self {
                b0: 1.0 + alpha * a,
                b1: -2.0 * cs,
                b2: 1.0 - alpha * a,
                a0: 1.0 + alpha / a,
                a1: -2.0 * cs,
                a2: 1.0 - alpha / a,
            },
            FilterKind::LowShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                Self {
                    b0: a * ((a + 1.0) - (a - 1.0) * cs + two_sqrt_a_alpha),
                    b1: 2.0 * a * ((a - 1.0) - (a + 1.0) * cs),
                    b2: a * ((a + 1.0) - (a - 1.0) * cs - two_sqrt_a_alpha),
                    a0: (a + 1.0) + (a - 1.0) * cs + two_sqrt_a_alpha,
                    a1: -2.0 * ((a - 1.0) + (a + 1.0) * cs),
                    a2: (a + 1.0) + (a - 1.0) * cs - two_sqrt_a_alpha,
                }
            }
            FilterKind::HighShelf => {
                let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
                Self {
                    b0: a * ((a + 1.0) + (a - 1.0) * cs + two_sqrt_a_alpha),
                    b1: -2.0 * a * ((a - 1.0) + (a + 1.0) * cs),
                    b2: a * ((a + 1.0) + (a - 1.0) * cs - two_sqrt_a_alpha),
                    a0: (a + 1.0) - (a - 1.0) * cs + two_sqrt_a_alpha,
                    a1: 2.0 * ((a - 1.0) - (a + 1.0) * cs),
                    a2: (a + 1.0) - (a - 1.0) * cs - two_sqrt_a_alpha,
                }
            }
        }
    }

    /// Divide every term by `a0`
    pub fn normalize(self) -> Coefficients {
        Coefficients {
            b0: self.b0 / self.a0,
            b1: self.b1 / self.a0,
            b2: self.b2 / self.a0,
            a1: self.a1 / self.a0,
            a2: self.a2 / self.a0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biquad::{Biquad, DirectForm2Transposed};

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_flat_is_identity_for_any_input() {
        let inputs = [
            (1000.0, 0.707, 0.0),
            (0.0, 0.0, 12.0),
            (-5.0, -1.0, -40.0),
            (f32::NAN, f32::INFINITY, f32::NAN),
        ];
        for (frequency, q, gain) in inputs {
            let band = FilterParams::new(FilterKind::Flat, frequency, q, gain);
            assert_eq!(band.coefficients(DEFAULT_SAMPLE_RATE), Coefficients::IDENTITY);
        }
    }

    #[test]
    fn test_renormalization_is_idempotent() {
        for kind in FilterKind::ALL.into_iter().skip(1) {
            let band = FilterParams::new(kind, 1234.0, 1.3, -4.5);
            let raw = RawCoefficients::from_params(&band, DEFAULT_SAMPLE_RATE);
            let once = raw.normalize();
            let twice = once.to_raw().normalize();

            assert!(close(once.b0, twice.b0), "{kind}");
            assert!(close(once.b1, twice.b1), "{kind}");
            assert!(close(once.b2, twice.b2), "{kind}");
            assert!(close(once.a1, twice.a1), "{kind}");
            assert!(close(once.a2, twice.a2), "{kind}");
            assert_eq!(once, band.coefficients(DEFAULT_SAMPLE_RATE));
        }
    }

    #[test]
    fn test_peaking_zero_gain_is_transparent() {
        let c = FilterParams::peaking(1000.0, 2.0, 0.0).coefficients(DEFAULT_SAMPLE_RATE);
        // With A = 1 numerator and denominator are the same polynomial
        assert!(close(c.b0, 1.0));
        assert!(close(c.b1, c.a1));
        assert!(close(c.b2, c.a2));
    }

    #[test]
    fn test_lowpass_dc_gain_is_unity() {
        let c = FilterParams::new(FilterKind::LowPass, 2000.0, 0.707, 0.0)
            .coefficients(DEFAULT_SAMPLE_RATE);
        let dc = (c.b0 + c.b1 + c.b2) / (1.0 + c.a1 + c.a2);
        assert!((dc - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let c = FilterParams::new(FilterKind::HighPass, 100.0, 0.707, 0.0)
            .coefficients(DEFAULT_SAMPLE_RATE);
        assert!((c.b0 + c.b1 + c.b2).abs() < 1e-12);
    }

    #[test]
    fn test_low_shelf_dc_gain_matches_setting() {
        let c = FilterParams::new(FilterKind::LowShelf, 200.0, 0.707, 6.0)
            .coefficients(DEFAULT_SAMPLE_RATE);
        let dc = (c.b0 + c.b1 + c.b2) / (1.0 + c.a1 + c.a2);
        assert!((20.0 * dc.log10() - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_q_propagates_garbage() {
        let c = FilterParams::peaking(1000.0, 0.0, 3.0).coefficients(DEFAULT_SAMPLE_RATE);
        assert!(!c.is_finite());
    }

    #[test]
    fn test_boost_increases_amplitude() {
        let band = FilterParams::peaking(1000.0, 1.0, 12.0);
        let coeffs: biquad::Coefficients<f64> = band.coefficients(DEFAULT_SAMPLE_RATE).into();
        let mut filter = DirectForm2Transposed::<f64>::new(coeffs);

        let mut max_output = 0.0_f64;
        for i in 0..4800 {
            let t = i as f64 / DEFAULT_SAMPLE_RATE;
            let sample = (2.0 * PI * 1000.0 * t).sin() * 0.5;
            let out = filter.run(sample);
            // Skip the transient
            if i > 2400 {
                max_output = max_output.max(out.abs());
            }
        }

        // +12 dB is a factor of ~3.98
        assert!((max_output / 0.5 - 3.98).abs() < 0.1, "got {}", max_output / 0.5);
    }
}
