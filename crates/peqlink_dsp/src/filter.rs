//! Equalizer Band Description
//!
//! A band is what the user edits and what the device stores: a filter kind
//! plus frequency, Q and gain. Coefficients are derived from it, never stored.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coefficients::{Coefficients, RawCoefficients};
use crate::error::DspError;

/// Frequency tolerance (Hz) for band equality
pub const FREQUENCY_TOLERANCE: f32 = 0.01;

/// Q tolerance for band equality
pub const Q_TOLERANCE: f32 = 0.001;

/// Gain tolerance (dB) for band equality
pub const GAIN_TOLERANCE: f32 = 0.01;

/// Largest boost or cut accepted by [`FilterParams::validate`]
pub const MAX_GAIN_DB: f32 = 30.0;

/// Filter type of one band
///
/// The discriminant is the code the firmware uses on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterKind {
    #[default]
    Flat,
    Peaking,
    LowShelf,
    HighShelf,
    LowPass,
    HighPass,
}

impl FilterKind {
    /// Every kind, in wire-code order
    pub const ALL: [FilterKind; 6] = [
        FilterKind::Flat,
        FilterKind::Peaking,
        FilterKind::LowShelf,
        FilterKind::HighShelf,
        FilterKind::LowPass,
        FilterKind::HighPass,
    ];

    /// Code carried in the kind byte of `SetEqParam` and the kind word of `GetEqParam`
    pub fn wire_code(self) -> u8 {
        match self {
            FilterKind::Flat => 0,
            FilterKind::Peaking => 1,
            FilterKind::LowShelf => 2,
            FilterKind::HighShelf => 3,
            FilterKind::LowPass => 4,
            FilterKind::HighPass => 5,
        }
    }

    pub fn from_wire_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(FilterKind::Flat),
            1 => Some(FilterKind::Peaking),
            2 => Some(FilterKind::LowShelf),
            3 => Some(FilterKind::HighShelf),
            4 => Some(FilterKind::LowPass),
            5 => Some(FilterKind::HighPass),
            _ => None,
        }
    }

    /// Two-letter code used in compact listings
    pub fn short_name(self) -> &'static str {
        match self {
            FilterKind::Flat => "--",
            FilterKind::Peaking => "PK",
            FilterKind::LowShelf => "LS",
            FilterKind::HighShelf => "HS",
            FilterKind::LowPass => "LP",
            FilterKind::HighPass => "HP",
        }
    }

    pub fn long_name(self) -> &'static str {
        match self {
            FilterKind::Flat => "Flat",
            FilterKind::Peaking => "Peaking",
            FilterKind::LowShelf => "Low Shelf",
            FilterKind::HighShelf => "High Shelf",
            FilterKind::LowPass => "Low Pass",
            FilterKind::HighPass => "High Pass",
        }
    }

    /// Whether the gain parameter changes the response of this kind
    pub fn uses_gain(self) -> bool {
        matches!(
            self,
            FilterKind::Peaking | FilterKind::LowShelf | FilterKind::HighShelf
        )
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.long_name())
    }
}

impl FromStr for FilterKind {
    type Err = DspError;

    /// Accepts the short code, the long name, or the long name without spaces
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        let squashed: String = wanted.chars().filter(|c| !c.is_whitespace()).collect();
        FilterKind::ALL
            .into_iter()
            .find(|kind| {
                kind.short_name().eq_ignore_ascii_case(wanted)
                    || kind.long_name().eq_ignore_ascii_case(wanted)
                    || kind.long_name().replace(' ', "").eq_ignore_ascii_case(&squashed)
            })
            .ok_or_else(|| DspError::UnknownFilterKind(s.to_string()))
    }
}

/// One equalizer band
///
/// `id` is a local identity for keeping UI lists stable; it takes no part in
/// equality. Equality compares `kind` exactly and the numeric fields within
/// [`FREQUENCY_TOLERANCE`], [`Q_TOLERANCE`] and [`GAIN_TOLERANCE`], so a value
/// that took a float32 round trip through the device still compares equal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FilterParams {
    pub id: Uuid,
    pub kind: FilterKind,
    /// Center or corner frequency in Hz
    pub frequency: f32,
    pub q: f32,
    /// Gain in dB (ignored by Flat, LowPass and HighPass)
    pub gain: f32,
    /// Display-only; inactive bands are left out of the local curve
    pub is_active: bool,
}

impl FilterParams {
    pub const DEFAULT_FREQUENCY: f32 = 1000.0;
    pub const DEFAULT_Q: f32 = 0.707;

    pub fn new(kind: FilterKind, frequency: f32, q: f32, gain: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            frequency,
            q,
            gain,
            is_active: true,
        }
    }

    pub fn peaking(frequency: f32, q: f32, gain: f32) -> Self {
        Self::new(FilterKind::Peaking, frequency, q, gain)
    }

    /// Same values, carrying the identity of `other`
    ///
    /// Used when a device read replaces a cached band.
    pub fn with_identity_of(mut self, other: &FilterParams) -> Self {
        self.id = other.id;
        self
    }

    pub fn set_active(mut self, active: bool) -> Self {
        self.is_active = active;
        self
    }

    /// Whether this band shapes the locally drawn response
    pub fn contributes(&self) -> bool {
        self.is_active && self.kind != FilterKind::Flat
    }

    /// Normalized biquad coefficients at `sample_rate`
    pub fn coefficients(&self, sample_rate: f64) -> Coefficients {
        RawCoefficients::from_params(self, sample_rate).normalize()
    }

    /// Caller-side range checks before a band is sent to the device
    pub fn validate(&self, sample_rate: f64) -> Result<(), DspError> {
        if !self.frequency.is_finite() {
            return Err(DspError::NonFinite("frequency"));
        }
        if !self.q.is_finite() {
            return Err(DspError::NonFinite("q"));
        }
        if !self.gain.is_finite() {
            return Err(DspError::NonFinite("gain"));
        }
        if self.gain.abs() > MAX_GAIN_DB {
            return Err(DspError::InvalidGain(self.gain));
        }
        if self.kind == FilterKind::Flat {
            return Ok(());
        }
        if self.frequency <= 0.0 || f64::from(self.frequency) >= sample_rate / 2.0 {
            return Err(DspError::InvalidFrequency {
                frequency: self.frequency,
                sample_rate,
            });
        }
        if self.q <= 0.0 {
            return Err(DspError::InvalidQ(self.q));
        }
        Ok(())
    }
}

impl Default for FilterParams {
    fn default() -> Self {
        Self::new(
            FilterKind::Flat,
            Self::DEFAULT_FREQUENCY,
            Self::DEFAULT_Q,
            0.0,
        )
    }
}

impl PartialEq for FilterParams {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && (self.frequency - other.frequency).abs() <= FREQUENCY_TOLERANCE
            && (self.q - other.q).abs() <= Q_TOLERANCE
            && (self.gain - other.gain).abs() <= GAIN_TOLERANCE
    }
}

impl fmt::Display for FilterParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.1}Hz Q{:.3} {:+.2}dB",
            self.kind.short_name(),
            self.frequency,
            self.q,
            self.gain
        )?;
        if !self.is_active {
            f.write_str(" (off)")?;
        }
        Ok(())
    }
}
