//! Command Protocol Codec
//!
//! Fixed-layout payloads for every request the firmware understands.
//! All multi-byte fields are little-endian. Nothing here performs I/O; the
//! only failure is a buffer shorter than the layout it is decoded as.
//!
//! # Packet Layout
//!
//! ```text
//! SetEqParam (16 bytes, value = 0)
//! ┌─────────┬──────┬──────┬──────────┬───────────┬─────────┬──────────┐
//! │ channel │ band │ kind │ reserved │ freq f32  │ q f32   │ gain f32 │
//! │ 0       │ 1    │ 2    │ 3        │ 4..8      │ 8..12   │ 12..16   │
//! └─────────┴──────┴──────┴──────────┴───────────┴─────────┴──────────┘
//!
//! GetStatus (12 bytes, value = 9)
//! ┌──────────────────────────────┬────────┬────────┐
//! │ 5 x u16 peak, catalog order  │ load 0 │ load 1 │
//! │ 0..10                        │ 10     │ 11     │
//! └──────────────────────────────┴────────┴────────┘
//! ```

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use peqlink_dsp::{FilterKind, FilterParams};

use crate::channel::CHANNEL_COUNT;
use crate::error::{ProtocolError, ProtocolResult};

/// Length of a `SetEqParam` payload
pub const SET_EQ_PAYLOAD_LEN: usize = 16;

/// Length of the combined status payload
pub const STATUS_PAYLOAD_LEN: usize = 12;

/// `GetStatus` value selecting the combined status payload
pub const STATUS_COMBINED_VALUE: u16 = 9;

/// Length of every single-value parameter payload
pub const WORD_LEN: usize = 4;

/// Request selector byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Request {
    SetEqParam,
    GetEqParam,
    SetPreamp,
    GetPreamp,
    SetBypass,
    GetBypass,
    SetDelay,
    GetDelay,
    GetStatus,
    SaveParams,
    LoadParams,
    FactoryReset,
}

/// Transfer direction relative to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device, carries a payload
    Out,
    /// Device to host, returns a payload
    In,
}

impl Request {
    pub const ALL: [Request; 12] = [
        Request::SetEqParam,
        Request::GetEqParam,
        Request::SetPreamp,
        Request::GetPreamp,
        Request::SetBypass,
        Request::GetBypass,
        Request::SetDelay,
        Request::GetDelay,
        Request::GetStatus,
        Request::SaveParams,
        Request::LoadParams,
        Request::FactoryReset,
    ];

    pub fn code(self) -> u8 {
        match self {
            Request::SetEqParam => 0x01,
            Request::GetEqParam => 0x02,
            Request::SetPreamp => 0x03,
            Request::GetPreamp => 0x04,
            Request::SetBypass => 0x05,
            Request::GetBypass => 0x06,
            Request::SetDelay => 0x07,
            Request::GetDelay => 0x08,
            Request::GetStatus => 0x09,
            Request::SaveParams => 0x0A,
            Request::LoadParams => 0x0B,
            Request::FactoryReset => 0x0C,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.code() == code)
    }

    /// Persistence requests are reads that return a result code
    pub fn direction(self) -> Direction {
        match self {
            Request::SetEqParam
            | Request::SetPreamp
            | Request::SetBypass
            | Request::SetDelay => Direction::Out,
            _ => Direction::In,
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02X})", self, self.code())
    }
}

fn require(what: &'static str, buf: &[u8], expected: usize) -> ProtocolResult<()> {
    if buf.len() < expected {
        return Err(ProtocolError::Decode {
            what,
            expected,
            got: buf.len(),
        });
    }
    Ok(())
}

// ============================================================================
// Scalar words
// ============================================================================

pub fn encode_f32(value: f32) -> [u8; WORD_LEN] {
    let mut buf = [0u8; WORD_LEN];
    LittleEndian::write_f32(&mut buf, value);
    buf
}

pub fn decode_f32(what: &'static str, buf: &[u8]) -> ProtocolResult<f32> {
    require(what, buf, WORD_LEN)?;
    Ok(LittleEndian::read_f32(buf))
}

pub fn encode_u32(value: u32) -> [u8; WORD_LEN] {
    let mut buf = [0u8; WORD_LEN];
    LittleEndian::write_u32(&mut buf, value);
    buf
}

pub fn decode_u32(what: &'static str, buf: &[u8]) -> ProtocolResult<u32> {
    require(what, buf, WORD_LEN)?;
    Ok(LittleEndian::read_u32(buf))
}

pub fn decode_i32(what: &'static str, buf: &[u8]) -> ProtocolResult<i32> {
    require(what, buf, WORD_LEN)?;
    Ok(LittleEndian::read_i32(buf))
}

pub fn encode_bool(value: bool) -> [u8; 1] {
    [u8::from(value)]
}

/// Any non-zero byte reads as `true`
pub fn decode_bool(what: &'static str, buf: &[u8]) -> ProtocolResult<bool> {
    require(what, buf, 1)?;
    Ok(buf[0] != 0)
}

// ============================================================================
// EQ bands
// ============================================================================

/// Decoded body of a `SetEqParam` packet
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetEqCommand {
    pub channel: u8,
    pub band: u8,
    pub kind: FilterKind,
    pub frequency: f32,
    pub q: f32,
    pub gain: f32,
}

impl SetEqCommand {
    pub fn new(channel: u8, band: u8, params: &FilterParams) -> Self {
        Self {
            channel,
            band,
            kind: params.kind,
            frequency: params.frequency,
            q: params.q,
            gain: params.gain,
        }
    }

    pub fn encode(&self) -> [u8; SET_EQ_PAYLOAD_LEN] {
        let mut buf = [0u8; SET_EQ_PAYLOAD_LEN];
        buf[0] = self.channel;
        buf[1] = self.band;
        buf[2] = self.kind.wire_code();
        // buf[3] reserved
        LittleEndian::write_f32(&mut buf[4..8], self.frequency);
        LittleEndian::write_f32(&mut buf[8..12], self.q);
        LittleEndian::write_f32(&mut buf[12..16], self.gain);
        buf
    }

    pub fn decode(buf: &[u8]) -> ProtocolResult<Self> {
        require("SetEqParam", buf, SET_EQ_PAYLOAD_LEN)?;
        let kind = FilterKind::from_wire_code(u32::from(buf[2]))
            .ok_or(ProtocolError::UnknownFilterKind(u32::from(buf[2])))?;
        Ok(Self {
            channel: buf[0],
            band: buf[1],
            kind,
            frequency: LittleEndian::read_f32(&buf[4..8]),
            q: LittleEndian::read_f32(&buf[8..12]),
            gain: LittleEndian::read_f32(&buf[12..16]),
        })
    }

    /// Band parameters carried by this command, with a fresh identity
    pub fn params(&self) -> FilterParams {
        FilterParams::new(self.kind, self.frequency, self.q, self.gain)
    }
}

/// Pack a band into a `SetEqParam` payload
pub fn encode_set_eq(channel: u8, band: u8, params: &FilterParams) -> [u8; SET_EQ_PAYLOAD_LEN] {
    SetEqCommand::new(channel, band, params).encode()
}

/// Which field of a band a `GetEqParam` request reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EqParam {
    Kind,
    Frequency,
    Q,
    Gain,
}

impl EqParam {
    /// Read order used when fetching a whole band
    pub const ALL: [EqParam; 4] = [EqParam::Kind, EqParam::Frequency, EqParam::Q, EqParam::Gain];

    pub fn selector(self) -> u16 {
        match self {
            EqParam::Kind => 0,
            EqParam::Frequency => 1,
            EqParam::Q => 2,
            EqParam::Gain => 3,
        }
    }

    pub fn from_selector(selector: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.selector() == selector)
    }

    fn label(self) -> &'static str {
        match self {
            EqParam::Kind => "band kind",
            EqParam::Frequency => "band frequency",
            EqParam::Q => "band Q",
            EqParam::Gain => "band gain",
        }
    }
}

/// Value field of a `GetEqParam` request: `(channel << 8) | (band << 4) | param`
pub fn eq_param_address(channel: u8, band: u8, param: EqParam) -> ProtocolResult<u16> {
    if channel as usize >= CHANNEL_COUNT {
        return Err(ProtocolError::InvalidChannel(channel));
    }
    if band > 0x0F {
        return Err(ProtocolError::InvalidBand(band));
    }
    Ok((u16::from(channel) << 8) | (u16::from(band) << 4) | param.selector())
}

/// Inverse of [`eq_param_address`]
pub fn split_eq_param_address(value: u16) -> (u8, u8, Option<EqParam>) {
    let channel = (value >> 8) as u8;
    let band = ((value >> 4) & 0x0F) as u8;
    (channel, band, EqParam::from_selector(value & 0x0F))
}

/// One decoded `GetEqParam` response
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EqParamValue {
    Kind(FilterKind),
    Frequency(f32),
    Q(f32),
    Gain(f32),
}

/// Decode a 4-byte `GetEqParam` response for `param`
///
/// Kind is a u32 code, the rest are f32.
pub fn decode_eq_param(param: EqParam, buf: &[u8]) -> ProtocolResult<EqParamValue> {
    let what = param.label();
    match param {
        EqParam::Kind => {
            let code = decode_u32(what, buf)?;
            FilterKind::from_wire_code(code)
                .map(EqParamValue::Kind)
                .ok_or(ProtocolError::UnknownFilterKind(code))
        }
        EqParam::Frequency => decode_f32(what, buf).map(EqParamValue::Frequency),
        EqParam::Q => decode_f32(what, buf).map(EqParamValue::Q),
        EqParam::Gain => decode_f32(what, buf).map(EqParamValue::Gain),
    }
}

/// Encode a `GetEqParam` response (device side)
pub fn encode_eq_param(value: EqParamValue) -> [u8; WORD_LEN] {
    match value {
        EqParamValue::Kind(kind) => encode_u32(u32::from(kind.wire_code())),
        EqParamValue::Frequency(v) | EqParamValue::Q(v) | EqParamValue::Gain(v) => encode_f32(v),
    }
}

/// Collects the four per-field reads of one band
#[derive(Debug, Clone, Copy, Default)]
pub struct BandReadback {
    kind: Option<FilterKind>,
    frequency: Option<f32>,
    q: Option<f32>,
    gain: Option<f32>,
}

impl BandReadback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, value: EqParamValue) {
        match value {
            EqParamValue::Kind(kind) => self.kind = Some(kind),
            EqParamValue::Frequency(v) => self.frequency = Some(v),
            EqParamValue::Q(v) => self.q = Some(v),
            EqParamValue::Gain(v) => self.gain = Some(v),
        }
    }

    /// The complete band, once all four fields have arrived
    pub fn finish(self) -> Option<FilterParams> {
        Some(FilterParams::new(
            self.kind?,
            self.frequency?,
            self.q?,
            self.gain?,
        ))
    }
}

// ============================================================================
// Status and telemetry
// ============================================================================

/// Telemetry snapshot from the combined status read
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemStatus {
    /// Normalized peak level per channel, catalog order, 0.0 - 1.0
    pub peaks: [f32; CHANNEL_COUNT],
    /// DSP core load, percent
    pub core_loads: [u8; 2],
}

impl SystemStatus {
    /// Full-scale raw peak value
    pub const PEAK_SCALE: f32 = 65535.0;

    pub fn decode(buf: &[u8]) -> ProtocolResult<Self> {
        require("status", buf, STATUS_PAYLOAD_LEN)?;
        let peaks = core::array::from_fn(|i| {
            f32::from(LittleEndian::read_u16(&buf[i * 2..i * 2 + 2])) / Self::PEAK_SCALE
        });
        Ok(Self {
            peaks,
            core_loads: [buf[10], buf[11]],
        })
    }

    /// Device-side encoding; peaks are clamped to 0.0 - 1.0
    pub fn encode(&self) -> [u8; STATUS_PAYLOAD_LEN] {
        let mut buf = [0u8; STATUS_PAYLOAD_LEN];
        for (i, peak) in self.peaks.iter().enumerate() {
            let raw = (peak.clamp(0.0, 1.0) * Self::PEAK_SCALE).round() as u16;
            LittleEndian::write_u16(&mut buf[i * 2..i * 2 + 2], raw);
        }
        buf[10] = self.core_loads[0];
        buf[11] = self.core_loads[1];
        buf
    }

    /// Highest peak across all channels
    pub fn max_peak(&self) -> f32 {
        self.peaks.iter().copied().fold(0.0, f32::max)
    }
}

/// Individually addressable `GetStatus` fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TelemetryField {
    /// Raw peak (0 - 65535) of a catalog channel
    Peak(u8),
    CoreLoad(u8),
    /// Hundredths of a degree Celsius
    Temperature,
    /// Millivolts
    SupplyVoltage,
    /// Seconds since power-up
    Uptime,
}

impl TelemetryField {
    pub fn value_code(self) -> ProtocolResult<u16> {
        match self {
            TelemetryField::Peak(ch) if (ch as usize) < CHANNEL_COUNT => Ok(u16::from(ch)),
            TelemetryField::Peak(ch) => Err(ProtocolError::InvalidChannel(ch)),
            TelemetryField::CoreLoad(core) if core < 2 => Ok(5 + u16::from(core)),
            TelemetryField::CoreLoad(core) => Err(ProtocolError::InvalidChannel(core)),
            TelemetryField::Temperature => Ok(7),
            TelemetryField::SupplyVoltage => Ok(8),
            TelemetryField::Uptime => Ok(10),
        }
    }

    pub fn from_value_code(code: u16) -> Option<Self> {
        match code {
            0..=4 => Some(TelemetryField::Peak(code as u8)),
            5 | 6 => Some(TelemetryField::CoreLoad((code - 5) as u8)),
            7 => Some(TelemetryField::Temperature),
            8 => Some(TelemetryField::SupplyVoltage),
            10 => Some(TelemetryField::Uptime),
            _ => None,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, TelemetryField::Temperature)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryValue {
    Unsigned(u32),
    Signed(i32),
}

impl TelemetryValue {
    pub fn as_f64(self) -> f64 {
        match self {
            TelemetryValue::Unsigned(v) => f64::from(v),
            TelemetryValue::Signed(v) => f64::from(v),
        }
    }
}

pub fn decode_telemetry(field: TelemetryField, buf: &[u8]) -> ProtocolResult<TelemetryValue> {
    if field.is_signed() {
        decode_i32("telemetry", buf).map(TelemetryValue::Signed)
    } else {
        decode_u32("telemetry", buf).map(TelemetryValue::Unsigned)
    }
}

/// Environmental readings assembled from individual telemetry fields
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentStats {
    pub temperature_c: f32,
    pub supply_volts: f32,
    pub uptime_secs: u32,
}

// ============================================================================
// Persistence
// ============================================================================

/// Result byte of `SaveParams`, `LoadParams` and `FactoryReset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistResult {
    Ok,
    ErrWrite,
    ErrNoData,
    ErrCrc,
    /// A code this host does not know, passed through as-is
    Unknown(u8),
}

impl PersistResult {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => PersistResult::Ok,
            1 => PersistResult::ErrWrite,
            2 => PersistResult::ErrNoData,
            3 => PersistResult::ErrCrc,
            other => PersistResult::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            PersistResult::Ok => 0,
            PersistResult::ErrWrite => 1,
            PersistResult::ErrNoData => 2,
            PersistResult::ErrCrc => 3,
            PersistResult::Unknown(code) => code,
        }
    }

    pub fn is_ok(self) -> bool {
        self == PersistResult::Ok
    }

    pub fn decode(buf: &[u8]) -> ProtocolResult<Self> {
        require("persistence result", buf, 1)?;
        Ok(Self::from_code(buf[0]))
    }
}

impl fmt::Display for PersistResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistResult::Ok => f.write_str("ok"),
            PersistResult::ErrWrite => f.write_str("flash write failed"),
            PersistResult::ErrNoData => f.write_str("no saved parameters"),
            PersistResult::ErrCrc => f.write_str("saved parameters failed CRC check"),
            PersistResult::Unknown(code) => write!(f, "unknown result code {code}"),
        }
    }
}
