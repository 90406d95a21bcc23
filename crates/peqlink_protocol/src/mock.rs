//! In-Memory Device
//!
//! Implements the documented request set against plain state so the stack
//! above the transport can be tested without hardware. Clones of a
//! [`MockDevice`] share one device: tests keep a clone for fault injection
//! and inspection while the backend is owned by the transport.
//!
//! Every transfer bumps an in-flight counter for its whole duration,
//! including the optional delay, so two transfers overlapping in time are
//! caught by [`MockDevice::overlap_detected`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use peqlink_dsp::{FilterKind, FilterParams};

use crate::channel::{BANDS_PER_CHANNEL, CHANNEL_COUNT};
use crate::codec::{
    encode_bool, encode_eq_param, encode_f32, encode_u32, split_eq_param_address, Direction,
    EqParam, EqParamValue, PersistResult, Request, SetEqCommand, SystemStatus, TelemetryField,
    STATUS_COMBINED_VALUE,
};
use crate::codec::{decode_bool, decode_f32};
use crate::error::{ClaimError, ProtocolError, ProtocolResult};
use crate::transport::{ControlHandle, DeviceIdentity, UsbBackend};

/// One transfer as seen by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRecord {
    pub request: u8,
    pub value: u16,
    pub direction: Direction,
    pub len: usize,
}

#[derive(Debug, Clone, Copy)]
struct Band {
    kind: FilterKind,
    frequency: f32,
    q: f32,
    gain: f32,
}

impl Default for Band {
    fn default() -> Self {
        Self {
            kind: FilterKind::Flat,
            frequency: FilterParams::DEFAULT_FREQUENCY,
            q: FilterParams::DEFAULT_Q,
            gain: 0.0,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Parameters {
    bands: [[Band; BANDS_PER_CHANNEL]; CHANNEL_COUNT],
    preamp: f32,
    bypass: bool,
    delays: [f32; CHANNEL_COUNT],
}

struct MockState {
    identity: DeviceIdentity,
    present: bool,
    /// Bumped on unplug; handles from an older generation are dead
    generation: u64,
    claim_error: Option<ClaimError>,
    fail_next: usize,
    truncate: Option<usize>,
    persist_override: Option<u8>,
    delay: Duration,
    claim_delay: Duration,

    params: Parameters,
    flash: Option<Parameters>,
    status: SystemStatus,
    temperature_centi: i32,
    supply_mv: u32,
    uptime_secs: u32,

    log: Vec<TransferRecord>,
    open_count: usize,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            identity: DeviceIdentity::PEQ_LINK,
            present: true,
            generation: 0,
            claim_error: None,
            fail_next: 0,
            truncate: None,
            persist_override: None,
            delay: Duration::ZERO,
            claim_delay: Duration::ZERO,
            params: Parameters::default(),
            flash: None,
            status: SystemStatus::default(),
            temperature_centi: 3650,
            supply_mv: 5000,
            uptime_secs: 0,
            log: Vec::new(),
            open_count: 0,
        }
    }
}

struct Shared {
    state: Mutex<MockState>,
    in_flight: AtomicUsize,
    overlap: AtomicBool,
}

/// Shared handle to one simulated device
#[derive(Clone)]
pub struct MockDevice {
    shared: Arc<Shared>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MockState::default()),
                in_flight: AtomicUsize::new(0),
                overlap: AtomicBool::new(false),
            }),
        }
    }

    /// Backend that opens this device
    pub fn backend(&self) -> MockBackend {
        MockBackend {
            device: self.clone(),
        }
    }

    // ---- Fault injection --------------------------------------------------

    /// Remove the device from the bus; open handles start failing
    pub fn unplug(&self) {
        let mut state = self.shared.state.lock();
        state.present = false;
        state.generation += 1;
    }

    pub fn plug_in(&self) {
        self.shared.state.lock().present = true;
    }

    /// Make every claim fail with `err` while the device stays present
    pub fn fail_claims(&self, err: Option<ClaimError>) {
        self.shared.state.lock().claim_error = err;
    }

    /// Fail the next `count` transfers with a USB error
    pub fn fail_next_transfers(&self, count: usize) {
        self.shared.state.lock().fail_next = count;
    }

    /// Return at most `len` bytes from every IN transfer
    pub fn truncate_reads(&self, len: Option<usize>) {
        self.shared.state.lock().truncate = len;
    }

    /// Answer persistence requests with `code` instead of the simulated result
    pub fn set_persist_result(&self, code: Option<u8>) {
        self.shared.state.lock().persist_override = code;
    }

    /// Hold each transfer in flight for `delay`
    pub fn set_transfer_delay(&self, delay: Duration) {
        self.shared.state.lock().delay = delay;
    }

    /// Make every claim take `delay`, like a slow bus enumeration
    pub fn set_claim_delay(&self, delay: Duration) {
        self.shared.state.lock().claim_delay = delay;
    }

    // ---- Device-side state ------------------------------------------------

    pub fn set_status(&self, status: SystemStatus) {
        self.shared.state.lock().status = status;
    }

    pub fn set_environment(&self, temperature_centi: i32, supply_mv: u32, uptime_secs: u32) {
        let mut state = self.shared.state.lock();
        state.temperature_centi = temperature_centi;
        state.supply_mv = supply_mv;
        state.uptime_secs = uptime_secs;
    }

    /// Change a band behind the host's back
    pub fn set_band(&self, channel: u8, band: u8, params: &FilterParams) {
        let mut state = self.shared.state.lock();
        if let Some(slot) = state
            .params
            .bands
            .get_mut(channel as usize)
            .and_then(|bands| bands.get_mut(band as usize))
        {
            *slot = Band {
                kind: params.kind,
                frequency: params.frequency,
                q: params.q,
                gain: params.gain,
            };
        }
    }

    pub fn band(&self, channel: u8, band: u8) -> Option<FilterParams> {
        let state = self.shared.state.lock();
        let b = state.params.bands.get(channel as usize)?.get(band as usize)?;
        Some(FilterParams::new(b.kind, b.frequency, b.q, b.gain))
    }

    pub fn preamp(&self) -> f32 {
        self.shared.state.lock().params.preamp
    }

    pub fn bypass(&self) -> bool {
        self.shared.state.lock().params.bypass
    }

    pub fn delay(&self, channel: u8) -> Option<f32> {
        self.shared.state.lock().params.delays.get(channel as usize).copied()
    }

    pub fn has_saved_params(&self) -> bool {
        self.shared.state.lock().flash.is_some()
    }

    // ---- Inspection -------------------------------------------------------

    pub fn transfer_log(&self) -> Vec<TransferRecord> {
        self.shared.state.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.shared.state.lock().log.clear();
    }

    /// Transfers logged for `request`
    pub fn count_requests(&self, request: Request) -> usize {
        let code = request.code();
        self.shared
            .state
            .lock()
            .log
            .iter()
            .filter(|r| r.request == code)
            .count()
    }

    /// Successful claims so far
    pub fn open_count(&self) -> usize {
        self.shared.state.lock().open_count
    }

    /// Whether two transfers were ever in flight at once
    pub fn overlap_detected(&self) -> bool {
        self.shared.overlap.load(Ordering::SeqCst)
    }

    // ---- Transfer handling ------------------------------------------------

    fn transfer<F>(&self, generation: u64, record: TransferRecord, f: F) -> ProtocolResult<usize>
    where
        F: FnOnce(&mut MockState) -> ProtocolResult<usize>,
    {
        if self.shared.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.shared.overlap.store(true, Ordering::SeqCst);
        }

        let delay = self.shared.state.lock().delay;
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        let result = {
            let mut state = self.shared.state.lock();
            state.log.push(record);
            if !state.present || state.generation != generation {
                Err(ProtocolError::DeviceGone)
            } else if state.fail_next > 0 {
                state.fail_next -= 1;
                Err(ProtocolError::Usb("injected failure".into()))
            } else {
                f(&mut state)
            }
        };

        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn stall() -> ProtocolError {
    ProtocolError::Usb("pipe stall".into())
}

fn band_slot(params: &mut Parameters, channel: u8, band: u8) -> ProtocolResult<&mut Band> {
    params
        .bands
        .get_mut(channel as usize)
        .and_then(|bands| bands.get_mut(band as usize))
        .ok_or_else(stall)
}

impl MockState {
    fn handle_write(&mut self, request: Request, value: u16, data: &[u8]) -> ProtocolResult<()> {
        match request {
            Request::SetEqParam => {
                let cmd = SetEqCommand::decode(data).map_err(|_| stall())?;
                *band_slot(&mut self.params, cmd.channel, cmd.band)? = Band {
                    kind: cmd.kind,
                    frequency: cmd.frequency,
                    q: cmd.q,
                    gain: cmd.gain,
                };
            }
            Request::SetPreamp => self.params.preamp = decode_f32("preamp", data).map_err(|_| stall())?,
            Request::SetBypass => self.params.bypass = decode_bool("bypass", data).map_err(|_| stall())?,
            Request::SetDelay => {
                let ms = decode_f32("delay", data).map_err(|_| stall())?;
                *self.params.delays.get_mut(value as usize).ok_or_else(stall)? = ms;
            }
            _ => return Err(stall()),
        }
        Ok(())
    }

    fn handle_read(&mut self, request: Request, value: u16) -> ProtocolResult<Vec<u8>> {
        let response = match request {
            Request::GetEqParam => {
                let (channel, band, param) = split_eq_param_address(value);
                let b = *band_slot(&mut self.params, channel, band)?;
                let value = match param.ok_or_else(stall)? {
                    EqParam::Kind => EqParamValue::Kind(b.kind),
                    EqParam::Frequency => EqParamValue::Frequency(b.frequency),
                    EqParam::Q => EqParamValue::Q(b.q),
                    EqParam::Gain => EqParamValue::Gain(b.gain),
                };
                encode_eq_param(value).to_vec()
            }
            Request::GetPreamp => encode_f32(self.params.preamp).to_vec(),
            Request::GetBypass => encode_bool(self.params.bypass).to_vec(),
            Request::GetDelay => {
                let ms = self.params.delays.get(value as usize).ok_or_else(stall)?;
                encode_f32(*ms).to_vec()
            }
            Request::GetStatus if value == STATUS_COMBINED_VALUE => self.status.encode().to_vec(),
            Request::GetStatus => self.telemetry(value)?.to_vec(),
            Request::SaveParams => {
                self.flash = Some(self.params.clone());
                self.persist_reply(PersistResult::Ok)
            }
            Request::LoadParams => match self.flash.clone() {
                Some(saved) => {
                    self.params = saved;
                    self.persist_reply(PersistResult::Ok)
                }
                None => self.persist_reply(PersistResult::ErrNoData),
            },
            Request::FactoryReset => {
                self.params = Parameters::default();
                self.flash = None;
                self.persist_reply(PersistResult::Ok)
            }
            _ => return Err(stall()),
        };
        Ok(response)
    }

    fn telemetry(&self, value: u16) -> ProtocolResult<[u8; 4]> {
        let field = TelemetryField::from_value_code(value).ok_or_else(stall)?;
        let word = match field {
            TelemetryField::Peak(ch) => {
                let peak = self.status.peaks[ch as usize].clamp(0.0, 1.0);
                encode_u32((peak * SystemStatus::PEAK_SCALE).round() as u32)
            }
            TelemetryField::CoreLoad(core) => {
                encode_u32(u32::from(self.status.core_loads[core as usize]))
            }
            TelemetryField::Temperature => self.temperature_centi.to_le_bytes(),
            TelemetryField::SupplyVoltage => encode_u32(self.supply_mv),
            TelemetryField::Uptime => encode_u32(self.uptime_secs),
        };
        Ok(word)
    }

    fn persist_reply(&self, result: PersistResult) -> Vec<u8> {
        vec![self.persist_override.unwrap_or(result.code())]
    }
}

/// [`UsbBackend`] over a [`MockDevice`]
pub struct MockBackend {
    device: MockDevice,
}

impl UsbBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn open(&mut self, identity: DeviceIdentity) -> Result<Box<dyn ControlHandle>, ClaimError> {
        let claim_delay = self.device.shared.state.lock().claim_delay;
        if !claim_delay.is_zero() {
            thread::sleep(claim_delay);
        }

        let mut state = self.device.shared.state.lock();
        if !state.present {
            return Err(ClaimError::NoDevices);
        }
        if identity != state.identity {
            return Err(ClaimError::NoMatchingDevice { present: 1 });
        }
        if let Some(err) = state.claim_error.clone() {
            return Err(err);
        }
        state.open_count += 1;
        Ok(Box::new(MockHandle {
            device: self.device.clone(),
            generation: state.generation,
        }))
    }
}

/// Claimed [`MockDevice`]
pub struct MockHandle {
    device: MockDevice,
    generation: u64,
}

impl ControlHandle for MockHandle {
    fn write_control(&mut self, request: u8, value: u16, data: &[u8]) -> ProtocolResult<usize> {
        let record = TransferRecord {
            request,
            value,
            direction: Direction::Out,
            len: data.len(),
        };
        self.device.transfer(self.generation, record, |state| {
            let request = Request::from_code(request).ok_or_else(stall)?;
            state.handle_write(request, value, data)?;
            Ok(data.len())
        })
    }

    fn read_control(&mut self, request: u8, value: u16, buf: &mut [u8]) -> ProtocolResult<usize> {
        let record = TransferRecord {
            request,
            value,
            direction: Direction::In,
            len: buf.len(),
        };
        self.device.transfer(self.generation, record, |state| {
            let request = Request::from_code(request).ok_or_else(stall)?;
            let response = state.handle_read(request, value)?;
            let mut n = response.len().min(buf.len());
            if let Some(limit) = state.truncate {
                n = n.min(limit);
            }
            buf[..n].copy_from_slice(&response[..n]);
            Ok(n)
        })
    }
}
