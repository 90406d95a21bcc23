//! Device Controller
//!
//! The collaborator-facing surface. Each call is one or more blocking
//! transfers through the shared transport and returns its own `Result`;
//! a link failure in any call also tears the connection down through the
//! [`ConnectionManager`].
//!
//! A band table caches the last known parameters of every channel. Slots
//! are replaced whole, never edited in place, and keep their identity
//! across replacements.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use peqlink_dsp::{CurvePoint, FilterParams, ResponseEvaluator};
use peqlink_protocol::{
    channel, decode_bool, decode_eq_param, decode_f32, decode_telemetry, encode_bool, encode_f32,
    encode_set_eq, eq_param_address, BandReadback, Channel, EnvironmentStats, EqParam,
    PersistResult, ProtocolError, ProtocolResult, Request, SystemStatus, TelemetryField,
    TelemetryValue, Transport, UsbBackend, BANDS_PER_CHANNEL, CHANNEL_COUNT, WORD_LEN,
};

use crate::config::ControllerConfig;
use crate::connection::{read_status, ConnectionManager, ConnectionStatus};
use crate::error::{ControllerError, ControllerResult};
use crate::events::EventBus;
use crate::message::Event;
use crate::poller::Poller;

type BandTable = [[FilterParams; BANDS_PER_CHANNEL]; CHANNEL_COUNT];

fn default_band_table() -> BandTable {
    std::array::from_fn(|_| std::array::from_fn(|_| FilterParams::default()))
}

pub struct DeviceController {
    config: ControllerConfig,
    transport: Arc<Transport>,
    events: Arc<EventBus>,
    connection: Arc<ConnectionManager>,
    bands: RwLock<BandTable>,
    poller: Mutex<Option<Poller>>,
}

impl DeviceController {
    /// Controller over `backend`; nothing is claimed until the first search
    pub fn new(config: ControllerConfig, backend: Box<dyn UsbBackend>) -> ControllerResult<Self> {
        config.validate()?;

        let transport = Arc::new(Transport::new(backend));
        let events = Arc::new(EventBus::new());
        let connection = Arc::new(ConnectionManager::new(
            Arc::clone(&transport),
            config.device,
            Arc::clone(&events),
        ));

        Ok(Self {
            config,
            transport,
            events,
            connection,
            bands: RwLock::new(default_band_table()),
            poller: Mutex::new(None),
        })
    }

    /// Controller over the backend this build provides
    pub fn with_default_backend(config: ControllerConfig) -> ControllerResult<Self> {
        let backend = peqlink_protocol::default_backend(config.transfer_timeout())?;
        Self::new(config, backend)
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.transport.backend_name()
    }

    // ---- Lifecycle --------------------------------------------------------

    /// Spawn the presence and status loops; a no-op if already running
    pub fn start_polling(&self) -> ControllerResult<()> {
        let mut poller = self.poller.lock();
        if poller.is_none() {
            *poller = Some(Poller::start(
                Arc::clone(&self.connection),
                self.config.presence_interval(),
                self.config.status_interval(),
            )?);
        }
        Ok(())
    }

    pub fn is_polling(&self) -> bool {
        self.poller.lock().is_some()
    }

    /// Stop polling and release the device
    pub fn shutdown(&self) {
        let poller = self.poller.lock().take();
        if let Some(mut poller) = poller {
            poller.stop();
        }
        self.connection.disconnect("shutdown");
        info!("Controller shut down");
    }

    /// One search attempt outside the presence loop
    pub fn search(&self) -> bool {
        self.connection.search_step()
    }

    /// Drop the current claim and search again immediately
    pub fn reconnect(&self) -> bool {
        self.connection.reconnect()
    }

    pub fn connection_state(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn subscribe(&self) -> crossbeam_channel::Receiver<Event> {
        self.events.subscribe()
    }

    // ---- Transfers --------------------------------------------------------

    /// Run `f` against the transport, reporting link failures against the
    /// handle epoch the call started on
    fn call<T>(&self, f: impl FnOnce(&Transport) -> ProtocolResult<T>) -> ControllerResult<T> {
        let epoch = self.transport.epoch();
        f(&self.transport).map_err(|err| {
            if self.connection.report_failure(&err, epoch) {
                debug!("Call failure dropped the connection");
            }
            ControllerError::from(err)
        })
    }

    fn lookup(channel_id: u8) -> ControllerResult<&'static Channel> {
        channel(channel_id).ok_or_else(|| ProtocolError::InvalidChannel(channel_id).into())
    }

    fn lookup_band(channel_id: u8, band: u8) -> ControllerResult<&'static Channel> {
        let ch = Self::lookup(channel_id)?;
        if !ch.has_band(band) {
            return Err(ProtocolError::InvalidBand(band).into());
        }
        Ok(ch)
    }

    // ---- EQ bands ---------------------------------------------------------

    /// Write one band in a single transfer
    pub fn set_filter(&self, channel: u8, band: u8, params: FilterParams) -> ControllerResult<()> {
        Self::lookup_band(channel, band)?;
        params.validate(self.config.sample_rate)?;

        let payload = encode_set_eq(channel, band, &params);
        self.call(|t| t.send(Request::SetEqParam, 0, &payload))?;

        let mut table = self.bands.write();
        let slot = &mut table[channel as usize][band as usize];
        *slot = params.with_identity_of(slot);
        debug!("Set ch{} band{}: {}", channel, band, params);
        Ok(())
    }

    /// Read one band back, one transfer per field
    ///
    /// The cached slot is replaced when the device disagrees with it.
    pub fn get_filter(&self, channel: u8, band: u8) -> ControllerResult<FilterParams> {
        Self::lookup_band(channel, band)?;

        let fresh = self.call(|t| {
            let mut readback = BandReadback::new();
            for param in EqParam::ALL {
                let value = eq_param_address(channel, band, param)?;
                let buf = t.receive(Request::GetEqParam, value, WORD_LEN)?;
                readback.apply(decode_eq_param(param, &buf)?);
            }
            readback.finish().ok_or(ProtocolError::Decode {
                what: "band",
                expected: EqParam::ALL.len(),
                got: 0,
            })
        })?;

        let (current, changed) = {
            let mut table = self.bands.write();
            let slot = &mut table[channel as usize][band as usize];
            if *slot == fresh {
                (*slot, false)
            } else {
                *slot = fresh.with_identity_of(slot).set_active(slot.is_active);
                (*slot, true)
            }
        };

        if changed {
            self.events.publish(Event::FilterChanged {
                channel,
                band,
                params: current,
            });
        }
        Ok(current)
    }

    /// Read every band of `channel` from the device
    pub fn read_channel(&self, channel: u8) -> ControllerResult<Vec<FilterParams>> {
        let ch = Self::lookup(channel)?;
        (0..ch.band_capacity as u8)
            .map(|band| self.get_filter(channel, band))
            .collect()
    }

    /// Cached bands of `channel`, no I/O
    pub fn bands(&self, channel: u8) -> ControllerResult<Vec<FilterParams>> {
        Self::lookup(channel)?;
        Ok(self.bands.read()[channel as usize].to_vec())
    }

    /// Local response of the cached bands of `channel`
    pub fn channel_response(&self, channel: u8) -> ControllerResult<Vec<CurvePoint>> {
        let bands = self.bands(channel)?;
        let evaluator = ResponseEvaluator::new(&bands, self.config.sample_rate);
        Ok(evaluator.curve(&self.config.curve))
    }

    // ---- Global parameters ------------------------------------------------

    pub fn set_preamp(&self, db: f32) -> ControllerResult<()> {
        self.call(|t| t.send(Request::SetPreamp, 0, &encode_f32(db)))
    }

    pub fn get_preamp(&self) -> ControllerResult<f32> {
        self.call(|t| {
            let buf = t.receive(Request::GetPreamp, 0, WORD_LEN)?;
            decode_f32("preamp", &buf)
        })
    }

    pub fn set_bypass(&self, bypass: bool) -> ControllerResult<()> {
        self.call(|t| t.send(Request::SetBypass, 0, &encode_bool(bypass)))
    }

    pub fn get_bypass(&self) -> ControllerResult<bool> {
        self.call(|t| {
            let buf = t.receive(Request::GetBypass, 0, 1)?;
            decode_bool("bypass", &buf)
        })
    }

    /// Delay in milliseconds; output channels only
    pub fn set_delay(&self, channel: u8, ms: f32) -> ControllerResult<()> {
        if !Self::lookup(channel)?.supports_delay() {
            return Err(ControllerError::NotDelayCapable(channel));
        }
        self.call(|t| t.send(Request::SetDelay, u16::from(channel), &encode_f32(ms)))
    }

    pub fn get_delay(&self, channel: u8) -> ControllerResult<f32> {
        if !Self::lookup(channel)?.supports_delay() {
            return Err(ControllerError::NotDelayCapable(channel));
        }
        self.call(|t| {
            let buf = t.receive(Request::GetDelay, u16::from(channel), WORD_LEN)?;
            decode_f32("delay", &buf)
        })
    }

    // ---- Telemetry --------------------------------------------------------

    pub fn get_status(&self) -> ControllerResult<SystemStatus> {
        self.call(read_status)
    }

    pub fn get_telemetry(&self, field: TelemetryField) -> ControllerResult<TelemetryValue> {
        let value = field.value_code()?;
        self.call(|t| {
            let buf = t.receive(Request::GetStatus, value, WORD_LEN)?;
            decode_telemetry(field, &buf)
        })
    }

    /// Temperature, supply voltage and uptime, three transfers
    pub fn get_environment(&self) -> ControllerResult<EnvironmentStats> {
        let temperature = self.get_telemetry(TelemetryField::Temperature)?.as_f64();
        let voltage = self.get_telemetry(TelemetryField::SupplyVoltage)?.as_f64();
        let uptime = match self.get_telemetry(TelemetryField::Uptime)? {
            TelemetryValue::Unsigned(secs) => secs,
            TelemetryValue::Signed(secs) => secs.max(0) as u32,
        };

        Ok(EnvironmentStats {
            temperature_c: (temperature / 100.0) as f32,
            supply_volts: (voltage / 1000.0) as f32,
            uptime_secs: uptime,
        })
    }

    // ---- Flash persistence ------------------------------------------------

    fn persist(&self, request: Request) -> ControllerResult<PersistResult> {
        let result = self.call(|t| {
            let buf = t.receive(request, 0, 1)?;
            PersistResult::decode(&buf)
        })?;
        info!("{:?}: {}", request, result);
        Ok(result)
    }

    /// Store the active parameters in flash
    pub fn save_params(&self) -> ControllerResult<PersistResult> {
        self.persist(Request::SaveParams)
    }

    /// Restore parameters from flash; the band cache is left as it was
    pub fn load_params(&self) -> ControllerResult<PersistResult> {
        self.persist(Request::LoadParams)
    }

    /// Reset the device to defaults; on success the band cache follows
    pub fn factory_reset(&self) -> ControllerResult<PersistResult> {
        let result = self.persist(Request::FactoryReset)?;
        if result.is_ok() {
            let mut table = self.bands.write();
            for slot in table.iter_mut().flatten() {
                *slot = FilterParams::default().with_identity_of(slot);
            }
        }
        Ok(result)
    }
}

impl Drop for DeviceController {
    fn drop(&mut self) {
        let poller = self.poller.lock().take();
        if let Some(mut poller) = poller {
            poller.stop();
        }
        self.transport.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peqlink_dsp::FilterKind;
    use peqlink_protocol::mock::MockDevice;

    fn connected() -> (DeviceController, MockDevice) {
        let device = MockDevice::new();
        let controller =
            DeviceController::new(ControllerConfig::default(), Box::new(device.backend())).unwrap();
        assert!(controller.search());
        (controller, device)
    }

    #[test]
    fn test_set_filter_is_one_transfer() {
        let (controller, device) = connected();
        device.clear_log();

        let band = FilterParams::peaking(1000.0, 1.0, -6.0);
        controller.set_filter(2, 3, band).unwrap();

        assert_eq!(device.transfer_log().len(), 1);
        assert_eq!(device.band(2, 3), Some(band));
    }

    #[test]
    fn test_get_filter_is_four_transfers() {
        let (controller, device) = connected();
        device.set_band(0, 0, &FilterParams::peaking(1000.0, 0.9, 2.0));
        device.clear_log();

        let band = controller.get_filter(0, 0).unwrap();
        assert_eq!(band.frequency, 1000.0);
        assert_eq!(device.count_requests(Request::GetEqParam), 4);
        assert_eq!(device.transfer_log().len(), 4);
    }

    #[test]
    fn test_set_filter_keeps_identity() {
        let (controller, _device) = connected();
        let before = controller.bands(1).unwrap()[4];

        controller
            .set_filter(1, 4, FilterParams::new(FilterKind::LowShelf, 120.0, 0.7, 3.0))
            .unwrap();

        let after = controller.bands(1).unwrap()[4];
        assert_eq!(after.id, before.id);
        assert_eq!(after.kind, FilterKind::LowShelf);
    }

    #[test]
    fn test_invalid_arguments_send_nothing() {
        let (controller, device) = connected();
        device.clear_log();

        assert!(matches!(
            controller.set_filter(5, 0, FilterParams::default()),
            Err(ControllerError::Protocol(ProtocolError::InvalidChannel(5)))
        ));
        assert!(matches!(
            controller.set_filter(0, 10, FilterParams::default()),
            Err(ControllerError::Protocol(ProtocolError::InvalidBand(10)))
        ));
        assert!(matches!(
            controller.set_filter(0, 0, FilterParams::peaking(1000.0, 0.0, 1.0)),
            Err(ControllerError::Dsp(_))
        ));
        assert!(matches!(
            controller.set_delay(0, 2.0),
            Err(ControllerError::NotDelayCapable(0))
        ));

        assert!(device.transfer_log().is_empty());
        assert!(controller.is_connected());
    }

    #[test]
    fn test_calls_fail_fast_when_disconnected() {
        let device = MockDevice::new();
        let controller =
            DeviceController::new(ControllerConfig::default(), Box::new(device.backend())).unwrap();

        assert!(matches!(
            controller.get_preamp(),
            Err(ControllerError::Protocol(ProtocolError::NotConnected))
        ));
        assert!(device.transfer_log().is_empty());
    }

    #[test]
    fn test_global_parameters() {
        let (controller, device) = connected();

        controller.set_preamp(-4.5).unwrap();
        assert_eq!(device.preamp(), -4.5);
        assert_eq!(controller.get_preamp().unwrap(), -4.5);

        controller.set_bypass(true).unwrap();
        assert!(controller.get_bypass().unwrap());

        controller.set_delay(4, 12.5).unwrap();
        assert_eq!(device.delay(4), Some(12.5));
        assert_eq!(controller.get_delay(4).unwrap(), 12.5);
    }

    #[test]
    fn test_environment() {
        let (controller, device) = connected();
        device.set_environment(4125, 5050, 86_400);

        let env = controller.get_environment().unwrap();
        assert!((env.temperature_c - 41.25).abs() < 1e-4);
        assert!((env.supply_volts - 5.05).abs() < 1e-4);
        assert_eq!(env.uptime_secs, 86_400);
    }

    #[test]
    fn test_channel_response_uses_cache() {
        let (controller, _device) = connected();
        let curve = controller.channel_response(0).unwrap();
        assert_eq!(curve.len(), 201);
        assert!(curve.iter().all(|p| p.db == 0.0));

        controller
            .set_filter(0, 0, FilterParams::peaking(1000.0, 1.0, 6.0))
            .unwrap();
        let curve = controller.channel_response(0).unwrap();
        assert!(curve.iter().any(|p| p.db > 5.0));
    }

    #[test]
    fn test_failure_on_replaced_handle_keeps_connection() {
        let (controller, device) = connected();
        let rx = controller.subscribe();
        device.fail_next_transfers(1);

        let result = controller.call(|t| {
            let err = t.receive(Request::GetPreamp, 0, WORD_LEN).unwrap_err();
            // Reconnect lands while the failed call is still unwinding
            assert!(controller.reconnect());
            Err::<(), _>(err)
        });

        assert!(result.is_err());
        assert!(controller.is_connected());
        assert!(!rx.try_iter().any(|e| matches!(e, Event::DeviceRemoved)));
        assert_eq!(device.open_count(), 2);
        controller.set_preamp(2.0).unwrap();
    }
}
