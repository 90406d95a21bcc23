//! Controller lifecycle against the in-memory device

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use peqlink_core::{
    ClaimError, ConnectionState, ControllerConfig, DeviceController, Event, FilterKind,
    FilterParams, PersistResult, SystemStatus,
};
use peqlink_protocol::mock::MockDevice;
use peqlink_protocol::Request;

fn fast_config() -> ControllerConfig {
    ControllerConfig {
        presence_interval_ms: 20,
        status_interval_ms: 5,
        ..ControllerConfig::default()
    }
}

fn controller(device: &MockDevice) -> DeviceController {
    DeviceController::new(fast_config(), Box::new(device.backend())).unwrap()
}

/// Wait for an event matching `pred`, collecting everything seen
fn wait_for(rx: &Receiver<Event>, timeout: Duration, pred: impl Fn(&Event) -> bool) -> Vec<Event> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match rx.recv_timeout(left) {
            Ok(event) => {
                let hit = pred(&event);
                seen.push(event);
                if hit {
                    break;
                }
            }
            Err(_) => break,
        }
    }
    seen
}

#[test]
fn test_driver_missing_keeps_searching() {
    let device = MockDevice::new();
    device.fail_claims(Some(ClaimError::DriverUnavailable("driver not installed".into())));
    let controller = controller(&device);
    let rx = controller.subscribe();

    controller.start_polling().unwrap();
    let events = wait_for(&rx, Duration::from_secs(2), |e| matches!(e, Event::SearchFailed { .. }));
    thread::sleep(Duration::from_millis(50));
    controller.shutdown();

    let state = controller.connection_state();
    assert_eq!(state.state, ConnectionState::Searching);
    assert!(state.last_error.is_some_and(|e| e.contains("driver")));
    assert!(events.iter().any(|e| matches!(e, Event::SearchFailed { .. })));
    // No claim, so the status loop never touched the device
    assert_eq!(device.count_requests(Request::GetStatus), 0);
}

#[test]
fn test_unplug_reports_removal_once() {
    let device = MockDevice::new();
    device.set_transfer_delay(Duration::from_millis(1));
    let controller = controller(&device);
    let rx = controller.subscribe();

    controller.start_polling().unwrap();
    wait_for(&rx, Duration::from_secs(2), |e| matches!(e, Event::StatusUpdate(_)));
    assert!(controller.is_connected());

    device.unplug();
    let events = wait_for(&rx, Duration::from_secs(2), |e| matches!(e, Event::DeviceRemoved));
    // Give the loops several more ticks to misbehave
    thread::sleep(Duration::from_millis(100));
    let later: Vec<Event> = rx.try_iter().collect();
    controller.shutdown();

    let removed = events
        .iter()
        .chain(later.iter())
        .filter(|e| matches!(e, Event::DeviceRemoved))
        .count();
    assert_eq!(removed, 1);
    assert!(!controller.is_connected());
}

#[test]
fn test_replug_reconnects() {
    let device = MockDevice::new();
    let controller = controller(&device);
    let rx = controller.subscribe();
    controller.start_polling().unwrap();

    wait_for(&rx, Duration::from_secs(2), |e| matches!(e, Event::Connected));
    device.unplug();
    wait_for(&rx, Duration::from_secs(2), |e| matches!(e, Event::DeviceRemoved));
    device.plug_in();
    let events = wait_for(&rx, Duration::from_secs(2), |e| matches!(e, Event::Connected));
    controller.shutdown();

    assert!(matches!(events.last(), Some(Event::Connected)));
    assert_eq!(device.open_count(), 2);
}

#[test]
fn test_commands_and_polling_never_overlap() {
    let device = MockDevice::new();
    device.set_transfer_delay(Duration::from_millis(2));
    let controller = Arc::new(controller(&device));
    let rx = controller.subscribe();
    controller.start_polling().unwrap();
    wait_for(&rx, Duration::from_secs(2), |e| matches!(e, Event::Connected));

    let writers: Vec<_> = (0..3u8)
        .map(|ch| {
            let controller = Arc::clone(&controller);
            thread::spawn(move || {
                for band in 0..10u8 {
                    let params = FilterParams::peaking(100.0 * f32::from(band + 1), 1.0, 1.5);
                    controller.set_filter(ch, band, params).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    controller.shutdown();

    assert!(!device.overlap_detected());
    assert!(device.count_requests(Request::GetStatus) > 0);
    assert_eq!(device.count_requests(Request::SetEqParam), 30);
    assert_eq!(device.band(2, 9).map(|b| b.frequency), Some(1000.0));
}

#[test]
fn test_status_updates_carry_device_values() {
    let device = MockDevice::new();
    device.set_status(SystemStatus {
        peaks: [1.0, 0.5, 0.25, 0.0, 0.0],
        core_loads: [42, 7],
    });
    let controller = controller(&device);
    let rx = controller.subscribe();
    controller.start_polling().unwrap();

    let events = wait_for(&rx, Duration::from_secs(2), |e| matches!(e, Event::StatusUpdate(_)));
    controller.shutdown();

    let Some(Event::StatusUpdate(status)) = events.last() else {
        panic!("no status update in {:?}", events);
    };
    assert_eq!(status.peaks[0], 1.0);
    assert!((status.peaks[2] - 0.25).abs() < 1e-4);
    assert_eq!(status.core_loads, [42, 7]);
}

#[test]
fn test_read_back_replaces_changed_bands() {
    let device = MockDevice::new();
    let controller = controller(&device);
    assert!(controller.search());
    let rx = controller.subscribe();

    let original_id = controller.bands(3).unwrap()[0].id;
    device.set_band(3, 0, &FilterParams::new(FilterKind::HighPass, 80.0, 0.707, 0.0));

    let bands = controller.read_channel(3).unwrap();
    assert_eq!(bands.len(), 10);
    assert_eq!(bands[0].kind, FilterKind::HighPass);
    assert_eq!(bands[0].id, original_id);

    // Only the band that differed produced an event
    let changed: Vec<Event> = rx.try_iter().collect();
    assert_eq!(changed.len(), 1);
    assert!(matches!(
        &changed[0],
        Event::FilterChanged { channel: 3, band: 0, params } if params.frequency == 80.0
    ));

    assert_eq!(device.count_requests(Request::GetEqParam), 40);
}

#[test]
fn test_unchanged_read_back_keeps_cache() {
    let device = MockDevice::new();
    let controller = controller(&device);
    assert!(controller.search());

    let band = FilterParams::peaking(440.0, 2.0, -3.0);
    controller.set_filter(1, 1, band).unwrap();
    let cached = controller.bands(1).unwrap()[1];
    let rx = controller.subscribe();

    let read = controller.get_filter(1, 1).unwrap();
    assert_eq!(read, band);
    assert_eq!(read.id, cached.id);
    assert!(rx.try_iter().next().is_none());
}

#[test]
fn test_persistence_codes_pass_through() {
    let device = MockDevice::new();
    let controller = controller(&device);
    assert!(controller.search());

    assert_eq!(controller.load_params().unwrap(), PersistResult::ErrNoData);
    assert_eq!(controller.save_params().unwrap(), PersistResult::Ok);
    assert_eq!(controller.load_params().unwrap(), PersistResult::Ok);

    device.set_persist_result(Some(3));
    assert_eq!(controller.load_params().unwrap(), PersistResult::ErrCrc);
    device.set_persist_result(Some(1));
    assert_eq!(controller.save_params().unwrap(), PersistResult::ErrWrite);
    device.set_persist_result(Some(77));
    assert_eq!(controller.save_params().unwrap(), PersistResult::Unknown(77));

    // Device-reported failures leave the link up
    assert!(controller.is_connected());
}

#[test]
fn test_factory_reset_clears_cache() {
    let device = MockDevice::new();
    let controller = controller(&device);
    assert!(controller.search());

    controller.set_filter(0, 2, FilterParams::peaking(3000.0, 1.0, 4.0)).unwrap();
    let id = controller.bands(0).unwrap()[2].id;

    assert!(controller.factory_reset().unwrap().is_ok());
    let after = controller.bands(0).unwrap()[2];
    assert_eq!(after, FilterParams::default());
    assert_eq!(after.id, id);
    assert_eq!(device.band(0, 2), Some(FilterParams::default()));
}

#[test]
fn test_failed_command_drops_connection() {
    let device = MockDevice::new();
    let controller = controller(&device);
    assert!(controller.search());
    let rx = controller.subscribe();

    device.fail_next_transfers(1);
    assert!(controller.set_preamp(1.0).is_err());
    assert!(!controller.is_connected());
    assert!(matches!(rx.try_recv(), Ok(Event::DeviceRemoved)));

    // Next search claims again
    assert!(controller.search());
    controller.set_preamp(1.0).unwrap();
    assert_eq!(device.preamp(), 1.0);
}

#[test]
fn test_manual_reconnect() {
    let device = MockDevice::new();
    let controller = controller(&device);
    assert!(controller.search());
    let rx = controller.subscribe();

    assert!(controller.reconnect());
    assert_eq!(device.open_count(), 2);
    let events: Vec<Event> = rx.try_iter().collect();
    assert!(matches!(events.as_slice(), [Event::Disconnected { .. }, Event::Connected]));
    assert!(!events.iter().any(|e| matches!(e, Event::DeviceRemoved)));
}

#[test]
fn test_shutdown_is_deterministic() {
    let device = MockDevice::new();
    let controller = controller(&device);
    controller.start_polling().unwrap();
    assert!(controller.is_polling());

    controller.shutdown();
    assert!(!controller.is_polling());
    assert!(!controller.is_connected());

    // Nothing talks to the device after shutdown
    let count = device.transfer_log().len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(device.transfer_log().len(), count);
}
