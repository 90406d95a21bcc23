//! Presence and Status Poller
//!
//! Two named threads, each driven by a crossbeam ticker:
//!
//! ```text
//! peqlink-presence ── every presence_interval ──▶ search_step()   (while searching)
//! peqlink-status   ── every status_interval   ──▶ poll_status()   (while connected)
//! ```
//!
//! Both select on one stop channel. Dropping the sender wakes them at once;
//! an in-flight transfer finishes before its thread sees the stop.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use tracing::{debug, info};

use crate::connection::ConnectionManager;
use crate::error::{ControllerError, ControllerResult};

pub struct Poller {
    stop_tx: Option<Sender<()>>,
    presence: Option<JoinHandle<()>>,
    status: Option<JoinHandle<()>>,
}

impl Poller {
    /// Spawn both loops
    pub fn start(
        manager: Arc<ConnectionManager>,
        presence_interval: Duration,
        status_interval: Duration,
    ) -> ControllerResult<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(0);

        // A half-started poller is stopped by Drop if the second spawn fails
        let mut poller = Self {
            stop_tx: Some(stop_tx),
            presence: None,
            status: None,
        };

        let presence_manager = Arc::clone(&manager);
        let presence_stop = stop_rx.clone();
        poller.presence = Some(
            thread::Builder::new()
                .name("peqlink-presence".into())
                .spawn(move || presence_loop(&presence_manager, presence_interval, &presence_stop))
                .map_err(|e| ControllerError::Thread(e.to_string()))?,
        );

        poller.status = Some(
            thread::Builder::new()
                .name("peqlink-status".into())
                .spawn(move || status_loop(&manager, status_interval, &stop_rx))
                .map_err(|e| ControllerError::Thread(e.to_string()))?,
        );

        info!(
            "Poller started (presence {:?}, status {:?})",
            presence_interval, status_interval
        );
        Ok(poller)
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// Signal both loops and wait for them to exit
    pub fn stop(&mut self) {
        if self.stop_tx.take().is_none() {
            return;
        }
        for handle in [self.presence.take(), self.status.take()].into_iter().flatten() {
            let _ = handle.join();
        }
        info!("Poller stopped");
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn presence_loop(manager: &ConnectionManager, interval: Duration, stop: &Receiver<()>) {
    debug!("Presence loop running");
    // First attempt right away rather than one interval in
    if !manager.is_connected() {
        manager.search_step();
    }

    let ticker = tick(interval);
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => {
                if !manager.is_connected() {
                    manager.search_step();
                }
            }
        }
    }
    debug!("Presence loop exiting");
}

fn status_loop(manager: &ConnectionManager, interval: Duration, stop: &Receiver<()>) {
    debug!("Status loop running");
    let ticker = tick(interval);
    loop {
        select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => {
                if manager.status_polling_enabled() {
                    manager.poll_status();
                }
            }
        }
    }
    debug!("Status loop exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::message::Event;
    use peqlink_protocol::mock::MockDevice;
    use peqlink_protocol::{DeviceIdentity, Transport};
    use std::time::Instant;

    fn setup(device: &MockDevice) -> (Arc<ConnectionManager>, crossbeam_channel::Receiver<Event>) {
        let transport = Arc::new(Transport::new(Box::new(device.backend())));
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let manager = Arc::new(ConnectionManager::new(
            transport,
            DeviceIdentity::PEQ_LINK,
            events,
        ));
        (manager, rx)
    }

    #[test]
    fn test_connects_and_streams_status() {
        let device = MockDevice::new();
        let (manager, rx) = setup(&device);
        let mut poller = Poller::start(
            Arc::clone(&manager),
            Duration::from_millis(20),
            Duration::from_millis(5),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut updates = 0;
        while updates < 3 && Instant::now() < deadline {
            if let Ok(Event::StatusUpdate(_)) = rx.recv_timeout(Duration::from_millis(100)) {
                updates += 1;
            }
        }
        poller.stop();

        assert!(manager.is_connected());
        assert!(updates >= 3);
    }

    #[test]
    fn test_stop_joins_threads() {
        let device = MockDevice::new();
        device.unplug();
        let (manager, _rx) = setup(&device);
        let mut poller = Poller::start(
            manager,
            Duration::from_secs(60),
            Duration::from_secs(60),
        )
        .unwrap();
        assert!(poller.is_running());

        let started = Instant::now();
        poller.stop();
        assert!(!poller.is_running());
        // The stop channel wakes the loops long before the next tick
        assert!(started.elapsed() < Duration::from_secs(5));

        // Stopping twice is harmless
        poller.stop();
    }

    #[test]
    fn test_no_status_reads_while_searching() {
        let device = MockDevice::new();
        device.unplug();
        let (manager, _rx) = setup(&device);
        let poller = Poller::start(
            manager,
            Duration::from_millis(10),
            Duration::from_millis(2),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(60));
        drop(poller);

        assert!(device.transfer_log().is_empty());
    }
}
