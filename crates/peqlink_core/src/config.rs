//! Controller Configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use peqlink_dsp::{CurveSpec, DEFAULT_SAMPLE_RATE};
use peqlink_protocol::DeviceIdentity;

use crate::error::{ControllerError, ControllerResult};

/// Device controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// USB identity to search for
    pub device: DeviceIdentity,

    /// Presence re-check cadence while not connected
    pub presence_interval_ms: u64,

    /// Status refresh cadence while connected
    pub status_interval_ms: u64,

    /// Upper bound on a single control transfer
    pub transfer_timeout_ms: u64,

    /// Sample rate used for local response curves (the unit runs at 48 kHz)
    pub sample_rate: f64,

    /// Sampling of `channel_response` curves
    pub curve: CurveSpec,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device: DeviceIdentity::default(),
            presence_interval_ms: 500,
            status_interval_ms: 100,
            transfer_timeout_ms: 1000,
            sample_rate: DEFAULT_SAMPLE_RATE,
            curve: CurveSpec::default(),
        }
    }
}

impl ControllerConfig {
    /// Fast meters, for a visible level display
    pub fn responsive() -> Self {
        Self {
            status_interval_ms: 60,
            ..Self::default()
        }
    }

    /// Slow status refresh, for background monitoring
    pub fn relaxed() -> Self {
        Self {
            status_interval_ms: 250,
            ..Self::default()
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> ControllerResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ControllerError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| ControllerError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn presence_interval(&self) -> Duration {
        Duration::from_millis(self.presence_interval_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> ControllerResult<()> {
        if self.presence_interval_ms == 0 {
            return Err(ControllerError::Config("presence interval is zero".into()));
        }
        if self.status_interval_ms == 0 {
            return Err(ControllerError::Config("status interval is zero".into()));
        }
        if self.status_interval_ms > self.presence_interval_ms {
            return Err(ControllerError::Config(format!(
                "status interval {}ms is slower than presence interval {}ms",
                self.status_interval_ms, self.presence_interval_ms
            )));
        }
        if self.transfer_timeout_ms == 0 {
            return Err(ControllerError::Config("transfer timeout is zero".into()));
        }
        if !(8_000.0..=384_000.0).contains(&self.sample_rate) {
            return Err(ControllerError::Config(format!(
                "Invalid sample rate: {}",
                self.sample_rate
            )));
        }
        self.curve
            .validate()
            .map_err(|e| ControllerError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ControllerConfig::default();
        assert_eq!(config.presence_interval_ms, 500);
        assert_eq!(config.status_interval_ms, 100);
        assert_eq!(config.sample_rate, 48000.0);
        assert_eq!(config.curve.points, 201);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets() {
        assert_eq!(ControllerConfig::responsive().status_interval(), Duration::from_millis(60));
        assert_eq!(ControllerConfig::relaxed().status_interval(), Duration::from_millis(250));
        assert!(ControllerConfig::responsive().validate().is_ok());
        assert!(ControllerConfig::relaxed().validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let zero = ControllerConfig {
            status_interval_ms: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let inverted = ControllerConfig {
            status_interval_ms: 1000,
            presence_interval_ms: 500,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        let bad_rate = ControllerConfig {
            sample_rate: 1000.0,
            ..Default::default()
        };
        assert!(bad_rate.validate().is_err());

        let bad_curve = ControllerConfig {
            curve: CurveSpec {
                min_hz: 20.0,
                max_hz: 20000.0,
                points: 1,
            },
            ..Default::default()
        };
        assert!(bad_curve.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ControllerConfig =
            serde_json::from_str(r#"{ "status_interval_ms": 60 }"#).unwrap();
        assert_eq!(config.status_interval_ms, 60);
        assert_eq!(config.presence_interval_ms, 500);
        assert_eq!(config.device, DeviceIdentity::PEQ_LINK);
    }

    #[test]
    fn test_from_json_file() {
        let path = std::env::temp_dir().join(format!("peqlink-config-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "device": { "vendor_id": 4660, "product_id": 22136 } }"#).unwrap();

        let config = ControllerConfig::from_json_file(&path).unwrap();
        assert_eq!(config.device, DeviceIdentity::new(0x1234, 0x5678));

        std::fs::write(&path, r#"{ "transfer_timeout_ms": 0 }"#).unwrap();
        assert!(matches!(
            ControllerConfig::from_json_file(&path),
            Err(ControllerError::Config(_))
        ));

        let _ = std::fs::remove_file(&path);
        assert!(ControllerConfig::from_json_file(&path).is_err());
    }
}
