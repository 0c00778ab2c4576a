//! Synthetic bridge for running the pipeline without a tag reader.

use super::{BridgeKind, Deadline, SensorBridge};
use crate::config::SessionConfig;
use crate::error::BridgeError;
use crate::reading::Reading;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generator for plausible placeholder readings.
///
/// temperature = 36.5 ± 1.0 °C, pH = 7.0 ± 0.5, glucose = 100 ± 20 mg/dL in
/// whole steps.
pub struct SyntheticSource {
    rng: StdRng,
}

impl SyntheticSource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn next_reading(&mut self) -> Reading {
        let temperature = 36.5 + self.rng.gen_range(-1.0..=1.0);
        let ph = 7.0 + self.rng.gen_range(-0.5..=0.5);
        let glucose = f64::from(100 + self.rng.gen_range(-20i32..=20));
        Reading::now(temperature, ph, glucose)
    }
}

impl Default for SyntheticSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Bridge that fabricates readings instead of talking to a reader.
///
/// It always connects and always has a "tag" in the field. The session
/// reports [`BridgeKind::Mock`] while it is active, so its readings are never
/// mistaken for hardware data.
pub struct MockBridge {
    source: SyntheticSource,
    connected: bool,
    config: SessionConfig,
    calibrations: u32,
}

impl MockBridge {
    pub fn new() -> Self {
        Self::from_source(SyntheticSource::new())
    }

    /// Deterministic mock: the same seed yields the same value sequence.
    pub fn with_seed(seed: u64) -> Self {
        Self::from_source(SyntheticSource::with_seed(seed))
    }

    fn from_source(source: SyntheticSource) -> Self {
        Self {
            source,
            connected: false,
            config: SessionConfig::default(),
            calibrations: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Number of successful calibration exchanges.
    pub fn calibrations(&self) -> u32 {
        self.calibrations
    }

    /// Last configuration pushed or connected with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl Default for MockBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorBridge for MockBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::Mock
    }

    fn connect(&mut self, config: &SessionConfig, _deadline: Deadline) -> bool {
        self.config = config.clone();
        self.connected = true;
        debug!("[Mock] Link up");
        true
    }

    fn disconnect(&mut self) -> bool {
        self.connected = false;
        true
    }

    fn read_once(&mut self, _deadline: Deadline) -> Result<Option<Reading>, BridgeError> {
        if !self.connected {
            return Err(BridgeError::NotConnected);
        }
        Ok(Some(self.source.next_reading()))
    }

    fn calibrate(&mut self, config: &SessionConfig, _deadline: Deadline) -> bool {
        if !self.connected {
            return false;
        }
        self.config = config.clone();
        self.calibrations += 1;
        true
    }

    fn test_connectivity(&mut self, _deadline: Deadline) -> bool {
        self.connected
    }

    fn firmware_status(&self) -> String {
        if self.connected {
            "mock-bridge 1.0 (synthetic data)".to_string()
        } else {
            "mock-bridge (not connected)".to_string()
        }
    }

    fn push_config(&mut self, config: &SessionConfig) -> bool {
        self.config = config.clone();
        true
    }
}
