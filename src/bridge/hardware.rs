//! Hardware bridge over the native NFC link driver.

use super::payload::{self, HealthPayload, NdefRecord};
use super::{BridgeKind, Deadline, FIRMWARE_UNAVAILABLE, SensorBridge};
use crate::config::SessionConfig;
use crate::error::BridgeError;
use crate::reading::Reading;
use log::{debug, info, warn};
use std::time::Duration;

/// The native radio stack, treated as an opaque capability.
///
/// Implementations wrap whatever the platform offers (JNI, libnfc, a serial
/// reader). `timeout` is `None` for unbounded calls.
pub trait LinkDriver: Send {
    /// Bring up the reader with the given settings.
    fn open(&mut self, config: &SessionConfig) -> Result<(), BridgeError>;

    fn close(&mut self) -> Result<(), BridgeError>;

    /// The NDEF message of the tag currently in the field, if any.
    fn poll_message(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>, BridgeError>;

    /// Write a record to the tag currently in the field.
    fn write_record(
        &mut self,
        record: &NdefRecord,
        timeout: Option<Duration>,
    ) -> Result<(), BridgeError>;

    /// Run the tag's calibration routine. `Ok(false)` when the tag refused.
    fn run_calibration(&mut self, timeout: Option<Duration>) -> Result<bool, BridgeError>;

    /// Check that reader and tag answer.
    fn probe(&mut self, timeout: Option<Duration>) -> Result<bool, BridgeError>;

    /// Reader firmware version, `None` when no reader hardware exists.
    fn firmware_version(&self) -> Option<String>;

    /// Apply updated reader settings to an open link.
    fn configure(&mut self, config: &SessionConfig) -> Result<(), BridgeError>;
}

/// [`SensorBridge`] backed by a real reader.
///
/// Decodes the tag's health record into a [`Reading`] and applies the
/// configured temperature offset.
pub struct HardwareBridge<D: LinkDriver> {
    driver: D,
    connected: bool,
    config: SessionConfig,
}

impl<D: LinkDriver> HardwareBridge<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            connected: false,
            config: SessionConfig::default(),
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl<D: LinkDriver> SensorBridge for HardwareBridge<D> {
    fn kind(&self) -> BridgeKind {
        BridgeKind::Hardware
    }

    fn connect(&mut self, config: &SessionConfig, deadline: Deadline) -> bool {
        if deadline.is_expired() {
            warn!("[NFC] Connect skipped: deadline already passed");
            return false;
        }
        self.config = config.clone();
        if self.connected {
            debug!("[NFC] Reader link already open");
            return true;
        }
        match self.driver.open(config) {
            Ok(()) => {
                self.connected = true;
                info!("[NFC] Reader link established");
                true
            }
            Err(e) => {
                warn!("[NFC] Failed to open reader link: {}", e);
                self.connected = false;
                false
            }
        }
    }

    fn disconnect(&mut self) -> bool {
        if !self.connected {
            return true;
        }
        self.connected = false;
        match self.driver.close() {
            Ok(()) => {
                info!("[NFC] Reader link closed");
                true
            }
            Err(e) => {
                warn!("[NFC] Error closing reader link: {}", e);
                false
            }
        }
    }

    fn read_once(&mut self, deadline: Deadline) -> Result<Option<Reading>, BridgeError> {
        if !self.connected {
            return Err(BridgeError::NotConnected);
        }
        if deadline.is_expired() {
            return Err(BridgeError::Timeout(self.config.link_timeout_ms));
        }

        let message = match self.driver.poll_message(deadline.remaining())? {
            Some(message) => message,
            None => {
                debug!("[NFC] No tag in field");
                return Ok(None);
            }
        };

        let Some(health) = HealthPayload::from_message(&message)? else {
            debug!("[NFC] Tag in field carries no health record");
            return Ok(None);
        };

        Ok(Some(Reading::now(
            health.temperature + self.config.temperature_offset,
            health.ph,
            health.glucose,
        )))
    }

    fn calibrate(&mut self, config: &SessionConfig, deadline: Deadline) -> bool {
        if !self.connected {
            return false;
        }
        self.config = config.clone();

        let record = payload::calibration_record(config);
        if let Err(e) = self.driver.write_record(&record, deadline.remaining()) {
            warn!("[NFC] Failed to write calibration record: {}", e);
            return false;
        }
        match self.driver.run_calibration(deadline.remaining()) {
            Ok(accepted) => {
                if accepted {
                    info!("[NFC] Calibration complete");
                } else {
                    warn!("[NFC] Tag rejected calibration");
                }
                accepted
            }
            Err(e) => {
                warn!("[NFC] Calibration exchange failed: {}", e);
                false
            }
        }
    }

    fn test_connectivity(&mut self, deadline: Deadline) -> bool {
        if !self.connected {
            return false;
        }
        match self.driver.probe(deadline.remaining()) {
            Ok(ok) => ok,
            Err(e) => {
                warn!("[NFC] Connectivity probe failed: {}", e);
                false
            }
        }
    }

    fn firmware_status(&self) -> String {
        match self.driver.firmware_version() {
            None => FIRMWARE_UNAVAILABLE.to_string(),
            Some(_) if !self.connected => "NFC Not Connected".to_string(),
            Some(version) => version,
        }
    }

    fn push_config(&mut self, config: &SessionConfig) -> bool {
        self.config = config.clone();
        if !self.connected {
            return true;
        }
        match self.driver.configure(config) {
            Ok(()) => true,
            Err(e) => {
                warn!("[NFC] Failed to push configuration: {}", e);
                false
            }
        }
    }
}
