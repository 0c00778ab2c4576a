//! Sensor bridges.
//!
//! A bridge is the capability boundary between the session and whatever
//! actually talks to the tag. Two implementations exist:
//!
//! - [`HardwareBridge`]: wraps an opaque [`LinkDriver`] (the native NFC stack)
//!   and decodes the tag's health records
//! - [`MockBridge`]: seedable synthetic readings for running without hardware
//!
//! Bridge calls may block. Each blocking call receives a [`Deadline`] built
//! from `link_timeout_ms`; honouring it is the bridge's responsibility.

pub mod hardware;
pub mod mock;
pub mod payload;

pub use hardware::{HardwareBridge, LinkDriver};
pub use mock::{MockBridge, SyntheticSource};

use crate::config::SessionConfig;
use crate::error::BridgeError;
use crate::reading::Reading;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Firmware string reported when no device backs the session.
pub const FIRMWARE_UNAVAILABLE: &str = "unavailable";

/// Which kind of bridge is driving the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BridgeKind {
    Hardware,
    Mock,
}

/// Upper bound for a single blocking bridge call.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Some(Instant::now() + budget),
        }
    }

    /// No upper bound.
    pub fn unbounded() -> Self {
        Self { at: None }
    }

    /// Deadline from `link_timeout_ms`. Zero means unbounded.
    pub fn from_config(config: &SessionConfig) -> Self {
        match config.link_timeout_ms {
            0 => Self::unbounded(),
            ms => Self::after(Duration::from_millis(ms)),
        }
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }
}

/// Capability interface over the sensor-tag link.
///
/// Implementations never panic on I/O faults: `connect`, `calibrate` and
/// friends degrade to `false`. `read_once` separates "no tag in range"
/// (`Ok(None)`) from a failed exchange (`Err`).
pub trait SensorBridge: Send {
    fn kind(&self) -> BridgeKind;

    /// Establish the link. Returns `false` on any failure.
    fn connect(&mut self, config: &SessionConfig, deadline: Deadline) -> bool;

    /// Tear the link down. Idempotent; `false` only if the teardown faulted.
    fn disconnect(&mut self) -> bool;

    /// Read one reading from the tag currently in the field, if any.
    fn read_once(&mut self, deadline: Deadline) -> Result<Option<Reading>, BridgeError>;

    /// Run a calibration exchange. Requires a connected bridge.
    fn calibrate(&mut self, config: &SessionConfig, deadline: Deadline) -> bool;

    fn test_connectivity(&mut self, deadline: Deadline) -> bool;

    /// Free-form firmware/status string.
    fn firmware_status(&self) -> String;

    /// Push updated configuration to the device.
    fn push_config(&mut self, config: &SessionConfig) -> bool;
}
