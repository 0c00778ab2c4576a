//! Sensor reading value type.
//!
//! A reading is one sample from the biochemical tag: body temperature,
//! pH and glucose, stamped with the moment it was acquired.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single temperature / pH / glucose sample.
///
/// Readings are immutable once built. They carry no identity beyond their
/// timestamp and duplicate timestamps are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    timestamp: DateTime<Utc>,
    temperature: f64,
    ph: f64,
    glucose: f64,
}

impl Reading {
    /// Create a reading.
    ///
    /// # Arguments
    /// * `timestamp` - Acquisition time
    /// * `temperature` - Degrees Celsius
    /// * `ph` - pH value, nominally 0-14
    /// * `glucose` - mg/dL
    pub fn new(timestamp: DateTime<Utc>, temperature: f64, ph: f64, glucose: f64) -> Self {
        Self {
            timestamp,
            temperature,
            ph,
            glucose,
        }
    }

    /// Create a reading stamped with the current time.
    pub fn now(temperature: f64, ph: f64, glucose: f64) -> Self {
        Self::new(Utc::now(), temperature, ph, glucose)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn ph(&self) -> f64 {
        self.ph
    }

    pub fn glucose(&self) -> f64 {
        self.glucose
    }

    /// Field-wise comparison with a tolerance on the numeric values.
    pub fn approx_eq(&self, other: &Reading, tolerance: f64) -> bool {
        self.timestamp == other.timestamp
            && (self.temperature - other.temperature).abs() <= tolerance
            && (self.ph - other.ph).abs() <= tolerance
            && (self.glucose - other.glucose).abs() <= tolerance
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - Temp: {:.1}°C, pH: {:.2}, Glucose: {:.0} mg/dL",
            self.timestamp.to_rfc3339(),
            self.temperature,
            self.ph,
            self.glucose
        )
    }
}

/// Where a reading handed out by the session came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReadingSource {
    /// Produced by the active bridge (hardware or mock).
    Bridge,
    /// Placeholder generated because no link could be established.
    Synthetic,
}
