//! Bounded in-memory working set of recent readings.
//!
//! The buffer is the live view for dashboards and statistics. It carries no
//! persistence obligation; the durable store keeps the full history.

use crate::reading::Reading;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default number of readings kept in memory.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Thread-safe, capacity-bounded FIFO of readings.
///
/// Once full, each [`add`](Self::add) evicts the oldest entry. Queries may run
/// from any thread while the acquisition task is adding.
///
/// # Example
/// ```
/// use sensor_monitor::buffer::ReadingBuffer;
/// use sensor_monitor::reading::Reading;
///
/// let buffer = ReadingBuffer::with_capacity(2);
/// buffer.add(Reading::now(36.0, 7.0, 100.0));
/// buffer.add(Reading::now(37.0, 7.0, 100.0));
/// buffer.add(Reading::now(38.0, 7.0, 100.0));
///
/// assert_eq!(buffer.len(), 2);
/// assert_eq!(buffer.all()[0].temperature(), 37.0);
/// ```
pub struct ReadingBuffer {
    capacity: usize,
    readings: RwLock<VecDeque<Reading>>,
}

impl ReadingBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a buffer holding at most `capacity` readings (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            readings: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.readings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.read().is_empty()
    }

    /// Append a reading, evicting from the front beyond capacity.
    pub fn add(&self, reading: Reading) {
        let mut readings = self.readings.write();
        readings.push_back(reading);
        while readings.len() > self.capacity {
            readings.pop_front();
        }
    }

    /// Snapshot of every buffered reading, oldest first.
    pub fn all(&self) -> Vec<Reading> {
        self.readings.read().iter().copied().collect()
    }

    /// The last `n` readings, oldest first. Fewer if the buffer holds fewer.
    pub fn recent(&self, n: usize) -> Vec<Reading> {
        let readings = self.readings.read();
        let skip = readings.len().saturating_sub(n);
        readings.iter().skip(skip).copied().collect()
    }

    /// Readings stamped at or after `since`, in buffer order.
    pub fn since(&self, since: DateTime<Utc>) -> Vec<Reading> {
        self.readings
            .read()
            .iter()
            .filter(|r| r.timestamp() >= since)
            .copied()
            .collect()
    }

    pub fn latest(&self) -> Option<Reading> {
        self.readings.read().back().copied()
    }

    pub fn clear(&self) {
        self.readings.write().clear();
    }

    /// Min/max/mean per field over the readings currently buffered.
    ///
    /// `None` when the buffer is empty.
    pub fn statistics(&self) -> Option<ReadingStatistics> {
        let readings = self.readings.read();
        let first = readings.front()?;

        let mut temperature = Accumulator::new(first.temperature());
        let mut ph = Accumulator::new(first.ph());
        let mut glucose = Accumulator::new(first.glucose());
        for r in readings.iter().skip(1) {
            temperature.push(r.temperature());
            ph.push(r.ph());
            glucose.push(r.glucose());
        }

        Some(ReadingStatistics {
            count: readings.len(),
            temperature: temperature.finish(),
            ph: ph.finish(),
            glucose: glucose.finish(),
        })
    }
}

impl Default for ReadingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregates over the buffered readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadingStatistics {
    pub count: usize,
    pub temperature: FieldStatistics,
    pub ph: FieldStatistics,
    pub glucose: FieldStatistics,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldStatistics {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

struct Accumulator {
    min: f64,
    max: f64,
    sum: f64,
    count: usize,
}

impl Accumulator {
    fn new(first: f64) -> Self {
        Self {
            min: first,
            max: first,
            sum: first,
            count: 1,
        }
    }

    fn push(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }

    fn finish(self) -> FieldStatistics {
        FieldStatistics {
            min: self.min,
            max: self.max,
            avg: self.sum / self.count as f64,
        }
    }
}
