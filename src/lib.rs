//! Sensor monitor library.
//!
//! Acquisition pipeline for biochemical NFC sensor tags: a [`session`] drives
//! a [`bridge`] to the tag, readings land in a bounded in-memory [`buffer`]
//! and a date-partitioned CSV [`store`], on the cadence set by
//! [`acquisition`].

pub mod acquisition;
pub mod bridge;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod error;
pub mod instance_lock;
pub mod reading;
pub mod session;
pub mod store;
