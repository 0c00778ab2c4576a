//! Tag record codec.
//!
//! The tag answers with an NDEF message. The record of well-known type `H`
//! carries the health payload:
//!
//! | bytes | field       | encoding                           |
//! |-------|-------------|------------------------------------|
//! | 0-1   | temperature | i16 big-endian, 0.1 °C             |
//! | 2-3   | pH          | u16 big-endian, 0.01 pH            |
//! | 4-5   | glucose     | u16 big-endian, mg/dL              |
//!
//! Calibration is written back as a well-known record of type `C`:
//! pH point (u16, 0.01), glucose point (u16, mg/dL), temperature offset
//! (i16, 0.1 °C).

use crate::config::SessionConfig;
use crate::error::BridgeError;

/// NDEF TNF "well known".
pub const TNF_WELL_KNOWN: u8 = 0x01;

pub const HEALTH_RECORD_TYPE: &[u8] = b"H";
pub const CALIBRATION_RECORD_TYPE: &[u8] = b"C";

const HEALTH_PAYLOAD_LEN: usize = 6;

// NDEF header flags
const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

/// One record of an NDEF message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NdefRecord {
    pub tnf: u8,
    pub record_type: Vec<u8>,
    pub payload: Vec<u8>,
}

impl NdefRecord {
    pub fn well_known(record_type: &[u8], payload: Vec<u8>) -> Self {
        Self {
            tnf: TNF_WELL_KNOWN,
            record_type: record_type.to_vec(),
            payload,
        }
    }

    fn is(&self, record_type: &[u8]) -> bool {
        self.tnf == TNF_WELL_KNOWN && self.record_type == record_type
    }
}

/// Split an NDEF message into its records.
///
/// Chunked records are not produced by the tag and are rejected.
pub fn parse_message(data: &[u8]) -> Result<Vec<NdefRecord>, BridgeError> {
    let mut records = Vec::new();
    let mut cursor = Cursor { data, pos: 0 };

    while cursor.pos < data.len() {
        let header = cursor.u8()?;
        if header & FLAG_CF != 0 {
            return Err(BridgeError::MalformedPayload(
                "chunked records are not supported".to_string(),
            ));
        }
        let type_len = cursor.u8()? as usize;
        let payload_len = if header & FLAG_SR != 0 {
            cursor.u8()? as usize
        } else {
            u32::from_be_bytes(cursor.array()?) as usize
        };
        let id_len = if header & FLAG_IL != 0 {
            cursor.u8()? as usize
        } else {
            0
        };
        let record_type = cursor.take(type_len)?.to_vec();
        cursor.take(id_len)?;
        let payload = cursor.take(payload_len)?.to_vec();

        records.push(NdefRecord {
            tnf: header & TNF_MASK,
            record_type,
            payload,
        });

        if header & FLAG_ME != 0 {
            break;
        }
    }

    Ok(records)
}

/// Serialize records as an NDEF message, using short records where possible.
pub fn encode_message(records: &[NdefRecord]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, record) in records.iter().enumerate() {
        let mut header = record.tnf & TNF_MASK;
        if i == 0 {
            header |= FLAG_MB;
        }
        if i + 1 == records.len() {
            header |= FLAG_ME;
        }
        let short = record.payload.len() <= u8::MAX as usize;
        if short {
            header |= FLAG_SR;
        }

        out.push(header);
        out.push(record.record_type.len() as u8);
        if short {
            out.push(record.payload.len() as u8);
        } else {
            out.extend_from_slice(&(record.payload.len() as u32).to_be_bytes());
        }
        out.extend_from_slice(&record.record_type);
        out.extend_from_slice(&record.payload);
    }
    out
}

/// Raw health values decoded from the tag, before any offset is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPayload {
    pub temperature: f64,
    pub ph: f64,
    pub glucose: f64,
}

impl HealthPayload {
    pub fn decode(payload: &[u8]) -> Result<Self, BridgeError> {
        if payload.len() < HEALTH_PAYLOAD_LEN {
            return Err(BridgeError::MalformedPayload(format!(
                "health payload is {} bytes, expected {}",
                payload.len(),
                HEALTH_PAYLOAD_LEN
            )));
        }
        let temp_raw = i16::from_be_bytes([payload[0], payload[1]]);
        let ph_raw = u16::from_be_bytes([payload[2], payload[3]]);
        let glucose_raw = u16::from_be_bytes([payload[4], payload[5]]);

        Ok(Self {
            temperature: f64::from(temp_raw) / 10.0,
            ph: f64::from(ph_raw) / 100.0,
            glucose: f64::from(glucose_raw),
        })
    }

    pub fn encode(&self) -> [u8; HEALTH_PAYLOAD_LEN] {
        let mut out = [0u8; HEALTH_PAYLOAD_LEN];
        out[0..2].copy_from_slice(&scaled_i16(self.temperature, 10.0).to_be_bytes());
        out[2..4].copy_from_slice(&scaled_u16(self.ph, 100.0).to_be_bytes());
        out[4..6].copy_from_slice(&scaled_u16(self.glucose, 1.0).to_be_bytes());
        out
    }

    /// Locate and decode the health record of a message.
    ///
    /// `Ok(None)` when the message carries no health record (a foreign tag).
    pub fn from_message(message: &[u8]) -> Result<Option<Self>, BridgeError> {
        parse_message(message)?
            .iter()
            .find(|r| r.is(HEALTH_RECORD_TYPE))
            .map(|r| Self::decode(&r.payload))
            .transpose()
    }
}

/// Build the calibration record written to the tag.
pub fn calibration_record(config: &SessionConfig) -> NdefRecord {
    let mut payload = Vec::with_capacity(6);
    payload.extend_from_slice(&scaled_u16(config.ph_calibration_point, 100.0).to_be_bytes());
    payload.extend_from_slice(&scaled_u16(config.glucose_calibration_point, 1.0).to_be_bytes());
    payload.extend_from_slice(&scaled_i16(config.temperature_offset, 10.0).to_be_bytes());
    NdefRecord::well_known(CALIBRATION_RECORD_TYPE, payload)
}

fn scaled_u16(value: f64, scale: f64) -> u16 {
    (value * scale).round().clamp(0.0, f64::from(u16::MAX)) as u16
}

fn scaled_i16(value: f64, scale: f64) -> i16 {
    (value * scale)
        .round()
        .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], BridgeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                BridgeError::MalformedPayload(format!(
                    "record truncated at byte {} (wanted {} more)",
                    self.pos, len
                ))
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, BridgeError> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], BridgeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}
