//! Partition record format.
//!
//! Plain comma-separated text with a header row naming the four fields.
//! Columns are located by header name, so files written by other tools with
//! a different column order still load. Timestamps are RFC 3339; naive
//! ISO-8601 timestamps (no offset) are read as UTC.

use crate::error::{MonitorError, Result};
use crate::reading::Reading;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use log::warn;

pub const FIELDS: [&str; 4] = ["timestamp", "temperature", "ph", "glucose"];

/// Header line, without terminator.
pub fn header() -> String {
    FIELDS.join(",")
}

/// Encode one reading as a record line, without terminator.
///
/// Numbers use the shortest text that parses back to the same `f64`.
pub fn encode_record(reading: &Reading) -> String {
    format!(
        "{},{},{},{}",
        reading
            .timestamp()
            .to_rfc3339_opts(SecondsFormat::AutoSi, true),
        reading.temperature(),
        reading.ph(),
        reading.glucose()
    )
}

/// Encode a complete document: header plus one line per reading.
pub fn encode_document(readings: &[Reading]) -> String {
    let mut out = header();
    out.push('\n');
    for reading in readings {
        out.push_str(&encode_record(reading));
        out.push('\n');
    }
    out
}

/// Parse a complete document. Blank lines are ignored.
///
/// A bad header fails the document. Rows that do not parse (a record torn by
/// an interrupted write, a hand edit) are logged and skipped so the rest of
/// the partition stays readable.
pub fn parse_document(text: &str) -> Result<Vec<Reading>> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    let Some((_, header_line)) = lines.next() else {
        return Ok(Vec::new());
    };
    let columns = Columns::from_header(header_line.trim_start_matches('\u{feff}'))?;

    let mut readings = Vec::new();
    for (line_no, line) in lines {
        match columns.decode(line, line_no) {
            Ok(reading) => readings.push(reading),
            Err(e) => warn!("[Store] Skipping record: {}", e),
        }
    }
    Ok(readings)
}

/// Parse a timestamp field.
pub fn parse_timestamp(text: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(text) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(rfc_err) => NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
            .map(|naive| naive.and_utc())
            .map_err(|_| rfc_err),
    }
}

struct Columns {
    width: usize,
    timestamp: usize,
    temperature: usize,
    ph: usize,
    glucose: usize,
}

impl Columns {
    fn from_header(line: &str) -> Result<Self> {
        let names: Vec<&str> = line.split(',').map(str::trim).collect();
        let position = |field: &str| {
            names
                .iter()
                .position(|name| *name == field)
                .ok_or_else(|| MonitorError::UnexpectedHeader(line.to_string()))
        };
        Ok(Self {
            width: names.len(),
            timestamp: position("timestamp")?,
            temperature: position("temperature")?,
            ph: position("ph")?,
            glucose: position("glucose")?,
        })
    }

    fn decode(&self, line: &str, line_no: usize) -> Result<Reading> {
        let malformed = |reason: String| MonitorError::MalformedRecord {
            line: line_no,
            reason,
        };

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != self.width {
            return Err(malformed(format!(
                "expected {} fields, found {}",
                self.width,
                fields.len()
            )));
        }

        let number = |idx: usize, name: &str| {
            fields[idx]
                .parse::<f64>()
                .map_err(|e| malformed(format!("{} {:?}: {}", name, fields[idx], e)))
        };

        let timestamp = parse_timestamp(fields[self.timestamp])
            .map_err(|e| malformed(format!("timestamp {:?}: {}", fields[self.timestamp], e)))?;

        Ok(Reading::new(
            timestamp,
            number(self.temperature, "temperature")?,
            number(self.ph, "ph")?,
            number(self.glucose, "glucose")?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_record_round_trip_is_exact() {
        let ts = Utc.with_ymd_and_hms(2024, 2, 29, 23, 59, 59).unwrap()
            + chrono::Duration::microseconds(123_456);
        let reading = Reading::new(ts, 36.5 + 0.1 / 3.0, 7.0, 100.0);

        let doc = encode_document(&[reading]);
        let parsed = parse_document(&doc).unwrap();
        assert_eq!(parsed, vec![reading]);
    }

    #[test]
    fn test_header_only_document_is_empty() {
        assert!(parse_document("timestamp,temperature,ph,glucose\n").unwrap().is_empty());
        assert!(parse_document("").unwrap().is_empty());
    }

    #[test]
    fn test_columns_found_by_name() {
        let doc = "glucose,timestamp,ph,temperature\r\n97,2024-01-01T10:00:00,7.1,36.9\r\n";
        let parsed = parse_document(doc).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].glucose(), 97.0);
        assert_eq!(parsed[0].temperature(), 36.9);
        assert_eq!(
            parsed[0].timestamp(),
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_naive_iso_timestamps_with_fraction() {
        let ts = parse_timestamp("2024-01-01T10:00:00.250000").unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_bad_header_rejected() {
        let err = parse_document("time,temp,ph,glucose\n").unwrap_err();
        assert!(matches!(err, MonitorError::UnexpectedHeader(_)));
    }

    #[test]
    fn test_bad_row_reports_line() {
        let columns = Columns::from_header("timestamp,temperature,ph,glucose").unwrap();
        match columns.decode("2024-01-01T10:00:00Z,abc,7.0,100", 3) {
            Err(MonitorError::MalformedRecord { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_bad_rows_are_skipped() {
        let doc = "timestamp,temperature,ph,glucose\n\
                   2024-01-01T10:00:00Z,36.5,7.0,100\n\
                   2024-01-01T10:00:01Z,36.\n\
                   2024-01-01T10:00:02Z,abc,7.0,100\n\
                   2024-01-01T10:00:03Z,37,7.1,101\n";
        let temps: Vec<f64> = parse_document(doc)
            .unwrap()
            .iter()
            .map(|r| r.temperature())
            .collect();
        assert_eq!(temps, vec![36.5, 37.0]);
    }

    #[test]
    fn test_short_row_rejected() {
        let columns = Columns::from_header("timestamp,temperature,ph,glucose").unwrap();
        assert!(columns.decode("2024-01-01T10:00:00Z,36.5,7.0", 2).is_err());
    }
}
