//! The replicated record and the validation applied before it reaches the log.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// Field name of the numeric measurement in both remote payloads and log lines.
pub const SENSOR_FIELD: &str = "sensor1";

/// Field name of the timestamp in both remote payloads and log lines.
pub const TIMESTAMP_FIELD: &str = "fechaa";

/// A single measurement mirrored from the remote feed.
///
/// The serialized field names are the on-disk contract of the log file and
/// must not change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Remote key. Globally unique.
    pub id: String,
    #[serde(rename = "sensor1", deserialize_with = "deserialize_measurement")]
    pub sensor_value: f64,
    #[serde(rename = "fechaa")]
    pub timestamp: String,
}

impl Record {
    pub fn new(id: impl Into<String>, sensor_value: f64, timestamp: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sensor_value,
            timestamp: timestamp.into(),
        }
    }

    /// Builds a record from a remote `(key, value)` pair.
    ///
    /// Returns `None` when the value is not an object, when the measurement
    /// is missing or not numeric, or when the timestamp is missing or empty.
    /// Numeric strings are accepted for the measurement since some devices
    /// publish them quoted.
    pub fn from_remote(key: &str, value: &JsonValue) -> Option<Self> {
        let fields = value.as_object()?;

        let sensor_value = coerce_measurement(fields.get(SENSOR_FIELD)?)?;

        let timestamp = fields.get(TIMESTAMP_FIELD)?.as_str()?;
        if timestamp.trim().is_empty() {
            return None;
        }

        Some(Self::new(key, sensor_value, timestamp))
    }

    /// Parses one log line. Blank or malformed lines yield `None`.
    ///
    /// Quoted measurements are accepted, as in [`Record::from_remote`].
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let record = serde_json::from_str::<Self>(line).ok()?;
        record.is_valid().then_some(record)
    }

    /// A record is storable when it has a key, a finite value and a timestamp.
    pub fn is_valid(&self) -> bool {
        !self.id.is_empty() && self.sensor_value.is_finite() && !self.timestamp.trim().is_empty()
    }

    pub fn parsed_timestamp(&self) -> Option<NaiveDateTime> {
        parse_timestamp(&self.timestamp)
    }

    /// Calendar date of the record as written in its timestamp.
    pub fn calendar_date(&self) -> Option<NaiveDate> {
        self.parsed_timestamp().map(|ts| ts.date())
    }
}

/// A finite measurement from a JSON number or numeric string.
fn coerce_measurement(value: &JsonValue) -> Option<f64> {
    let parsed = match value {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    parsed.is_finite().then_some(parsed)
}

fn deserialize_measurement<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    coerce_measurement(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("{SENSOR_FIELD} is not a finite number: {value}")))
}

/// Parses the timestamp formats devices publish into a naive local date-time.
///
/// Offsets are kept as written (no conversion to UTC), so the calendar date of
/// `2024-03-05T23:30:00-05:00` is March 5th. The result is the local wall
/// clock time, so ordering by it is not chronological across different
/// offsets. Every accepted format starts with
/// a zero-padded `YYYY-MM-DD`, which lets callers prefilter raw lines by the
/// date substring without changing results.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if !has_padded_date_prefix(raw) {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_local());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(ts);
        }
    }

    if raw.len() == 10 {
        return NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0));
    }

    None
}

fn has_padded_date_prefix(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    bytes.len() >= 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes[..10]
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit())
}
