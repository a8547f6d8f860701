//! Data types shared by every stage of the monitoring pipeline.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resolution::Bucket;

/// How a reading reached the datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    /// Relayed by the buoy over its LoRa link.
    Lora,
    /// Entered by hand.
    Manual,
}

impl SourceTag {
    /// Parses a wire value, returning `None` for anything unrecognised.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "lora" => Some(SourceTag::Lora),
            "manual" => Some(SourceTag::Manual),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Lora => "lora",
            SourceTag::Manual => "manual",
        }
    }
}

/// One timestamped temperature sample from the buoy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    /// Sea-water temperature in °C.
    pub temperature: f64,
    /// Received signal strength in dBm.
    #[serde(rename = "rssi", default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<i32>,
    #[serde(rename = "source", default, skip_serializing_if = "Option::is_none")]
    pub source_tag: Option<SourceTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Reading {
    /// A reading carrying only the required fields.
    pub fn new(timestamp: DateTime<Utc>, temperature: f64) -> Self {
        Self {
            timestamp,
            temperature,
            signal_strength: None,
            source_tag: None,
            location: None,
        }
    }

    pub fn with_signal_strength(mut self, dbm: i32) -> Self {
        self.signal_strength = Some(dbm);
        self
    }

    pub fn with_source(mut self, tag: SourceTag) -> Self {
        self.source_tag = Some(tag);
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }
}

/// A loaded window of readings at a given resolution, ascending by timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub bucket: Bucket,
    pub readings: Vec<Reading>,
    /// Set when the source returned exactly its row cap.
    pub possibly_truncated: bool,
}

impl Series {
    pub fn empty(bucket: Bucket) -> Self {
        Self {
            bucket,
            readings: Vec::new(),
            possibly_truncated: false,
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

/// Parses a datastore timestamp.
///
/// Accepts RFC 3339 (`2025-07-01T12:00:00+00:00`, `...Z`) as well as the
/// timezone-less forms Postgres emits for `timestamp` columns
/// (`2025-07-01T12:00:00`, `2025-07-01 12:00:00.123`), which are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    // Postgres `timestamptz` text output: "2025-07-01 12:00:00+00"
    if let Ok(ts) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(ts.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}
