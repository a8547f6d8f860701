//! CSV and JSON export of a loaded window.
//!
//! Both formats carry `timestamp`, `temperature` and whichever of `rssi`,
//! `source` and `location` the readings have. Timestamps are RFC 3339 UTC.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::debug;

use crate::models::Reading;

const FILE_PREFIX: &str = "stromness_water_temp";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Json => "application/json",
        }
    }

    /// Encodes `readings` in this format.
    pub fn encode(&self, readings: &[Reading]) -> Result<Vec<u8>> {
        match self {
            ExportFormat::Csv => to_csv(readings),
            ExportFormat::Json => to_json(readings),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => anyhow::bail!("unsupported export format '{other}'"),
        }
    }
}

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Writes readings as CSV with a header row.
///
/// Optional columns appear only when at least one reading has the field;
/// readings without it get an empty cell.
pub fn to_csv(readings: &[Reading]) -> Result<Vec<u8>> {
    let with_rssi = readings.iter().any(|r| r.signal_strength.is_some());
    let with_source = readings.iter().any(|r| r.source_tag.is_some());
    let with_location = readings.iter().any(|r| r.location.is_some());

    let mut header = vec!["timestamp", "temperature"];
    if with_rssi {
        header.push("rssi");
    }
    if with_source {
        header.push("source");
    }
    if with_location {
        header.push("location");
    }

    let mut writer = WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.write_record(&header)?;

    for r in readings {
        let mut row = vec![format_timestamp(&r.timestamp), r.temperature.to_string()];
        if with_rssi {
            row.push(r.signal_strength.map(|v| v.to_string()).unwrap_or_default());
        }
        if with_source {
            row.push(r.source_tag.map(|t| t.as_str().to_string()).unwrap_or_default());
        }
        if with_location {
            row.push(r.location.clone().unwrap_or_default());
        }
        writer.write_record(&row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV export: {}", e))?;
    debug!(rows = readings.len(), bytes = bytes.len(), "CSV export written");
    Ok(bytes)
}

/// Writes readings as a JSON array, one object per reading.
pub fn to_json(readings: &[Reading]) -> Result<Vec<u8>> {
    let bytes = serde_json::to_vec(readings)?;
    debug!(rows = readings.len(), bytes = bytes.len(), "JSON export written");
    Ok(bytes)
}

/// Parses a CSV export back into readings.
pub fn from_csv(bytes: &[u8]) -> Result<Vec<Reading>> {
    let mut rdr = csv::Reader::from_reader(bytes);
    let mut rows = Vec::new();

    for (i, result) in rdr.deserialize().enumerate() {
        let record: Reading = result.with_context(|| format!("invalid CSV row {}", i + 1))?;
        rows.push(record);
    }

    Ok(rows)
}

/// Parses a JSON export back into readings.
pub fn from_json(bytes: &[u8]) -> Result<Vec<Reading>> {
    serde_json::from_slice(bytes).context("invalid JSON export")
}

/// Gzip-compresses an export payload.
pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Download file name, e.g. `stromness_water_temp_last_24_hours.csv`.
pub fn file_name(label: &str, format: ExportFormat, gzip: bool) -> String {
    let label = label.trim().to_lowercase().replace(' ', "_");
    let suffix = if gzip { ".gz" } else { "" };
    format!("{}_{}.{}{}", FILE_PREFIX, label, format.extension(), suffix)
}

/// Label for a custom date range, e.g. `2025-07-01_to_2025-07-08`.
pub fn range_label(start: &DateTime<Utc>, end: &DateTime<Utc>) -> String {
    format!("{}_to_{}", start.format("%Y-%m-%d"), end.format("%Y-%m-%d"))
}
