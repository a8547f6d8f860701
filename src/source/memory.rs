use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{DataSource, SourceError};
use crate::export::{ExportFormat, from_csv, from_json};
use crate::models::Reading;

/// Serves a fixed set of readings, behaving like a table queried in
/// ascending order with an optional row limit.
#[derive(Debug, Default)]
pub struct MemorySource {
    readings: Vec<Reading>,
    row_cap: Option<usize>,
    error: Option<SourceError>,
    aggregation_error: Option<SourceError>,
    range_calls: AtomicUsize,
    latest_calls: AtomicUsize,
}

impl MemorySource {
    pub fn new(readings: Vec<Reading>) -> Self {
        Self {
            readings,
            ..Default::default()
        }
    }

    /// Loads readings from a CSV or JSON export, picking the format by extension.
    pub fn from_export_file(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.parse::<ExportFormat>()?,
            None => anyhow::bail!("{} has no file extension", path.display()),
        };
        let readings = match format {
            ExportFormat::Csv => from_csv(&bytes)?,
            ExportFormat::Json => from_json(&bytes)?,
        };
        Ok(Self::new(readings))
    }

    pub fn with_row_cap(mut self, cap: usize) -> Self {
        self.row_cap = Some(cap);
        self
    }

    /// Every query fails with `error`.
    pub fn with_error(mut self, error: SourceError) -> Self {
        self.error = Some(error);
        self
    }

    /// Advertises a server-side aggregation path that fails with `error`.
    pub fn with_aggregation_error(mut self, error: SourceError) -> Self {
        self.aggregation_error = Some(error);
        self
    }

    pub fn range_calls(&self) -> usize {
        self.range_calls.load(Ordering::SeqCst)
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), SourceError> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DataSource for MemorySource {
    async fn fetch_range(
        &self,
        lower: DateTime<Utc>,
        upper: DateTime<Utc>,
    ) -> Result<Vec<Reading>, SourceError> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;

        let mut rows: Vec<Reading> = self
            .readings
            .iter()
            .filter(|r| r.timestamp >= lower && r.timestamp <= upper)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        if let Some(cap) = self.row_cap {
            rows.truncate(cap);
        }
        Ok(rows)
    }

    async fn fetch_latest(&self) -> Result<Option<Reading>, SourceError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.readings.iter().max_by_key(|r| r.timestamp).cloned())
    }

    async fn fetch_aggregated(
        &self,
        _lower: DateTime<Utc>,
        _upper: DateTime<Utc>,
        _bucket: crate::resolution::Bucket,
    ) -> Result<Option<Vec<Reading>>, SourceError> {
        self.check()?;
        match &self.aggregation_error {
            Some(e) => Err(e.clone()),
            None => Ok(None),
        }
    }

    fn row_cap(&self) -> Option<usize> {
        self.row_cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::to_csv;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_latest_is_max_timestamp() {
        let source = MemorySource::new(vec![
            Reading::new(t0() + Duration::minutes(10), 11.0),
            Reading::new(t0(), 10.0),
        ]);

        let latest = source.fetch_latest().await.unwrap().unwrap();

        assert_eq!(latest.temperature, 11.0);
        assert_eq!(source.latest_calls(), 1);
    }

    #[tokio::test]
    async fn test_from_export_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");
        std::fs::write(&path, to_csv(&[Reading::new(t0(), 9.5)]).unwrap()).unwrap();

        let source = MemorySource::from_export_file(&path).unwrap();
        let rows = source.fetch_range(t0(), t0()).await.unwrap();

        assert_eq!(rows, vec![Reading::new(t0(), 9.5)]);
    }
}
