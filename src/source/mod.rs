//! Access to the datastore holding the buoy's readings.
//!
//! [`DataSource`] is the query interface the rest of the crate consumes.
//! [`RestSource`] talks to the hosted PostgREST endpoint, [`SimulatedSource`]
//! generates demo data and [`MemorySource`] serves a fixed set of readings.
//! [`load_series`] turns a window and a resolution plan into an ascending,
//! bucketed [`Series`].

mod memory;
mod rest;
mod simulated;

pub use memory::MemorySource;
pub use rest::{RestSource, RestSourceConfig};
pub use simulated::SimulatedSource;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::models::{Reading, Series};
use crate::resolution::{Bucket, FetchStrategy, ResolutionPlan, bucketize};
use crate::window::Window;

/// Failures reported by a data source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The backend could not be reached or failed on its side.
    #[error("data source unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected the request or returned something unreadable.
    #[error("data source rejected query: {0}")]
    Query(String),
}

/// Range and latest-row queries over the readings table.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Readings with `lower <= timestamp <= upper`.
    async fn fetch_range(
        &self,
        lower: DateTime<Utc>,
        upper: DateTime<Utc>,
    ) -> Result<Vec<Reading>, SourceError>;

    /// The most recent reading, if any.
    async fn fetch_latest(&self) -> Result<Option<Reading>, SourceError>;

    /// Server-side aggregation. `Ok(None)` means the source has no such path.
    async fn fetch_aggregated(
        &self,
        _lower: DateTime<Utc>,
        _upper: DateTime<Utc>,
        _bucket: Bucket,
    ) -> Result<Option<Vec<Reading>>, SourceError> {
        Ok(None)
    }

    /// Maximum rows a single range or aggregation query returns.
    fn row_cap(&self) -> Option<usize> {
        None
    }
}

/// True when a query came back with exactly `cap` rows.
pub fn is_possibly_truncated(rows: usize, cap: Option<usize>) -> bool {
    cap.is_some_and(|cap| cap > 0 && rows == cap)
}

/// Fetches `window` according to `plan` and returns an ascending, bucketed series.
///
/// A rejected aggregation call falls back to a direct range query; an
/// unreachable backend is returned as an error. Either path is flagged as
/// possibly truncated when it returns exactly the source's row cap.
#[tracing::instrument(
    skip(source),
    fields(start = %window.start(), end = %window.upper, bucket = %plan.bucket)
)]
pub async fn load_series<S: DataSource + ?Sized>(
    source: &S,
    window: &Window,
    plan: ResolutionPlan,
) -> Result<Series, SourceError> {
    let (lower, upper) = (window.start(), window.upper);

    let aggregated = match plan.strategy {
        FetchStrategy::Direct => None,
        FetchStrategy::ServerAggregated => {
            match source.fetch_aggregated(lower, upper, plan.bucket).await {
                Ok(rows) => rows,
                Err(SourceError::Query(msg)) => {
                    error!(error = %msg, "Aggregation query rejected");
                    warn!(cap = ?source.row_cap(), "Falling back to direct range query");
                    None
                }
                Err(e) => return Err(e),
            }
        }
    };

    let mut rows = match aggregated {
        Some(rows) => rows,
        None => source.fetch_range(lower, upper).await?,
    };

    let possibly_truncated = is_possibly_truncated(rows.len(), source.row_cap());
    if possibly_truncated {
        warn!(rows = rows.len(), "Row cap reached, data may be incomplete");
    }

    rows.retain(|r| window.contains(r.timestamp));
    rows.sort_by_key(|r| r.timestamp);
    let readings = bucketize(&rows, plan.bucket);
    debug!(fetched = rows.len(), points = readings.len(), "Series loaded");

    Ok(Series {
        bucket: plan.bucket,
        readings,
        possibly_truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::FetchStrategy;
    use crate::window::WindowSelection;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap()
    }

    fn window() -> Window {
        let project_start = Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap();
        Window::sliding(WindowSelection::Last24Hours, now(), project_start)
    }

    fn direct(bucket: Bucket) -> ResolutionPlan {
        ResolutionPlan {
            bucket,
            strategy: FetchStrategy::Direct,
        }
    }

    fn descending(n: i64) -> Vec<Reading> {
        (0..n)
            .map(|i| Reading::new(now() - Duration::minutes(5 * i), 10.0 + i as f64))
            .collect()
    }

    #[test]
    fn test_truncation_only_at_cap() {
        assert!(is_possibly_truncated(1000, Some(1000)));
        assert!(!is_possibly_truncated(999, Some(1000)));
        assert!(!is_possibly_truncated(1000, None));
        assert!(!is_possibly_truncated(0, Some(0)));
    }

    /// Returns its rows exactly as given, newest first, from every query.
    struct NewestFirst {
        rows: Vec<Reading>,
        cap: Option<usize>,
        aggregates: bool,
    }

    #[async_trait]
    impl DataSource for NewestFirst {
        async fn fetch_range(
            &self,
            _lower: DateTime<Utc>,
            _upper: DateTime<Utc>,
        ) -> Result<Vec<Reading>, SourceError> {
            Ok(self.rows.clone())
        }

        async fn fetch_latest(&self) -> Result<Option<Reading>, SourceError> {
            Ok(self.rows.first().cloned())
        }

        async fn fetch_aggregated(
            &self,
            _lower: DateTime<Utc>,
            _upper: DateTime<Utc>,
            _bucket: Bucket,
        ) -> Result<Option<Vec<Reading>>, SourceError> {
            Ok(self.aggregates.then(|| self.rows.clone()))
        }

        fn row_cap(&self) -> Option<usize> {
            self.cap
        }
    }

    fn ascending(series: &Series) -> bool {
        series.readings.windows(2).all(|w| w[0].timestamp <= w[1].timestamp)
    }

    #[tokio::test]
    async fn test_descending_rows_are_sorted() {
        let source = NewestFirst {
            rows: descending(10),
            cap: None,
            aggregates: false,
        };
        assert!(source.rows[0].timestamp > source.rows[9].timestamp);

        let series = load_series(&source, &window(), direct(Bucket::Raw)).await.unwrap();

        assert_eq!(series.len(), 10);
        assert!(ascending(&series));
        assert_eq!(series.readings[0].timestamp, now() - Duration::minutes(45));
    }

    #[tokio::test]
    async fn test_descending_aggregated_rows_are_sorted() {
        let source = NewestFirst {
            rows: descending(12),
            cap: None,
            aggregates: true,
        };
        let plan = ResolutionPlan {
            bucket: Bucket::Hourly,
            strategy: FetchStrategy::ServerAggregated,
        };

        let series = load_series(&source, &window(), plan).await.unwrap();

        assert!(ascending(&series));
        assert!(!series.possibly_truncated);
    }

    #[tokio::test]
    async fn test_aggregated_rows_at_cap_flag_truncation() {
        let source = NewestFirst {
            rows: descending(6),
            cap: Some(6),
            aggregates: true,
        };
        let plan = ResolutionPlan {
            bucket: Bucket::FifteenMinutes,
            strategy: FetchStrategy::ServerAggregated,
        };

        let series = load_series(&source, &window(), plan).await.unwrap();

        assert!(series.possibly_truncated);
    }

    #[tokio::test]
    async fn test_rows_outside_window_dropped() {
        let mut rows = descending(3);
        rows.push(Reading::new(now() - Duration::hours(30), 1.0));
        let source = MemorySource::new(rows);

        let series = load_series(&source, &window(), direct(Bucket::Raw)).await.unwrap();

        assert_eq!(series.len(), 3);
    }

    #[tokio::test]
    async fn test_cap_flags_possible_truncation() {
        let at_cap = MemorySource::new(descending(20)).with_row_cap(10);
        let series = load_series(&at_cap, &window(), direct(Bucket::Raw)).await.unwrap();
        assert!(series.possibly_truncated);
        assert_eq!(series.len(), 10);

        let under_cap = MemorySource::new(descending(9)).with_row_cap(10);
        let series = load_series(&under_cap, &window(), direct(Bucket::Raw)).await.unwrap();
        assert!(!series.possibly_truncated);
    }

    #[tokio::test]
    async fn test_rejected_aggregation_falls_back_to_range() {
        let source = MemorySource::new(descending(12))
            .with_aggregation_error(SourceError::Query("function missing".into()));
        let plan = ResolutionPlan {
            bucket: Bucket::Hourly,
            strategy: FetchStrategy::ServerAggregated,
        };

        let series = load_series(&source, &window(), plan).await.unwrap();

        assert_eq!(series.bucket, Bucket::Hourly);
        assert!(!series.is_empty());
        assert_eq!(source.range_calls(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_propagates() {
        let source = MemorySource::new(descending(3))
            .with_error(SourceError::Unavailable("connection refused".into()));

        let err = load_series(&source, &window(), direct(Bucket::Raw)).await.unwrap_err();

        assert!(matches!(err, SourceError::Unavailable(_)));
    }
}
