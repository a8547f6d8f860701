//! Chooses how finely a window is displayed and how it is fetched.
//!
//! Short windows are plotted from raw readings, longer ones from averages
//! over 15-minute, hourly or daily buckets. The same policy serves every
//! view of the dashboard.
//!
//! | span (hours)                          | bucket         |
//! |---------------------------------------|----------------|
//! | <= 168 and raw rows fit the budget    | raw            |
//! | <= 168 otherwise                      | 15-minute      |
//! | 168 < span <= 720                     | hourly         |
//! | > 720, or unbounded                   | daily          |

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};

use crate::models::Reading;

/// Inclusive upper bound of the sub-hourly range (one week).
pub const WEEK_HOURS: f64 = 168.0;
/// Inclusive upper bound of the hourly range (thirty days).
pub const MONTH_HOURS: f64 = 720.0;

pub const DEFAULT_DISPLAY_BUDGET: usize = 1000;
/// One reading every five minutes.
pub const DEFAULT_READINGS_PER_HOUR: f64 = 12.0;

/// Aggregation granularity applied before charting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bucket {
    Raw,
    FifteenMinutes,
    Hourly,
    Daily,
}

impl Bucket {
    /// Bucket width in seconds, `None` for raw readings.
    pub fn width_secs(&self) -> Option<i64> {
        match self {
            Bucket::Raw => None,
            Bucket::FifteenMinutes => Some(15 * 60),
            Bucket::Hourly => Some(60 * 60),
            Bucket::Daily => Some(24 * 60 * 60),
        }
    }

    /// Floors `ts` to the start of its bucket in UTC.
    pub fn truncate(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self.width_secs() {
            None => ts,
            Some(width) => {
                let start = ts.timestamp().div_euclid(width) * width;
                Utc.timestamp_opt(start, 0).single().unwrap_or(ts)
            }
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bucket::Raw => write!(f, "raw"),
            Bucket::FifteenMinutes => write!(f, "15min"),
            Bucket::Hourly => write!(f, "hourly"),
            Bucket::Daily => write!(f, "daily"),
        }
    }
}

/// Length of a requested window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Span {
    Hours(f64),
    /// From the project start to now.
    Unbounded,
}

/// How the rows for a plan are obtained from the data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchStrategy {
    /// Plain range query returning every row.
    Direct,
    /// Server-side aggregation call, falling back to a direct query.
    ServerAggregated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResolutionPlan {
    pub bucket: Bucket,
    pub strategy: FetchStrategy,
}

/// Maps a window span to a bucket and fetch strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionPolicy {
    /// Most raw points a chart should receive.
    pub display_budget: usize,
    /// Expected reading cadence, used to estimate raw row counts.
    pub readings_per_hour: f64,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        Self {
            display_budget: DEFAULT_DISPLAY_BUDGET,
            readings_per_hour: DEFAULT_READINGS_PER_HOUR,
        }
    }
}

impl ResolutionPolicy {
    pub fn new(display_budget: usize, readings_per_hour: f64) -> Self {
        Self {
            display_budget,
            readings_per_hour,
        }
    }

    /// Picks the bucket for `span`. Total and deterministic.
    pub fn choose_bucket(&self, span: Span) -> Bucket {
        let hours = match span {
            Span::Unbounded => return Bucket::Daily,
            Span::Hours(h) if h.is_nan() || h < 0.0 => 0.0,
            Span::Hours(h) => h,
        };

        if hours <= WEEK_HOURS {
            if self.anticipated_rows(hours) > self.display_budget as f64 {
                Bucket::FifteenMinutes
            } else {
                Bucket::Raw
            }
        } else if hours <= MONTH_HOURS {
            Bucket::Hourly
        } else {
            Bucket::Daily
        }
    }

    pub fn plan(&self, span: Span) -> ResolutionPlan {
        let bucket = self.choose_bucket(span);
        let strategy = match bucket {
            Bucket::Raw => FetchStrategy::Direct,
            _ => FetchStrategy::ServerAggregated,
        };
        ResolutionPlan { bucket, strategy }
    }

    fn anticipated_rows(&self, hours: f64) -> f64 {
        let rate = if self.readings_per_hour.is_finite() && self.readings_per_hour > 0.0 {
            self.readings_per_hour
        } else {
            0.0
        };
        (hours * rate).ceil()
    }
}

#[derive(Default)]
struct Accumulator {
    temperature_sum: f64,
    count: usize,
    signal_sum: f64,
    signal_count: usize,
    first: Option<Reading>,
    uniform_source: bool,
    uniform_location: bool,
}

impl Accumulator {
    fn push(&mut self, reading: &Reading) {
        self.temperature_sum += reading.temperature;
        self.count += 1;
        if let Some(dbm) = reading.signal_strength {
            self.signal_sum += dbm as f64;
            self.signal_count += 1;
        }
        match &self.first {
            None => {
                self.first = Some(reading.clone());
                self.uniform_source = true;
                self.uniform_location = true;
            }
            Some(first) => {
                self.uniform_source &= first.source_tag == reading.source_tag;
                self.uniform_location &= first.location == reading.location;
            }
        }
    }

    fn finish(self, bucket_start: DateTime<Utc>) -> Option<Reading> {
        let first = self.first?;
        let signal_strength = if self.signal_count == 0 {
            None
        } else {
            Some((self.signal_sum / self.signal_count as f64).round() as i32)
        };

        Some(Reading {
            timestamp: bucket_start,
            temperature: self.temperature_sum / self.count as f64,
            signal_strength,
            source_tag: if self.uniform_source { first.source_tag } else { None },
            location: if self.uniform_location { first.location } else { None },
        })
    }
}

/// Groups readings by truncated timestamp and averages each group.
///
/// Buckets without readings are never produced. Output is ascending by
/// bucket start. `Bucket::Raw` returns the readings unchanged.
pub fn bucketize(readings: &[Reading], bucket: Bucket) -> Vec<Reading> {
    if bucket == Bucket::Raw {
        return readings.to_vec();
    }

    let mut groups: BTreeMap<DateTime<Utc>, Accumulator> = BTreeMap::new();
    for reading in readings.iter().filter(|r| r.temperature.is_finite()) {
        groups
            .entry(bucket.truncate(reading.timestamp))
            .or_default()
            .push(reading);
    }

    groups
        .into_iter()
        .filter_map(|(start, acc)| acc.finish(start))
        .collect()
}
