//! Summary statistics over a loaded window.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Timelike, Utc};
use serde::Serialize;

use crate::models::{Reading, SourceTag};

/// Bins used by the distribution chart.
pub const DEFAULT_HISTOGRAM_BINS: usize = 20;

/// A temperature extreme and when it occurred.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Extreme {
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stats {
    pub mean: f64,
    /// Population standard deviation.
    pub stddev: f64,
    pub min: Extreme,
    pub max: Extreme,
    pub count: usize,
}

/// Result of [`summarize`]; empty windows yield `NoData` instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Summary {
    NoData,
    Stats(Stats),
}

impl Summary {
    pub fn stats(&self) -> Option<&Stats> {
        match self {
            Summary::NoData => None,
            Summary::Stats(stats) => Some(stats),
        }
    }

    pub fn count(&self) -> usize {
        self.stats().map_or(0, |s| s.count)
    }
}

/// Computes the arithmetic mean of a slice of values. Returns 0.0 for empty input.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Computes the population standard deviation given a pre-computed mean.
/// Returns 0.0 for empty input.
pub fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;

    variance.sqrt()
}

/// Mean, spread and extremes of the readings' temperatures.
///
/// Non-finite temperatures are ignored. When several readings share the
/// extreme value the earliest one is reported.
pub fn summarize(readings: &[Reading]) -> Summary {
    let valid: Vec<&Reading> = readings
        .iter()
        .filter(|r| r.temperature.is_finite())
        .collect();

    let Some(first) = valid.first() else {
        return Summary::NoData;
    };

    let mut min = Extreme {
        value: first.temperature,
        timestamp: first.timestamp,
    };
    let mut max = min;

    for r in &valid[1..] {
        if r.temperature < min.value {
            min = Extreme {
                value: r.temperature,
                timestamp: r.timestamp,
            };
        }
        if r.temperature > max.value {
            max = Extreme {
                value: r.temperature,
                timestamp: r.timestamp,
            };
        }
    }

    let temperatures: Vec<f64> = valid.iter().map(|r| r.temperature).collect();
    let avg = mean(&temperatures);

    Summary::Stats(Stats {
        mean: avg,
        stddev: stddev(&temperatures, avg),
        min,
        max,
        count: temperatures.len(),
    })
}

/// Mean temperature for one hour of the day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HourlyAverage {
    pub hour: u32,
    pub mean: f64,
    pub count: usize,
}

/// Averages temperature by wall-clock hour of day (0-23) in `tz`.
///
/// Hours without readings are absent from the result, which is ascending by hour.
pub fn hourly_profile<Tz: TimeZone>(readings: &[Reading], tz: &Tz) -> Vec<HourlyAverage> {
    let mut by_hour: BTreeMap<u32, (f64, usize)> = BTreeMap::new();

    for r in readings.iter().filter(|r| r.temperature.is_finite()) {
        let hour = r.timestamp.with_timezone(tz).hour();
        let slot = by_hour.entry(hour).or_insert((0.0, 0));
        slot.0 += r.temperature;
        slot.1 += 1;
    }

    by_hour
        .into_iter()
        .map(|(hour, (sum, count))| HourlyAverage {
            hour,
            mean: sum / count as f64,
            count,
        })
        .collect()
}

/// One bar of the temperature distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Equal-width histogram across the observed temperature range.
///
/// Each bin is half-open except the last, which includes the maximum.
/// A window whose readings all share one value yields a single bin.
pub fn histogram(readings: &[Reading], bins: usize) -> Vec<HistogramBin> {
    let Summary::Stats(stats) = summarize(readings) else {
        return Vec::new();
    };
    if bins == 0 {
        return Vec::new();
    }

    let (lo, hi) = (stats.min.value, stats.max.value);
    if lo == hi {
        return vec![HistogramBin {
            lower: lo,
            upper: hi,
            count: stats.count,
        }];
    }

    let width = (hi - lo) / bins as f64;
    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: lo + width * i as f64,
            upper: if i + 1 == bins { hi } else { lo + width * (i + 1) as f64 },
            count: 0,
        })
        .collect();

    for r in readings.iter().filter(|r| r.temperature.is_finite()) {
        let idx = (((r.temperature - lo) / width).floor() as usize).min(bins - 1);
        out[idx].count += 1;
    }

    out
}

/// Reading counts per source tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceBreakdown {
    pub lora: usize,
    pub manual: usize,
    pub untagged: usize,
}

pub fn source_breakdown(readings: &[Reading]) -> SourceBreakdown {
    let mut s = SourceBreakdown::default();
    for r in readings {
        match r.source_tag {
            Some(SourceTag::Lora) => s.lora += 1,
            Some(SourceTag::Manual) => s.manual += 1,
            None => s.untagged += 1,
        }
    }
    s
}
