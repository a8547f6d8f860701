use std::f64::consts::PI;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};

use super::{DataSource, SourceError};
use crate::clock::Clock;
use crate::models::{Reading, SourceTag};

const INTERVAL_SECS: i64 = 300;
const BASE_TEMPERATURE: f64 = 12.0;
const DAILY_SWING: f64 = 1.5;
const DRIFT: f64 = 0.5;
const LOCATION: &str = "Stromness Harbour";

/// Demo data: a reading every five minutes up to the clock's current time.
///
/// Values depend only on the timestamp, so repeated queries agree.
pub struct SimulatedSource {
    clock: Arc<dyn Clock>,
}

impl SimulatedSource {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn reading_at(index: i64) -> Option<Reading> {
        let timestamp = DateTime::from_timestamp(index * INTERVAL_SECS, 0)?;
        let hour = timestamp.hour() as f64 + timestamp.minute() as f64 / 60.0;
        let daily = DAILY_SWING * ((hour - 6.0) * PI / 12.0).sin();
        let drift = DRIFT * (index as f64 * 0.01).sin();
        let temperature = ((BASE_TEMPERATURE + daily + drift) * 100.0).round() / 100.0;

        let reading = Reading::new(timestamp, temperature).with_location(LOCATION);
        if index % 10 == 0 {
            Some(reading.with_source(SourceTag::Manual))
        } else {
            Some(
                reading
                    .with_source(SourceTag::Lora)
                    .with_signal_strength(-80 + (index * 7).rem_euclid(21) as i32),
            )
        }
    }
}

#[async_trait]
impl DataSource for SimulatedSource {
    async fn fetch_range(
        &self,
        lower: DateTime<Utc>,
        upper: DateTime<Utc>,
    ) -> Result<Vec<Reading>, SourceError> {
        let upper = upper.min(self.clock.now());
        let first = (lower.timestamp() + INTERVAL_SECS - 1).div_euclid(INTERVAL_SECS);
        let last = upper.timestamp().div_euclid(INTERVAL_SECS);

        Ok((first..=last).filter_map(Self::reading_at).collect())
    }

    async fn fetch_latest(&self) -> Result<Option<Reading>, SourceError> {
        let index = self.clock.now().timestamp().div_euclid(INTERVAL_SECS);
        Ok(Self::reading_at(index))
    }
}
