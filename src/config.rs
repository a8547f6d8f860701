//! Runtime settings, read from the environment (optionally seeded from `.env`
//! by the caller).
//!
//! Only the datastore URL and key are required, and only when running
//! against the hosted datastore; demo mode needs neither.

use std::env;
use std::time::Duration as StdDuration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::{Europe, Tz};

use crate::cache::{LATEST_TTL_SECS, SERIES_TTL_SECS};
use crate::dashboard::DashboardOptions;
use crate::models::parse_timestamp;
use crate::resolution::{DEFAULT_DISPLAY_BUDGET, DEFAULT_READINGS_PER_HOUR, ResolutionPolicy};
use crate::source::RestSourceConfig;

const DEFAULT_TABLE: &str = "water_temperature";
const DEFAULT_AGGREGATE_FUNCTION: &str = "get_temperature_data";
const DEFAULT_PROJECT_START: &str = "2025-06-30T00:00:00Z";
const DEFAULT_ROW_CAP: usize = 1000;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Parse an optional environment variable with a default value.
macro_rules! parse_env {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        $lookup($var_name)
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional timestamp environment variable.
macro_rules! parse_env_timestamp {
    ($lookup:expr, $var_name:expr) => {
        $lookup($var_name)
            .map(|v| {
                parse_timestamp(&v).ok_or_else(|| anyhow!("Invalid {}: '{}'", $var_name, v))
            })
            .transpose()?
    };
}

#[derive(Debug, Clone)]
pub struct Config {
    /// `SUPABASE_URL`
    pub supabase_url: Option<String>,
    /// `SUPABASE_ANON_KEY`
    pub supabase_key: Option<String>,
    pub table: String,
    /// Empty disables server-side aggregation.
    pub aggregate_function: String,
    pub project_start: DateTime<Utc>,
    pub deployment_start: DateTime<Utc>,
    pub row_cap: usize,
    pub display_budget: usize,
    pub readings_per_hour: f64,
    pub series_ttl_secs: i64,
    pub latest_ttl_secs: i64,
    /// IANA zone for hour-of-day grouping, `DISPLAY_TIMEZONE`.
    pub display_tz: Tz,
    pub http_timeout_secs: u64,
}

impl Config {
    /// Loads configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads configuration through `lookup`, which returns a variable's value if set.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let project_start = match parse_env_timestamp!(non_empty, "PROJECT_START") {
            Some(ts) => ts,
            None => parse_timestamp(DEFAULT_PROJECT_START)
                .ok_or_else(|| anyhow!("Invalid default project start"))?,
        };
        let deployment_start =
            parse_env_timestamp!(non_empty, "DEPLOYMENT_START").unwrap_or(project_start);

        let config = Config {
            supabase_url: non_empty("SUPABASE_URL"),
            supabase_key: non_empty("SUPABASE_ANON_KEY"),
            table: non_empty("READINGS_TABLE").unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            aggregate_function: lookup("AGGREGATE_FUNCTION")
                .map(|v| v.trim().to_string())
                .unwrap_or_else(|| DEFAULT_AGGREGATE_FUNCTION.to_string()),
            project_start,
            deployment_start,
            row_cap: parse_env!(non_empty, "ROW_CAP", usize, DEFAULT_ROW_CAP),
            display_budget: parse_env!(non_empty, "DISPLAY_BUDGET", usize, DEFAULT_DISPLAY_BUDGET),
            readings_per_hour: parse_env!(
                non_empty,
                "READINGS_PER_HOUR",
                f64,
                DEFAULT_READINGS_PER_HOUR
            ),
            series_ttl_secs: parse_env!(non_empty, "SERIES_TTL_SECS", i64, SERIES_TTL_SECS),
            latest_ttl_secs: parse_env!(non_empty, "LATEST_TTL_SECS", i64, LATEST_TTL_SECS),
            display_tz: parse_env!(non_empty, "DISPLAY_TIMEZONE", Tz, Europe::London),
            http_timeout_secs: parse_env!(
                non_empty,
                "HTTP_TIMEOUT_SECS",
                u64,
                DEFAULT_HTTP_TIMEOUT_SECS
            ),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(self.readings_per_hour.is_finite() && self.readings_per_hour > 0.0) {
            return Err(anyhow!("READINGS_PER_HOUR must be a positive number"));
        }
        if self.series_ttl_secs < 0 || self.latest_ttl_secs < 0 {
            return Err(anyhow!("cache ttls must not be negative"));
        }
        Ok(())
    }

    /// Settings for the hosted datastore. Fails if URL or key are missing.
    pub fn rest_source_config(&self) -> Result<(RestSourceConfig, String)> {
        let base_url = self
            .supabase_url
            .clone()
            .ok_or_else(|| anyhow!("SUPABASE_URL must be set in .env or environment"))?;
        let key = self
            .supabase_key
            .clone()
            .ok_or_else(|| anyhow!("SUPABASE_ANON_KEY must be set in .env or environment"))?;

        let aggregate_function =
            (!self.aggregate_function.is_empty()).then(|| self.aggregate_function.clone());

        Ok((
            RestSourceConfig {
                base_url,
                table: self.table.clone(),
                aggregate_function,
                row_cap: self.row_cap,
            },
            key,
        ))
    }

    pub fn http_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.http_timeout_secs)
    }

    pub fn dashboard_options(&self) -> DashboardOptions {
        let mut options = DashboardOptions::new(self.project_start);
        options.deployment_start = self.deployment_start;
        options.policy = ResolutionPolicy::new(self.display_budget, self.readings_per_hour);
        options.series_ttl = Duration::seconds(self.series_ttl_secs);
        options.latest_ttl = Duration::seconds(self.latest_ttl_secs);
        options.display_tz = self.display_tz;
        options
    }

    /// Log the loaded configuration, with the API key masked.
    pub fn log_config(&self) {
        let masked_key = self.supabase_key.as_deref().map(mask).unwrap_or_default();

        tracing::info!("Configuration loaded:");
        tracing::info!("  SUPABASE_URL       : {}", self.supabase_url.as_deref().unwrap_or("-"));
        tracing::info!("  SUPABASE_ANON_KEY  : {}", masked_key);
        tracing::info!("  READINGS_TABLE     : {}", self.table);
        tracing::info!("  AGGREGATE_FUNCTION : {}", self.aggregate_function);
        tracing::info!("  PROJECT_START      : {}", self.project_start);
        tracing::info!("  DEPLOYMENT_START   : {}", self.deployment_start);
        tracing::info!("  ROW_CAP            : {}", self.row_cap);
        tracing::info!("  DISPLAY_BUDGET     : {}", self.display_budget);
        tracing::info!("  READINGS_PER_HOUR  : {}", self.readings_per_hour);
        tracing::info!("  SERIES_TTL_SECS    : {}", self.series_ttl_secs);
        tracing::info!("  LATEST_TTL_SECS    : {}", self.latest_ttl_secs);
        tracing::info!("  DISPLAY_TIMEZONE   : {}", self.display_tz);
        tracing::info!("  HTTP_TIMEOUT_SECS  : {}", self.http_timeout_secs);
    }
}

/// Keeps the first four characters of a secret.
fn mask(secret: &str) -> String {
    let prefix: String = secret.chars().take(4).collect();
    format!("{}****", prefix)
}
