use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use reqwest::{Method, Request, Response, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{DataSource, SourceError};
use crate::export::format_timestamp;
use crate::fetch::{ApiKey, BasicClient, HttpClient};
use crate::models::{Reading, SourceTag, parse_timestamp};
use crate::resolution::Bucket;

#[derive(Debug, Clone)]
pub struct RestSourceConfig {
    /// Project URL, e.g. `https://abc.supabase.co`.
    pub base_url: String,
    pub table: String,
    /// Server-side aggregation function; `None` disables the RPC path.
    pub aggregate_function: Option<String>,
    /// Rows per direct query. Zero sends no limit.
    pub row_cap: usize,
}

/// Readings table exposed through a PostgREST endpoint.
pub struct RestSource<C> {
    client: C,
    base_url: String,
    config: RestSourceConfig,
}

impl RestSource<ApiKey<BasicClient>> {
    /// Source authenticated with a Supabase anon key.
    pub fn connect(
        config: RestSourceConfig,
        api_key: &str,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = ApiKey::supabase(BasicClient::new(timeout)?, api_key)?;
        Self::new(client, config)
    }
}

impl<C: HttpClient> RestSource<C> {
    pub fn new(client: C, config: RestSourceConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Url::parse(&base_url).with_context(|| format!("invalid base URL '{}'", base_url))?;
        Ok(Self {
            client,
            base_url,
            config,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, SourceError> {
        let raw = format!("{}/rest/v1/{}", self.base_url, path);
        Url::parse(&raw).map_err(|e| SourceError::Query(format!("invalid URL '{}': {}", raw, e)))
    }

    async fn send(&self, req: Request) -> Result<Vec<Reading>, SourceError> {
        let url = req.url().path().to_string();
        let response = self
            .client
            .execute(req)
            .await
            .map_err(|e| SourceError::Unavailable(format!("request to {} failed: {}", url, e)))?;

        let rows = decode(response).await?;
        let total = rows.len();
        let readings: Vec<Reading> = rows
            .into_iter()
            .map(RawReading::into_reading)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();

        if readings.len() < total {
            warn!(
                skipped = total - readings.len(),
                "Rows without a temperature were skipped"
            );
        }
        debug!(path = %url, rows = readings.len(), "Query complete");
        Ok(readings)
    }
}

async fn decode(response: Response) -> Result<Vec<RawReading>, SourceError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let msg = format!("status {}: {}", status, body);
        return Err(if status.is_server_error() {
            SourceError::Unavailable(msg)
        } else {
            SourceError::Query(msg)
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| SourceError::Unavailable(format!("failed to read response: {}", e)))?;
    serde_json::from_slice(&body)
        .map_err(|e| SourceError::Query(format!("failed to parse response: {}", e)))
}

/// Row as stored in the readings table or returned by the aggregation RPC.
#[derive(Debug, Deserialize)]
struct RawReading {
    #[serde(alias = "time_stamp")]
    timestamp: String,
    temperature: Option<f64>,
    #[serde(default)]
    rssi: Option<f64>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    location: Option<String>,
}

impl RawReading {
    fn into_reading(self) -> Result<Option<Reading>, SourceError> {
        let timestamp = parse_timestamp(&self.timestamp).ok_or_else(|| {
            SourceError::Query(format!("malformed timestamp '{}'", self.timestamp))
        })?;
        let Some(temperature) = self.temperature else {
            return Ok(None);
        };

        Ok(Some(Reading {
            timestamp,
            temperature,
            signal_strength: self.rssi.filter(|v| v.is_finite()).map(|v| v.round() as i32),
            source_tag: self.source.as_deref().and_then(SourceTag::parse),
            location: self.location.filter(|l| !l.is_empty()),
        }))
    }
}

#[derive(Debug, Serialize)]
struct AggregateRequest {
    start_timestamp: String,
    hours_range: i64,
}

#[async_trait]
impl<C: HttpClient> DataSource for RestSource<C> {
    async fn fetch_range(
        &self,
        lower: DateTime<Utc>,
        upper: DateTime<Utc>,
    ) -> Result<Vec<Reading>, SourceError> {
        let mut url = self.endpoint(&self.config.table)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("select", "*")
                .append_pair("timestamp", &format!("gte.{}", format_timestamp(&lower)))
                .append_pair("timestamp", &format!("lte.{}", format_timestamp(&upper)))
                .append_pair("order", "timestamp.asc");
            if self.config.row_cap > 0 {
                query.append_pair("limit", &self.config.row_cap.to_string());
            }
        }

        self.send(Request::new(Method::GET, url)).await
    }

    async fn fetch_latest(&self) -> Result<Option<Reading>, SourceError> {
        let mut url = self.endpoint(&self.config.table)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("order", "timestamp.desc")
            .append_pair("limit", "1");

        let rows = self.send(Request::new(Method::GET, url)).await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_aggregated(
        &self,
        lower: DateTime<Utc>,
        upper: DateTime<Utc>,
        bucket: Bucket,
    ) -> Result<Option<Vec<Reading>>, SourceError> {
        let Some(function) = &self.config.aggregate_function else {
            return Ok(None);
        };

        let seconds = (upper - lower).num_seconds().max(0);
        let payload = AggregateRequest {
            start_timestamp: lower.format("%Y-%m-%d %H:%M:%S").to_string(),
            hours_range: (seconds + 3599) / 3600,
        };
        let body = serde_json::to_vec(&payload)
            .map_err(|e| SourceError::Query(format!("failed to encode request: {}", e)))?;

        let mut req = Request::new(Method::POST, self.endpoint(&format!("rpc/{}", function))?);
        req.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        *req.body_mut() = Some(body.into());

        debug!(%function, hours = payload.hours_range, %bucket, "Calling aggregation function");
        self.send(req).await.map(Some)
    }

    fn row_cap(&self) -> Option<usize> {
        (self.config.row_cap > 0).then_some(self.config.row_cap)
    }
}
