//! The Window→Bucket→CacheEntry pipeline behind every chart and metric.
//!
//! A [`Dashboard`] resolves a window selection against the clock, picks a
//! resolution, serves the series from its [`QueryCache`] (fetching through
//! the [`DataSource`] on a miss) and summarizes it. Source failures never
//! escape: they become [`Notice`]s attached to the result, which falls back
//! to the last series successfully shown for the same view.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use tracing::{error, info, warn};

use crate::cache::{LATEST_TTL_SECS, QueryCache, SERIES_TTL_SECS, SeriesKey};
use crate::clock::Clock;
use crate::liveness::{Liveness, classify, is_online};
use crate::models::{Reading, Series};
use crate::resolution::{ResolutionPlan, ResolutionPolicy};
use crate::source::{DataSource, SourceError, load_series};
use crate::stats::{HourlyAverage, Summary, hourly_profile, summarize};
use crate::window::{Window, WindowSelection};

/// A non-fatal condition shown alongside whatever data could be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    SourceUnavailable(String),
    SourceQueryError(String),
    /// The range or aggregation query returned exactly `cap` rows.
    PossiblyTruncated { cap: usize },
    NoData,
}

impl From<SourceError> for Notice {
    fn from(e: SourceError) -> Self {
        match e {
            SourceError::Unavailable(msg) => Notice::SourceUnavailable(msg),
            SourceError::Query(msg) => Notice::SourceQueryError(msg),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::SourceUnavailable(msg) => write!(f, "Data source unavailable: {}", msg),
            Notice::SourceQueryError(msg) => write!(f, "Data source query failed: {}", msg),
            Notice::PossiblyTruncated { cap } => write!(
                f,
                "Retrieved exactly {} readings; older data in this window may be missing",
                cap
            ),
            Notice::NoData => f.write_str("No data available for the selected time range"),
        }
    }
}

/// What the user asked a view to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewRequest {
    Selection(WindowSelection),
    Custom {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl Default for ViewRequest {
    fn default() -> Self {
        ViewRequest::Selection(WindowSelection::default())
    }
}

/// A window's data, ready for charts, metrics and export.
#[derive(Debug, Clone)]
pub struct Loaded {
    pub window: Window,
    pub plan: ResolutionPlan,
    pub series: Series,
    pub summary: Summary,
    pub notices: Vec<Notice>,
}

/// The status bar: latest reading and how fresh it is.
#[derive(Debug, Clone)]
pub struct LiveStatus {
    pub latest: Option<Reading>,
    pub liveness: Liveness,
    pub online: bool,
    pub checked_at: DateTime<Utc>,
    pub notices: Vec<Notice>,
}

/// Tracks the current selection of one view so a slow fetch for an old
/// selection can be discarded.
#[derive(Debug, Default)]
pub struct ViewTracker {
    state: Mutex<(u64, ViewRequest)>,
}

impl ViewTracker {
    pub fn new(initial: ViewRequest) -> Self {
        Self {
            state: Mutex::new((0, initial)),
        }
    }

    /// Records a new selection and returns its generation.
    pub fn select(&self, request: ViewRequest) -> u64 {
        let mut state = self.lock();
        state.0 += 1;
        state.1 = request;
        state.0
    }

    pub fn current(&self) -> (u64, ViewRequest) {
        *self.lock()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.lock().0 == generation
    }

    fn lock(&self) -> MutexGuard<'_, (u64, ViewRequest)> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
pub enum ViewLoad {
    Loaded(Loaded),
    /// The selection changed while this load was in flight.
    Superseded,
}

#[derive(Debug, Clone, Copy)]
pub struct DashboardOptions {
    /// Earliest displayable data; every window is clamped to it.
    pub project_start: DateTime<Utc>,
    /// When the buoy went in the water. Display only.
    pub deployment_start: DateTime<Utc>,
    pub policy: ResolutionPolicy,
    pub series_ttl: Duration,
    pub latest_ttl: Duration,
    /// Time zone used for hour-of-day grouping.
    pub display_tz: Tz,
}

impl DashboardOptions {
    pub fn new(project_start: DateTime<Utc>) -> Self {
        Self {
            project_start,
            deployment_start: project_start,
            policy: ResolutionPolicy::default(),
            series_ttl: Duration::seconds(SERIES_TTL_SECS),
            latest_ttl: Duration::seconds(LATEST_TTL_SECS),
            display_tz: chrono_tz::Europe::London,
        }
    }
}

pub struct Dashboard {
    source: Arc<dyn DataSource>,
    clock: Arc<dyn Clock>,
    options: DashboardOptions,
    series_cache: QueryCache<SeriesKey, Series>,
    latest_cache: QueryCache<(), Option<Reading>>,
    last_shown: Mutex<HashMap<ViewRequest, Series>>,
    last_latest: Mutex<Option<Reading>>,
}

impl Dashboard {
    pub fn new(
        source: Arc<dyn DataSource>,
        clock: Arc<dyn Clock>,
        options: DashboardOptions,
    ) -> Self {
        Self {
            series_cache: QueryCache::new(clock.clone(), options.series_ttl),
            latest_cache: QueryCache::new(clock.clone(), options.latest_ttl),
            source,
            clock,
            options,
            last_shown: Mutex::new(HashMap::new()),
            last_latest: Mutex::new(None),
        }
    }

    /// Resolves a request against the current time and project start.
    pub fn resolve(&self, request: ViewRequest) -> Window {
        match request {
            ViewRequest::Selection(selection) => {
                Window::sliding(selection, self.clock.now(), self.options.project_start)
            }
            ViewRequest::Custom { start, end } => {
                Window::custom(start, end, self.options.project_start)
            }
        }
    }

    pub async fn load(&self, selection: WindowSelection) -> Loaded {
        self.load_request(ViewRequest::Selection(selection)).await
    }

    /// Loads a fixed `[start, end]` range, e.g. for export.
    pub async fn load_custom(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Loaded {
        self.load_request(ViewRequest::Custom { start, end }).await
    }

    /// Loads the tracker's current selection, discarding the result if the
    /// selection changes before the fetch completes.
    pub async fn load_view(&self, tracker: &ViewTracker) -> ViewLoad {
        let (generation, request) = tracker.current();
        let loaded = self.load_request(request).await;

        if tracker.is_current(generation) {
            ViewLoad::Loaded(loaded)
        } else {
            info!(?request, "Selection changed during load, discarding result");
            ViewLoad::Superseded
        }
    }

    pub async fn load_request(&self, request: ViewRequest) -> Loaded {
        let window = self.resolve(request);
        let plan = self.options.policy.plan(window.span());
        let key = SeriesKey::new(&window, plan.bucket);

        let result = self
            .series_cache
            .get_or_fetch(key, || load_series(self.source.as_ref(), &window, plan))
            .await;

        let mut notices = Vec::new();
        let series = match result {
            Ok(series) => {
                if series.possibly_truncated {
                    let cap = self.source.row_cap().unwrap_or(series.len());
                    notices.push(Notice::PossiblyTruncated { cap });
                }
                if series.is_empty() {
                    notices.push(Notice::NoData);
                }
                lock(&self.last_shown).insert(request, series.clone());
                series
            }
            Err(e) => {
                log_source_error(&e);
                notices.push(e.into());
                lock(&self.last_shown)
                    .get(&request)
                    .cloned()
                    .unwrap_or_else(|| Series::empty(plan.bucket))
            }
        };

        let summary = summarize(&series.readings);
        Loaded {
            window,
            plan,
            series,
            summary,
            notices,
        }
    }

    /// Latest reading with its liveness, cached for the latest-reading ttl.
    pub async fn status(&self) -> LiveStatus {
        let result = self
            .latest_cache
            .get_or_fetch((), || self.source.fetch_latest())
            .await;
        let now = self.clock.now();

        let mut notices = Vec::new();
        let latest = match result {
            Ok(latest) => {
                *lock(&self.last_latest) = latest.clone();
                latest
            }
            Err(e) => {
                log_source_error(&e);
                notices.push(e.into());
                lock(&self.last_latest).clone()
            }
        };

        let ts = latest.as_ref().map(|r| r.timestamp);
        LiveStatus {
            liveness: classify(ts, now),
            online: is_online(ts, now),
            latest,
            checked_at: now,
            notices,
        }
    }

    /// Manual refresh: every cached query is fetched again on next use.
    pub fn refresh(&self) {
        self.series_cache.refresh();
        self.latest_cache.refresh();
        info!("Cache cleared");
    }

    pub fn hourly_profile(&self, series: &Series) -> Vec<HourlyAverage> {
        hourly_profile(&series.readings, &self.options.display_tz)
    }

    /// Whole days since deployment.
    pub fn days_monitoring(&self) -> i64 {
        (self.clock.now() - self.options.deployment_start).num_days().max(0)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn log_source_error(e: &SourceError) {
    match e {
        SourceError::Unavailable(msg) => warn!(error = %msg, "Data source unavailable"),
        SourceError::Query(msg) => error!(error = %msg, "Data source query failed"),
    }
}
