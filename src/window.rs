//! Requested time spans and the controls that produce them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

use crate::resolution::Span;

/// Window choices offered by the dashboard controls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WindowSelection {
    LastHour,
    Last6Hours,
    #[default]
    Last24Hours,
    Last3Days,
    LastWeek,
    LastMonth,
    Last3Months,
    LastYear,
    AllData,
}

impl WindowSelection {
    pub const ALL: [WindowSelection; 9] = [
        WindowSelection::LastHour,
        WindowSelection::Last6Hours,
        WindowSelection::Last24Hours,
        WindowSelection::Last3Days,
        WindowSelection::LastWeek,
        WindowSelection::LastMonth,
        WindowSelection::Last3Months,
        WindowSelection::LastYear,
        WindowSelection::AllData,
    ];

    /// The chart's quick-range buttons, shortest first.
    pub const QUICK: [WindowSelection; 5] = [
        WindowSelection::Last24Hours,
        WindowSelection::LastWeek,
        WindowSelection::LastMonth,
        WindowSelection::Last3Months,
        WindowSelection::AllData,
    ];

    /// Look-back in hours, `None` for everything since the project start.
    pub fn hours(&self) -> Option<i64> {
        match self {
            WindowSelection::LastHour => Some(1),
            WindowSelection::Last6Hours => Some(6),
            WindowSelection::Last24Hours => Some(24),
            WindowSelection::Last3Days => Some(72),
            WindowSelection::LastWeek => Some(168),
            WindowSelection::LastMonth => Some(720),
            WindowSelection::Last3Months => Some(2160),
            WindowSelection::LastYear => Some(8760),
            WindowSelection::AllData => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            WindowSelection::LastHour => "Last Hour",
            WindowSelection::Last6Hours => "Last 6 Hours",
            WindowSelection::Last24Hours => "Last 24 Hours",
            WindowSelection::Last3Days => "Last 3 Days",
            WindowSelection::LastWeek => "Last Week",
            WindowSelection::LastMonth => "Last Month",
            WindowSelection::Last3Months => "Last 3 Months",
            WindowSelection::LastYear => "Last Year",
            WindowSelection::AllData => "All Data",
        }
    }
}

impl fmt::Display for WindowSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for WindowSelection {
    type Err = anyhow::Error;

    /// Accepts labels in any case with spaces, dashes or underscores
    /// (`last-24-hours`, `Last Week`) and short forms (`1h`, `24h`, `7d`, `all`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '_' || c == ' ' { '-' } else { c })
            .collect();

        let selection = match normalized.as_str() {
            "1h" | "hour" | "last-hour" => WindowSelection::LastHour,
            "6h" | "last-6-hours" => WindowSelection::Last6Hours,
            "24h" | "1d" | "day" | "last-day" | "last-24-hours" => WindowSelection::Last24Hours,
            "72h" | "3d" | "last-3-days" => WindowSelection::Last3Days,
            "168h" | "7d" | "week" | "last-week" => WindowSelection::LastWeek,
            "720h" | "30d" | "month" | "last-month" => WindowSelection::LastMonth,
            "2160h" | "90d" | "last-3-months" => WindowSelection::Last3Months,
            "8760h" | "1y" | "year" | "last-year" => WindowSelection::LastYear,
            "all" | "all-data" => WindowSelection::AllData,
            _ => anyhow::bail!("unknown window '{s}'"),
        };
        Ok(selection)
    }
}

/// UTC instants covering the whole days `from` through `to`.
///
/// The end is the last nanosecond before the midnight after `to`, so every
/// reading stamped on `to` falls inside the range.
pub fn day_bounds(from: NaiveDate, to: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = from.and_time(NaiveTime::MIN).and_utc();
    let end = to
        .succ_opt()
        .map(|next| next.and_time(NaiveTime::MIN).and_utc() - Duration::nanoseconds(1))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    (start, end)
}

/// Where a window starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LowerBound {
    Since(DateTime<Utc>),
    ProjectStart,
}

/// A resolved request for data.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub lower: LowerBound,
    pub upper: DateTime<Utc>,
    /// True for custom ranges whose end does not follow `now`.
    pub fixed_upper: bool,
    project_start: DateTime<Utc>,
    span: Span,
    /// Set when a custom start was moved forward to the project start.
    pub adjusted_to_project_start: bool,
}

impl Window {
    /// Sliding window ending at `now`, clamped to the project start.
    pub fn sliding(
        selection: WindowSelection,
        now: DateTime<Utc>,
        project_start: DateTime<Utc>,
    ) -> Self {
        let (lower, span) = match selection.hours() {
            None => (LowerBound::ProjectStart, Span::Unbounded),
            Some(hours) => {
                let start = now - Duration::hours(hours);
                let lower = if start > project_start {
                    LowerBound::Since(start)
                } else {
                    LowerBound::ProjectStart
                };
                (lower, Span::Hours(hours as f64))
            }
        };

        Self {
            lower,
            upper: now,
            fixed_upper: false,
            project_start,
            span,
            adjusted_to_project_start: false,
        }
    }

    /// Fixed `[start, end]` range, clamped to the project start.
    pub fn custom(start: DateTime<Utc>, end: DateTime<Utc>, project_start: DateTime<Utc>) -> Self {
        let adjusted = start < project_start;
        let start = start.max(project_start);
        let end = end.max(start);
        let lower = if adjusted {
            LowerBound::ProjectStart
        } else {
            LowerBound::Since(start)
        };
        let hours = (end - start).num_seconds() as f64 / 3600.0;

        Self {
            lower,
            upper: end,
            fixed_upper: true,
            project_start,
            span: Span::Hours(hours),
            adjusted_to_project_start: adjusted,
        }
    }

    /// Concrete start instant.
    pub fn start(&self) -> DateTime<Utc> {
        match self.lower {
            LowerBound::Since(ts) => ts,
            LowerBound::ProjectStart => self.project_start,
        }
    }

    /// Requested span; sliding windows report the selection's length even
    /// when the project start cuts them short.
    pub fn span(&self) -> Span {
        self.span
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self.span, Span::Unbounded)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start() && ts <= self.upper
    }
}
