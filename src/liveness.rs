//! Classifies how recently the buoy last reported.
//!
//! | elapsed since latest reading | status  |
//! |------------------------------|---------|
//! | < 5 min                      | LIVE    |
//! | >= 5 min and < 30 min        | RECENT  |
//! | >= 30 min                    | OFFLINE |
//! | no reading                   | NO DATA |

use std::fmt;

use chrono::{DateTime, Duration, Utc};

pub const LIVE_WITHIN_MINUTES: i64 = 5;
pub const RECENT_WITHIN_MINUTES: i64 = 30;
/// Threshold for the status bar's online indicator.
pub const ONLINE_WITHIN_MINUTES: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Liveness {
    Live,
    Recent,
    Offline,
    NoData,
}

impl Liveness {
    pub fn label(&self) -> &'static str {
        match self {
            Liveness::Live => "LIVE",
            Liveness::Recent => "RECENT",
            Liveness::Offline => "OFFLINE",
            Liveness::NoData => "NO DATA",
        }
    }
}

impl fmt::Display for Liveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Time since `latest`, with future timestamps (clock skew) counted as zero.
fn elapsed(latest: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - latest).max(Duration::zero())
}

pub fn classify(latest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Liveness {
    let Some(latest) = latest else {
        return Liveness::NoData;
    };

    let elapsed = elapsed(latest, now);
    if elapsed < Duration::minutes(LIVE_WITHIN_MINUTES) {
        Liveness::Live
    } else if elapsed < Duration::minutes(RECENT_WITHIN_MINUTES) {
        Liveness::Recent
    } else {
        Liveness::Offline
    }
}

/// True when the latest reading is less than ten minutes old.
pub fn is_online(latest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    latest.is_some_and(|ts| elapsed(ts, now) < Duration::minutes(ONLINE_WITHIN_MINUTES))
}
