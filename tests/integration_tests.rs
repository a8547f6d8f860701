use std::sync::Arc;

use buoy_monitor::clock::ManualClock;
use buoy_monitor::dashboard::{Dashboard, DashboardOptions, Notice};
use buoy_monitor::export::{ExportFormat, file_name, from_csv, to_csv};
use buoy_monitor::liveness::Liveness;
use buoy_monitor::models::{Reading, SourceTag};
use buoy_monitor::resolution::Bucket;
use buoy_monitor::source::{MemorySource, SimulatedSource};
use buoy_monitor::window::{WindowSelection, day_bounds};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

fn project_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 30, 0, 0, 0).unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 15, 8, 30, 0).unwrap()
}

fn every_five_minutes(hours: i64) -> Vec<Reading> {
    (0..hours * 12)
        .map(|i| {
            Reading::new(now() - Duration::minutes(5 * i), 11.0 + (i % 7) as f64 * 0.1)
                .with_source(SourceTag::Lora)
                .with_signal_strength(-70)
        })
        .collect()
}

#[tokio::test]
async fn test_window_pipeline_end_to_end() {
    let source = Arc::new(MemorySource::new(every_five_minutes(48)));
    let clock = ManualClock::new(now());
    let dash = Dashboard::new(
        source.clone(),
        Arc::new(clock.clone()),
        DashboardOptions::new(project_start()),
    );

    let day = dash.load(WindowSelection::Last24Hours).await;
    assert_eq!(day.plan.bucket, Bucket::Raw);
    assert_eq!(day.series.len(), 24 * 12 + 1);
    assert!(day.notices.is_empty());

    let week = dash.load(WindowSelection::LastWeek).await;
    assert_eq!(week.plan.bucket, Bucket::FifteenMinutes);
    assert!(week.series.len() <= 48 * 4 + 1);
    assert!(week.series.readings.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

    // both windows served from cache within the ttl
    clock.advance(Duration::seconds(30));
    dash.load(WindowSelection::Last24Hours).await;
    dash.load(WindowSelection::LastWeek).await;
    assert_eq!(source.range_calls(), 2);
}

#[tokio::test]
async fn test_all_data_is_daily_and_starts_at_project_start() {
    let dash = Dashboard::new(
        Arc::new(MemorySource::new(every_five_minutes(72))),
        Arc::new(ManualClock::new(now())),
        DashboardOptions::new(project_start()),
    );

    let all = dash.load(WindowSelection::AllData).await;

    assert_eq!(all.plan.bucket, Bucket::Daily);
    assert_eq!(all.window.start(), project_start());
    assert_eq!(all.series.len(), 4);
    assert_eq!(all.summary.count(), 4);
}

#[tokio::test]
async fn test_truncated_window_reports_cap() {
    let dash = Dashboard::new(
        Arc::new(MemorySource::new(every_five_minutes(24)).with_row_cap(100)),
        Arc::new(ManualClock::new(now())),
        DashboardOptions::new(project_start()),
    );

    let loaded = dash.load(WindowSelection::Last24Hours).await;

    assert!(loaded.series.possibly_truncated);
    assert!(loaded.notices.contains(&Notice::PossiblyTruncated { cap: 100 }));
}

#[tokio::test]
async fn test_liveness_follows_clock() {
    let readings = vec![Reading::new(now() - Duration::minutes(2), 12.0)];
    let clock = ManualClock::new(now());
    let dash = Dashboard::new(
        Arc::new(MemorySource::new(readings)),
        Arc::new(clock.clone()),
        DashboardOptions::new(project_start()),
    );

    assert_eq!(dash.status().await.liveness, Liveness::Live);
    clock.advance(Duration::minutes(8));
    assert_eq!(dash.status().await.liveness, Liveness::Recent);
    clock.advance(Duration::minutes(30));
    assert_eq!(dash.status().await.liveness, Liveness::Offline);
}

#[tokio::test]
async fn test_export_round_trip_through_file() {
    let t0 = now() - Duration::hours(1);
    let readings = vec![
        Reading::new(t0, 11.2)
            .with_signal_strength(-66)
            .with_source(SourceTag::Lora)
            .with_location("Stromness Harbour"),
        Reading::new(t0 + Duration::minutes(5), 11.3).with_source(SourceTag::Manual),
    ];

    let dir = tempfile::tempdir().unwrap();
    let path = dir
        .path()
        .join(file_name("Last Hour", ExportFormat::Csv, false));
    std::fs::write(&path, to_csv(&readings).unwrap()).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("timestamp,temperature,rssi,source,location\n"));
    assert!(path.ends_with("stromness_water_temp_last_hour.csv"));

    let source = MemorySource::from_export_file(&path).unwrap();
    let dash = Dashboard::new(
        Arc::new(source),
        Arc::new(ManualClock::new(now())),
        DashboardOptions::new(project_start()),
    );
    let loaded = dash.load(WindowSelection::LastHour).await;

    assert_eq!(loaded.series.readings, from_csv(text.as_bytes()).unwrap());
    assert_eq!(loaded.series.readings[1].signal_strength, None);
}

#[tokio::test]
async fn test_demo_source_drives_dashboard() {
    let clock = Arc::new(ManualClock::new(now()));
    let dash = Dashboard::new(
        Arc::new(SimulatedSource::new(clock.clone())),
        clock,
        DashboardOptions::new(project_start()),
    );

    let status = dash.status().await;
    assert_eq!(status.liveness, Liveness::Live);
    assert!(status.online);

    let loaded = dash.load(WindowSelection::Last6Hours).await;
    assert_eq!(loaded.series.len(), 6 * 12 + 1);
    let stats = loaded.summary.stats().unwrap();
    assert!(stats.min.value >= 10.0 && stats.max.value <= 14.0);
}

#[tokio::test]
async fn test_quick_windows_pick_coarser_buckets() {
    let dash = Dashboard::new(
        Arc::new(MemorySource::new(every_five_minutes(24 * 14))),
        Arc::new(ManualClock::new(now())),
        DashboardOptions::new(project_start()),
    );

    let mut buckets = Vec::new();
    for selection in WindowSelection::QUICK {
        let loaded = dash.load(selection).await;
        assert!(!loaded.series.is_empty(), "{selection} loaded nothing");
        buckets.push(loaded.plan.bucket);
    }

    assert_eq!(
        buckets,
        vec![
            Bucket::Raw,
            Bucket::FifteenMinutes,
            Bucket::Hourly,
            Bucket::Daily,
            Bucket::Daily,
        ]
    );
}

#[tokio::test]
async fn test_date_range_keeps_last_subsecond_reading() {
    let day = NaiveDate::from_ymd_opt(2025, 9, 14).unwrap();
    let last = Utc.with_ymd_and_hms(2025, 9, 14, 23, 59, 59).unwrap() + Duration::milliseconds(750);
    let readings = vec![
        Reading::new(Utc.with_ymd_and_hms(2025, 9, 14, 0, 0, 0).unwrap(), 11.0),
        Reading::new(last, 11.4),
        Reading::new(Utc.with_ymd_and_hms(2025, 9, 15, 0, 0, 0).unwrap(), 11.8),
    ];
    let dash = Dashboard::new(
        Arc::new(MemorySource::new(readings)),
        Arc::new(ManualClock::new(now())),
        DashboardOptions::new(project_start()),
    );

    let (start, end) = day_bounds(day, day);
    let loaded = dash.load_custom(start, end).await;

    assert_eq!(loaded.series.len(), 2);
    assert_eq!(loaded.series.readings[1].timestamp, last);
}
