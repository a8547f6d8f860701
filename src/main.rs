//! CLI entry point for the Stromness buoy monitor.
//!
//! Provides subcommands for checking the buoy's status, summarizing a time
//! window, exporting readings and watching the dashboard refresh.

use anyhow::{Context, Result};
use buoy_monitor::{
    clock::{Clock, SystemClock},
    config::Config,
    dashboard::{Dashboard, Loaded, LiveStatus},
    export::{ExportFormat, file_name, gzip, range_label},
    source::{DataSource, RestSource, SimulatedSource},
    stats::{DEFAULT_HISTOGRAM_BINS, histogram, source_breakdown},
    window::{WindowSelection, day_bounds},
};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "buoy_monitor")]
#[command(about = "Monitor the Stromness sea-water temperature buoy", long_about = None)]
struct Cli {
    /// Use simulated readings instead of the hosted datastore
    #[arg(long, global = true, default_value_t = false)]
    demo: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the latest reading and whether the buoy is reporting
    Status,
    /// Summarize a time window
    Summary {
        /// Time window, e.g. "24h", "last-week", "all"
        #[arg(short, long, default_value = "last-24-hours", conflicts_with = "quick")]
        window: WindowSelection,

        /// Summarize each quick-range window in turn (24h, week, month, 3 months, all)
        #[arg(short, long, default_value_t = false)]
        quick: bool,

        /// Number of histogram bins
        #[arg(short, long, default_value_t = DEFAULT_HISTOGRAM_BINS)]
        bins: usize,
    },
    /// Export a time window or date range to CSV or JSON
    Export {
        /// Time window, e.g. "24h", "last-week", "all"
        #[arg(short, long, default_value = "last-24-hours", conflicts_with_all = ["from", "to"])]
        window: WindowSelection,

        /// First day of a custom range (YYYY-MM-DD)
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// Last day of a custom range, inclusive (YYYY-MM-DD)
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,

        /// Output format: csv or json
        #[arg(short, long, default_value = "csv")]
        format: ExportFormat,

        /// Gzip compress the output file
        #[arg(long, default_value_t = false)]
        gzip: bool,

        /// Directory to write the export into
        #[arg(short, long, default_value = ".")]
        output_dir: String,
    },
    /// Reload status and summary on an interval
    Watch {
        /// Time window, e.g. "24h", "last-week", "all"
        #[arg(short, long, default_value = "last-24-hours")]
        window: WindowSelection,

        /// Seconds between refreshes
        #[arg(short, long, default_value_t = 60)]
        interval: u64,

        /// Number of refresh cycles (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        samples: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/buoy_monitor.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("buoy_monitor.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive(LevelFilter::INFO.into()));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive(LevelFilter::DEBUG.into()));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.log_config();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let source = build_source(&config, cli.demo, clock.clone())?;
    let dashboard = Dashboard::new(source, clock, config.dashboard_options());

    match cli.command {
        Commands::Status => {
            report_status(&dashboard.status().await);
        }
        Commands::Summary {
            window,
            quick,
            bins,
        } => {
            let windows = if quick {
                WindowSelection::QUICK.to_vec()
            } else {
                vec![window]
            };
            for window in windows {
                let loaded = dashboard.load(window).await;
                report_summary(&dashboard, window, &loaded, bins);
            }
        }
        Commands::Export {
            window,
            from,
            to,
            format,
            gzip,
            output_dir,
        } => {
            export(&dashboard, window, from.zip(to), format, gzip, &output_dir).await?;
        }
        Commands::Watch {
            window,
            interval,
            samples,
        } => {
            watch(&dashboard, window, interval, samples).await;
        }
    }

    Ok(())
}

fn build_source(config: &Config, demo: bool, clock: Arc<dyn Clock>) -> Result<Arc<dyn DataSource>> {
    if demo {
        info!("Demo mode: using simulated readings");
        return Ok(Arc::new(SimulatedSource::new(clock)));
    }

    let (rest, key) = config.rest_source_config()?;
    let source = RestSource::connect(rest, &key, config.http_timeout())
        .context("Failed to set up datastore client")?;
    Ok(Arc::new(source))
}

fn report_status(status: &LiveStatus) {
    for notice in &status.notices {
        warn!(%notice, "Status check");
    }

    match &status.latest {
        Some(reading) => {
            let age_minutes = (status.checked_at - reading.timestamp).num_minutes();
            info!(
                status = %status.liveness,
                online = status.online,
                temperature = reading.temperature,
                timestamp = %reading.timestamp,
                age_minutes,
                rssi = ?reading.signal_strength,
                source = ?reading.source_tag.map(|t| t.as_str()),
                "Latest reading"
            );
        }
        None => {
            info!(status = %status.liveness, online = status.online, "No readings yet");
        }
    }
}

fn report_summary(dashboard: &Dashboard, window: WindowSelection, loaded: &Loaded, bins: usize) {
    for notice in &loaded.notices {
        warn!(%notice, "Window loaded with notice");
    }
    if loaded.window.adjusted_to_project_start {
        info!(project_start = %loaded.window.start(), "Window starts at project start");
    }

    info!(
        window = %window,
        bucket = %loaded.plan.bucket,
        points = loaded.series.len(),
        start = %loaded.window.start(),
        end = %loaded.window.upper,
        days_monitoring = dashboard.days_monitoring(),
        "Window loaded"
    );

    let Some(stats) = loaded.summary.stats() else {
        info!("No data available for the selected time range");
        return;
    };

    info!(
        mean = %format!("{:.2}", stats.mean),
        stddev = %format!("{:.2}", stats.stddev),
        min = stats.min.value,
        min_at = %stats.min.timestamp,
        max = stats.max.value,
        max_at = %stats.max.timestamp,
        count = stats.count,
        "Temperature summary"
    );

    let sources = source_breakdown(&loaded.series.readings);
    info!(
        lora = sources.lora,
        manual = sources.manual,
        untagged = sources.untagged,
        "Source breakdown"
    );

    for hour in dashboard.hourly_profile(&loaded.series) {
        info!(
            hour = hour.hour,
            mean = %format!("{:.2}", hour.mean),
            count = hour.count,
            "Hourly average"
        );
    }

    for bin in histogram(&loaded.series.readings, bins) {
        info!(
            lower = %format!("{:.2}", bin.lower),
            upper = %format!("{:.2}", bin.upper),
            count = bin.count,
            "Distribution"
        );
    }
}

/// Loads a window or inclusive date range and writes it to `output_dir`.
#[tracing::instrument(skip(dashboard))]
async fn export(
    dashboard: &Dashboard,
    window: WindowSelection,
    range: Option<(NaiveDate, NaiveDate)>,
    format: ExportFormat,
    compress: bool,
    output_dir: &str,
) -> Result<()> {
    let (loaded, label) = match range {
        Some((from, to)) => {
            let (start, end) = day_bounds(from, to);
            (dashboard.load_custom(start, end).await, range_label(&start, &end))
        }
        None => (dashboard.load(window).await, window.label().to_string()),
    };

    for notice in &loaded.notices {
        warn!(%notice, "Exporting with notice");
    }
    if loaded.series.is_empty() {
        info!("No data available for export");
        return Ok(());
    }

    let mut bytes = format.encode(&loaded.series.readings)?;
    if compress {
        bytes = gzip(&bytes)?;
    }

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir))?;
    let path = Path::new(output_dir).join(file_name(&label, format, compress));
    std::fs::write(&path, &bytes).with_context(|| format!("Failed to write {}", path.display()))?;

    info!(
        path = %path.display(),
        rows = loaded.series.len(),
        bytes = bytes.len(),
        bucket = %loaded.plan.bucket,
        mime = format.mime_type(),
        "Export written"
    );
    Ok(())
}

/// Refreshes status and summary every `interval` seconds.
#[tracing::instrument(skip(dashboard))]
async fn watch(dashboard: &Dashboard, window: WindowSelection, interval: u64, samples: usize) {
    if samples == 0 {
        info!(interval, "Watching indefinitely. Press Ctrl+C to stop.");
    } else {
        info!(samples, interval, "Starting watch");
    }

    let mut count = 0;
    loop {
        if samples > 0 && count >= samples {
            break;
        }
        count += 1;

        report_status(&dashboard.status().await);
        let loaded = dashboard.load(window).await;
        report_summary(dashboard, window, &loaded, DEFAULT_HISTOGRAM_BINS);

        if samples == 0 || count < samples {
            tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;
        }
    }

    info!(cycles = count, "Watch finished");
}
