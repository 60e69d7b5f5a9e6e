//! CLI entry point for the rail GTFS builder.
//!
//! Provides subcommands for scraping raw train snapshots, maintaining the
//! station coordinate table, compiling a GTFS archive, and reporting on
//! coverage.

mod infra;
mod services;

use crate::infra::italo::client::{ItaloClient, TRAIN_URL_TEMPLATE};
use crate::services::schedule_api::ScheduleApi;
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rail_gtfs::{
    build_feed,
    config::{AgencyConfig, BuildConfig},
    coordinates::{CoordinateTable, update_from_raw},
    fetch::{BasicClient, UserAgent, build_slice},
    load_raw_dir,
    normalize::normalize_dir,
    output::{write_archive, write_json},
    reports::{
        routes::report_routes,
        stops::{RUN_UTC_FORMAT, StopReportOptions, report_stops},
    },
    scrape::{Pacing, ScrapeCounts, ScrapeSummary, StoreOptions, store_failure, store_response},
    snapshot::merge_latest,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "rail_gtfs")]
#[command(about = "Build a static GTFS feed from scraped train schedules", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape raw schedules for one slice of train numbers
    Fetch {
        #[arg(long, default_value_t = 0)]
        range_start: u32,

        #[arg(long, default_value_t = 9999)]
        range_end: u32,

        /// How many train numbers per run
        #[arg(long, default_value_t = 500)]
        slice_size: u32,

        /// Which slice to run (wraps around the slice count)
        #[arg(long)]
        slice_index: u64,

        /// Root directory; each run gets a `<run_utc>` subdirectory
        #[arg(short, long, default_value = "out")]
        outdir: PathBuf,

        /// Per-request timeout in seconds
        #[arg(long, default_value_t = 25)]
        timeout: u64,

        #[arg(long, default_value_t = 2)]
        retries: u32,

        /// Do not write responses flagged empty
        #[arg(long, default_value_t = false)]
        skip_empty: bool,

        /// Gzip raw responses on disk
        #[arg(long, default_value_t = false)]
        gzip: bool,

        /// Delay after each request, in milliseconds
        #[arg(long, default_value_t = 150)]
        sleep_ms: u64,

        /// Random extra delay of up to this many milliseconds per request
        #[arg(long, default_value_t = 150)]
        jitter_ms: u64,

        /// Maximum number of concurrent requests
        #[arg(short, long, default_value_t = 2)]
        concurrency: usize,

        /// Endpoint URL, `{train}` is replaced by the train number
        #[arg(long, default_value = TRAIN_URL_TEMPLATE)]
        url_template: String,
    },
    /// Write reconciled per-train schedules as JSON
    Normalize {
        #[arg(long)]
        input_dir: PathBuf,

        #[arg(long)]
        output_dir: PathBuf,
    },
    /// Add newly observed station names to the coordinate table
    UpdateCoordinates {
        /// Directory scanned recursively for raw snapshots
        #[arg(long)]
        input_dir: PathBuf,

        #[arg(long, default_value = "coordinates.csv")]
        coordinates: PathBuf,
    },
    /// Merge every run directory into one holding the newest snapshot per train
    MergeLatest {
        #[arg(long, default_value = "out")]
        root: PathBuf,

        #[arg(long, default_value = "out_latest")]
        out_dir: PathBuf,
    },
    /// Compile a GTFS archive from one directory of raw snapshots
    Build {
        #[arg(long)]
        input_dir: PathBuf,

        /// Service date, YYYYMMDD
        #[arg(long)]
        service_date: String,

        #[arg(long)]
        out_zip: PathBuf,

        #[arg(long, default_value = "coordinates.csv")]
        coordinates: PathBuf,

        /// Calendar window anchor, YYYYMMDD (default: today)
        #[arg(long)]
        run_date: Option<String>,

        /// JSON file with agency metadata
        #[arg(long)]
        agency_config: Option<String>,

        #[arg(long)]
        agency_id: Option<String>,

        #[arg(long)]
        agency_name: Option<String>,

        #[arg(long)]
        agency_url: Option<String>,

        #[arg(long)]
        agency_timezone: Option<String>,

        /// Also write the build summary as JSON
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Compare expected origin/destination pairs with a feed's routes
    ReportRoutes {
        /// CSV with Departure/Arrival (or *_mapped) columns. A spreadsheet
        /// must be exported to CSV first, e.g. `libreoffice --headless
        /// --convert-to csv routes.xlsx`
        #[arg(long)]
        expected: PathBuf,

        #[arg(long)]
        gtfs_zip: PathBuf,

        #[arg(long)]
        out_dir: PathBuf,

        #[arg(long, default_value = "missing_routes")]
        out_prefix: String,
    },
    /// Report coordinate coverage of observed stop names
    ReportStops {
        #[arg(long)]
        raw_dir: PathBuf,

        #[arg(long, default_value = "coordinates.csv")]
        coordinates: PathBuf,

        #[arg(long)]
        out_dir: PathBuf,

        /// Run identifier like 20260220T083254Z (default: now)
        #[arg(long)]
        run_utc: Option<String>,

        #[arg(long)]
        inventory_in: Option<PathBuf>,

        #[arg(long)]
        inventory_out: Option<PathBuf>,

        /// Mark inventory names unseen for this many hours as stale (0 = off)
        #[arg(long, default_value_t = 0)]
        window_hours: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/rail_gtfs.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("rail_gtfs.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch {
            range_start,
            range_end,
            slice_size,
            slice_index,
            outdir,
            timeout,
            retries,
            skip_empty,
            gzip,
            sleep_ms,
            jitter_ms,
            concurrency,
            url_template,
        } => {
            let trains = build_slice(range_start, range_end, slice_size, slice_index)?;
            let http = BasicClient::with_timeout(Duration::from_secs(timeout))?;
            let client = ItaloClient::new(UserAgent::browser(http), retries)
                .with_url_template(url_template);

            let run_utc = Utc::now().format(RUN_UTC_FORMAT).to_string();
            let run_dir = outdir.join(&run_utc);
            std::fs::create_dir_all(&run_dir)?;

            let counts = fetch_slice(
                Arc::new(client),
                &trains,
                &run_dir,
                StoreOptions { gzip, skip_empty },
                concurrency,
                Pacing::new(sleep_ms, jitter_ms),
            )
            .await;

            let summary = ScrapeSummary {
                run_utc,
                range: [range_start, range_end],
                slice_size,
                slice_index,
                counts,
                total_trains_this_run: trains.len(),
            };
            write_json(&run_dir.join("_summary.json"), &summary)?;
            info!(
                run_utc = %summary.run_utc,
                ok = counts.ok,
                empty = counts.empty,
                error = counts.error,
                checked = trains.len(),
                "Scrape run finished"
            );
        }
        Commands::Normalize {
            input_dir,
            output_dir,
        } => {
            let captured_utc = Utc::now().format(RUN_UTC_FORMAT).to_string();
            normalize_dir(&input_dir, &output_dir, &captured_utc)?;
        }
        Commands::UpdateCoordinates {
            input_dir,
            coordinates,
        } => {
            update_from_raw(&input_dir, &coordinates)?;
        }
        Commands::MergeLatest { root, out_dir } => {
            merge_latest(&root, &out_dir)?;
        }
        Commands::Build {
            input_dir,
            service_date,
            out_zip,
            coordinates,
            run_date,
            agency_config,
            agency_id,
            agency_name,
            agency_url,
            agency_timezone,
            summary,
        } => {
            let mut agency = match agency_config {
                Some(path) => AgencyConfig::load(&path)
                    .with_context(|| format!("loading agency config {path}"))?,
                None => AgencyConfig::default(),
            };
            if let Some(v) = agency_id {
                agency.agency_id = v;
            }
            if let Some(v) = agency_name {
                agency.agency_name = v;
            }
            if let Some(v) = agency_url {
                agency.agency_url = v;
            }
            if let Some(v) = agency_timezone {
                agency.agency_timezone = v;
            }

            let config = BuildConfig::new(&service_date, run_date.as_deref(), agency)?;
            let batch = load_raw_dir(&input_dir)?;
            let coords = CoordinateTable::load(&coordinates)?;
            let feed = build_feed(&batch, &coords, &config)?;

            write_archive(&out_zip, &feed)?;
            feed.summary.log();
            if let Some(path) = summary {
                write_json(&path, &feed.summary)?;
            }
        }
        Commands::ReportRoutes {
            expected,
            gtfs_zip,
            out_dir,
            out_prefix,
        } => {
            report_routes(&expected, &gtfs_zip, &out_dir, &out_prefix)?;
        }
        Commands::ReportStops {
            raw_dir,
            coordinates,
            out_dir,
            run_utc,
            inventory_in,
            inventory_out,
            window_hours,
        } => {
            let coords = CoordinateTable::load(&coordinates)?;
            let options = StopReportOptions {
                run_utc: run_utc
                    .unwrap_or_else(|| Utc::now().format(RUN_UTC_FORMAT).to_string()),
                inventory_in,
                inventory_out,
                window_hours: (window_hours > 0).then_some(window_hours),
            };
            report_stops(&raw_dir, &coords, &out_dir, &options)?;
        }
    }

    Ok(())
}

/// Requests every train of the slice concurrently, storing each response
/// (or failure marker) in `run_dir` as it arrives.
#[tracing::instrument(skip_all, fields(run_dir = %run_dir.display(), trains = trains.len(), concurrency))]
async fn fetch_slice<A: ScheduleApi + 'static>(
    api: Arc<A>,
    trains: &[u32],
    run_dir: &Path,
    options: StoreOptions,
    concurrency: usize,
    pacing: Pacing,
) -> ScrapeCounts {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(concurrency.max(1)));
    let mut tasks = vec![];

    for n in trains {
        let sem = semaphore.clone();
        let api = api.clone();
        let run_dir = run_dir.to_path_buf();
        let train = n.to_string();

        let train_span = tracing::info_span!("fetch_train", train = %train);

        let task = tokio::spawn(
            async move {
                let _permit = sem.acquire().await?;

                let outcome = match api.fetch_train(&train).await {
                    Ok(body) => store_response(&run_dir, &train, &body, options)?,
                    Err(e) => {
                        warn!(error = %e, "Train fetch failed");
                        store_failure(&run_dir, &train, &format!("{e:#}"))?
                    }
                };

                tokio::time::sleep(pacing.pause()).await;
                anyhow::Ok(outcome)
            }
            .instrument(train_span),
        );

        tasks.push(task);
    }

    let mut counts = ScrapeCounts::default();
    for task in tasks {
        match task.await {
            Ok(Ok(outcome)) => counts.record(outcome),
            Ok(Err(e)) => {
                error!(error = %e, "Failed to store train response");
                counts.error += 1;
            }
            Err(e) => {
                error!(error = %e, "Fetch task panicked");
                counts.error += 1;
            }
        }
    }
    counts
}
