//! CLI argument definitions.

use super::validators::{
    parse_count, parse_date, parse_duration, parse_end_date, parse_positive_float,
};
use crate::config::FirmsSensor;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Wildfire monitoring: tiled satellite imagery acquisition and classification.
#[derive(Debug, Parser)]
#[command(name = "firewatch")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every subcommand.
    #[command(flatten)]
    pub global: GlobalArgs,
}

/// Options shared by every subcommand.
#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Configuration file (default: platform config directory).
    #[arg(long, global = true, env = "FIREWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory holding the grid and runs (overrides config).
    #[arg(long, global = true, env = "FIREWATCH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Territory boundary GeoJSON (overrides config).
    #[arg(long, global = true, env = "FIREWATCH_BOUNDARY")]
    pub boundary: Option<PathBuf>,

    /// Take over run locks older than this duration (e.g. 1h, 30m).
    ///
    /// Locks whose holder process has exited on this host are always taken over.
    #[arg(long, global = true, value_parser = parse_duration, env = "FIREWATCH_STALE_LOCK_TIMEOUT")]
    pub stale_lock_timeout: Option<Duration>,

    /// Suppress progress output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable progress bars.
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Increase verbosity (-v: debug, -vv: trace, -vvv: trace including ONNX Runtime).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the full pipeline: grid, fetch, infer, aggregate.
    Run(RunArgs),
    /// Build or reload the tile grid.
    Grid {
        /// Rebuild even if a saved grid exists.
        #[arg(long)]
        regenerate: bool,

        /// Grid overrides.
        #[command(flatten)]
        grid: GridArgs,
    },
    /// Fetch imagery for a run (resumable).
    Fetch {
        /// Run to fetch into; created if missing.
        #[arg(long, env = "FIREWATCH_RUN_ID")]
        run_id: String,

        /// Grid overrides.
        #[command(flatten)]
        grid: GridArgs,

        /// Fetch overrides.
        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Classify an image directory and extract positives.
    Infer {
        /// Directory of images to classify.
        images_dir: PathBuf,

        /// Output directory for logs and positive copies (default: parent of the image directory).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Inference overrides.
        #[command(flatten)]
        inference: InferenceArgs,
    },
    /// Classify imagery around NASA FIRMS hotspot alerts.
    Alerts(AlertsArgs),
    /// Rebuild the positive-class log and copies for a run.
    Aggregate(AggregateArgs),
    /// Copy a run to or from object storage.
    Sync(SyncArgs),
    /// Manage configuration.
    Config {
        /// Configuration action to perform.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Arguments for `run`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Resume this run instead of starting a new one.
    #[arg(long, env = "FIREWATCH_RUN_ID")]
    pub run_id: Option<String>,

    /// Upload the run directory to object storage when done.
    #[arg(long)]
    pub upload: bool,

    /// Grid overrides.
    #[command(flatten)]
    pub grid: GridArgs,

    /// Fetch overrides.
    #[command(flatten)]
    pub fetch: FetchArgs,

    /// Inference overrides.
    #[command(flatten)]
    pub inference: InferenceArgs,
}

/// Arguments for `alerts`.
#[derive(Debug, Args)]
pub struct AlertsArgs {
    /// Resume this run instead of starting a new one.
    #[arg(long, env = "FIREWATCH_RUN_ID")]
    pub run_id: Option<String>,

    /// Alert day, YYYY-MM-DD; repeat for several (default: yesterday and today, UTC).
    #[arg(long = "date", value_parser = parse_date)]
    pub dates: Vec<NaiveDate>,

    /// Detection product: modis, noaa20, noaa21 or suomi.
    #[arg(long, env = "FIREWATCH_FIRMS_SENSOR")]
    pub sensor: Option<FirmsSensor>,

    /// Search window either side of each alert, in hours.
    #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
    pub window_hours: Option<i64>,

    /// Concurrent fetch tasks.
    #[arg(long, value_parser = parse_count, env = "FIREWATCH_FETCH_WORKERS")]
    pub fetch_workers: Option<usize>,

    /// Upload the run directory to object storage when done.
    #[arg(long)]
    pub upload: bool,

    /// Inference overrides.
    #[command(flatten)]
    pub inference: InferenceArgs,
}

/// Grid overrides.
#[derive(Debug, Default, Args)]
pub struct GridArgs {
    /// Cell edge length in kilometres.
    #[arg(long, value_parser = parse_positive_float, env = "FIREWATCH_CELL_SIZE_KM")]
    pub cell_size_km: Option<f64>,

    /// Concurrent intersection tests.
    #[arg(long, value_parser = parse_count, env = "FIREWATCH_GRID_WORKERS")]
    pub grid_workers: Option<usize>,
}

/// Fetch overrides.
#[derive(Debug, Default, Args)]
pub struct FetchArgs {
    /// Concurrent fetch tasks.
    #[arg(long, value_parser = parse_count, env = "FIREWATCH_FETCH_WORKERS")]
    pub fetch_workers: Option<usize>,

    /// Acquisition window length in days.
    #[arg(long, value_parser = clap::value_parser!(i64).range(1..), env = "FIREWATCH_WINDOW_DAYS")]
    pub window_days: Option<i64>,

    /// Last day of the acquisition window, YYYY-MM-DD (default: now).
    #[arg(long, value_parser = parse_end_date, env = "FIREWATCH_END_DATE")]
    pub end_date: Option<DateTime<Utc>>,
}

/// Inference overrides.
#[derive(Debug, Default, Args)]
pub struct InferenceArgs {
    /// ONNX model file.
    #[arg(long, env = "FIREWATCH_MODEL")]
    pub model: Option<PathBuf>,

    /// Labels file, one class per line.
    #[arg(long, env = "FIREWATCH_LABELS")]
    pub labels: Option<PathBuf>,

    /// Inference batch size (default: 8 on CPU, 32 on GPU).
    #[arg(short, long, value_parser = parse_count, env = "FIREWATCH_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Label treated as the positive class.
    #[arg(long, env = "FIREWATCH_POSITIVE_LABEL")]
    pub positive_label: Option<String>,

    /// Request CUDA acceleration.
    #[arg(long, conflicts_with = "cpu")]
    pub gpu: bool,

    /// Force CPU inference.
    #[arg(long, conflicts_with = "gpu")]
    pub cpu: bool,
}

/// Arguments for `aggregate`.
#[derive(Debug, Args)]
pub struct AggregateArgs {
    /// Run to aggregate.
    #[arg(long, env = "FIREWATCH_RUN_ID")]
    pub run_id: String,

    /// Label treated as the positive class.
    #[arg(long, env = "FIREWATCH_POSITIVE_LABEL")]
    pub positive_label: Option<String>,
}

/// Arguments for `sync`.
#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Direction of the copy.
    #[command(subcommand)]
    pub action: SyncAction,

    /// Remote bucket prefix (overrides config).
    #[arg(long, global = true, env = "FIREWATCH_BUCKET")]
    pub bucket: Option<String>,
}

/// Sync directions.
#[derive(Debug, Subcommand)]
pub enum SyncAction {
    /// Upload a local run.
    Push {
        /// Run to upload.
        run_id: String,
    },
    /// Download a remote run.
    Pull {
        /// Run to download.
        run_id: String,
    },
}

/// Config subcommand actions.
#[derive(Debug, Clone, Copy, Subcommand)]
pub enum ConfigAction {
    /// Create default configuration file.
    Init,
    /// Display current configuration.
    Show,
    /// Print configuration file path.
    Path,
}
