//! Firewatch - tiled satellite imagery acquisition and wildfire classification.
//!
//! The pipeline partitions a territory into square tiles, fetches one recent
//! image per tile, classifies the images in batches and extracts the
//! positive-class subset. Every stage is resumable from its output log.

#![warn(missing_docs)]

pub mod aggregate;
pub mod alerts;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod fetch;
pub mod geo;
pub mod grid;
pub mod inference;
pub mod locking;
pub mod output;
pub mod pipeline;
pub mod storage;

use aggregate::ResultAggregator;
use alerts::{AlertSettings, FirmsArchive, FirmsSettings};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Parser;
use cli::{
    AggregateArgs, AlertsArgs, Cli, Command, ConfigAction, FetchArgs, GlobalArgs, GridArgs,
    InferenceArgs, RunArgs, SyncAction, SyncArgs,
};
use config::{
    Config, InferenceDevice, config_file_path, load_config_file, load_default_config,
    require_boundary, require_model, save_config, validate_config,
};
use fetch::{DateWindow, FetchSettings, StacImageryProvider, StacSettings};
use geo::PolygonBoundary;
use inference::{BatchInferenceEngine, OnnxClassifier};
use locking::RunLock;
use pipeline::{GridSettings, PipelineDriver, RunLayout, grid_path, output_dir_for};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use storage::{CommandObjectStore, ObjectStore, remote_run_path, remote_runs_path};
use tracing::{info, warn};

pub use error::{Error, Result};

/// Main entry point for the firewatch CLI.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.global.verbose, cli.global.quiet);

    // Install Ctrl+C handler to clean up lock files on interrupt
    if let Err(e) = ctrlc::set_handler(|| {
        locking::cleanup_all_locks();
        std::process::exit(130); // 128 + SIGINT(2)
    }) {
        warn!("Failed to install Ctrl+C handler: {e}");
    }

    let runtime = tokio::runtime::Runtime::new().map_err(|e| Error::Internal {
        message: format!("failed to start async runtime: {e}"),
    })?;

    runtime.block_on(handle_command(cli.command, &cli.global))
}

fn init_logging(verbose: u8, quiet: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    // ORT logging is suppressed by default because CUDA fallback is expected in auto mode.
    let filter_str = if quiet {
        "warn,ort=off".to_string()
    } else {
        match verbose {
            0 => "info,ort=off".to_string(),
            1 => "debug,ort=warn".to_string(),
            2 => "trace,ort=info".to_string(),
            _ => "trace".to_string(),
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    fmt().with_env_filter(filter).init();
}

fn load_config(global: &GlobalArgs) -> Result<Config> {
    match &global.config {
        Some(path) => load_config_file(path),
        None => load_default_config(),
    }
}

fn config_path(global: &GlobalArgs) -> Result<PathBuf> {
    global.config.clone().map_or_else(config_file_path, Ok)
}

fn apply_global_args(config: &mut Config, global: &GlobalArgs) {
    if let Some(dir) = &global.data_dir {
        config.paths.data_dir.clone_from(dir);
    }
    if let Some(boundary) = &global.boundary {
        config.paths.boundary = Some(boundary.clone());
    }
}

fn apply_grid_args(config: &mut Config, args: &GridArgs) {
    if let Some(km) = args.cell_size_km {
        config.grid.cell_size_km = km;
    }
    if let Some(workers) = args.grid_workers {
        config.grid.workers = workers;
    }
}

fn apply_fetch_args(config: &mut Config, args: &FetchArgs) {
    if let Some(workers) = args.fetch_workers {
        config.fetch.workers = workers;
    }
    if let Some(days) = args.window_days {
        config.fetch.window_days = days;
    }
}

fn apply_inference_args(config: &mut Config, args: &InferenceArgs) {
    if let Some(model) = &args.model {
        config.inference.model = Some(model.clone());
    }
    if let Some(labels) = &args.labels {
        config.inference.labels = Some(labels.clone());
    }
    if args.batch_size.is_some() {
        config.inference.batch_size = args.batch_size;
    }
    if let Some(label) = &args.positive_label {
        config.inference.positive_label.clone_from(label);
    }
    if args.gpu {
        config.inference.device = InferenceDevice::Gpu;
    } else if args.cpu {
        config.inference.device = InferenceDevice::Cpu;
    }
}

fn load_boundary(config: &Config) -> Result<Arc<PolygonBoundary>> {
    let path = require_boundary(config)?;
    let margin_deg = grid::km_to_degrees(config.grid.error_margin_m / 1000.0);
    Ok(Arc::new(PolygonBoundary::from_geojson_file(path, margin_deg)?))
}

fn grid_settings(config: &Config) -> GridSettings {
    GridSettings {
        cell_size_deg: grid::km_to_degrees(config.grid.cell_size_km),
        workers: config.grid.workers,
    }
}

fn fetch_settings(config: &Config, end_date: Option<DateTime<Utc>>) -> FetchSettings {
    let end = end_date.unwrap_or_else(Utc::now);
    FetchSettings {
        workers: config.fetch.workers,
        window: DateWindow::ending_at(end, config.fetch.window_days),
        bands: config.fetch.bands.clone(),
        dimensions: config.fetch.dimensions,
        rescale: (config.fetch.rescale_min, config.fetch.rescale_max),
    }
}

fn token_from_env(var: Option<&str>, what: &str) -> Option<String> {
    var.and_then(|var| {
        let value = std::env::var(var).ok();
        if value.is_none() {
            warn!("Environment variable {var} is not set; requesting {what} without a token");
        }
        value
    })
}

fn build_provider(config: &Config) -> Result<Arc<StacImageryProvider>> {
    let fetch = &config.fetch;
    let token = token_from_env(fetch.api_key_env.as_deref(), "imagery");

    Ok(Arc::new(StacImageryProvider::new(StacSettings {
        search_url: fetch.search_url.clone(),
        render_url: fetch.render_url.clone(),
        collection: fetch.collection.clone(),
        token,
        timeout: Duration::from_secs(fetch.timeout_secs),
        connect_timeout: Duration::from_secs(fetch.connect_timeout_secs),
    })?))
}

fn build_alert_source(config: &Config) -> Result<Arc<FirmsArchive>> {
    let alerts = &config.alerts;
    Ok(Arc::new(FirmsArchive::new(FirmsSettings {
        archive_url: alerts.archive_url.clone(),
        region: alerts.region.clone(),
        sensor: alerts.sensor,
        token: token_from_env(alerts.token_env.as_deref(), "alerts"),
        timeout: Duration::from_secs(config.fetch.timeout_secs),
        connect_timeout: Duration::from_secs(config.fetch.connect_timeout_secs),
    })?))
}

/// Alert days to download: the explicit list, else yesterday and today.
fn alert_dates(explicit: Vec<NaiveDate>, now: DateTime<Utc>) -> Vec<NaiveDate> {
    if !explicit.is_empty() {
        return explicit;
    }
    let today = now.date_naive();
    today.pred_opt().into_iter().chain([today]).collect()
}

fn build_engine(config: &Config) -> Result<BatchInferenceEngine<OnnxClassifier>> {
    let inference = &config.inference;
    let (model, labels) = require_model(inference)?;
    let classifier = OnnxClassifier::load(&model, &labels, inference.image_size, inference.device)?;
    let batch_size = classifier.batch_size(inference.batch_size);
    info!("Inference batch size: {batch_size}");
    Ok(BatchInferenceEngine::new(
        classifier,
        batch_size,
        inference.mean,
        inference.std,
    ))
}

fn build_driver(
    config: &Config,
    boundary: Arc<PolygonBoundary>,
    end_date: Option<DateTime<Utc>>,
    progress: bool,
    stale_lock_timeout: Option<Duration>,
) -> Result<PipelineDriver<PolygonBoundary, StacImageryProvider>> {
    Ok(PipelineDriver::new(
        boundary,
        build_provider(config)?,
        grid_settings(config),
        fetch_settings(config, end_date),
        config.inference.positive_label.clone(),
    )
    .with_progress(progress)
    .with_stale_lock_timeout(stale_lock_timeout))
}

fn storage_bucket(config: &Config, explicit: Option<String>) -> Result<String> {
    explicit
        .or_else(|| config.storage.bucket.clone())
        .ok_or(Error::StorageNotConfigured)
}

/// Copy a finished run to `<bucket>/runs/<run_id>`. The caller must not hold
/// the run lock, or it would be copied along.
async fn upload_run(config: &Config, bucket: &str, run_dir: &Path) -> Result<()> {
    CommandObjectStore::new(&config.storage.command)
        .upload(run_dir, &remote_runs_path(bucket))
        .await
}

/// Options every handler needs besides its own arguments.
#[derive(Debug, Clone, Copy)]
struct RunOptions {
    progress: bool,
    stale_lock_timeout: Option<Duration>,
}

async fn handle_command(command: Command, global: &GlobalArgs) -> Result<()> {
    let opts = RunOptions {
        progress: !(global.quiet || global.no_progress),
        stale_lock_timeout: global.stale_lock_timeout,
    };

    match command {
        Command::Config { action } => handle_config_command(action, global),
        Command::Run(args) => handle_run(args, resolve_config(global)?, opts).await,
        Command::Grid { regenerate, grid } => {
            handle_grid(regenerate, &grid, resolve_config(global)?, opts.progress).await
        }
        Command::Fetch { run_id, grid, fetch } => {
            handle_fetch(&run_id, &grid, &fetch, resolve_config(global)?, opts).await
        }
        Command::Infer {
            images_dir,
            output,
            inference,
        } => {
            let output_dir = output_dir_for(&images_dir, output.as_deref());
            handle_infer(
                RunLayout::for_images(&images_dir, &output_dir),
                &inference,
                resolve_config(global)?,
                opts,
            )
            .await
        }
        Command::Alerts(args) => handle_alerts(args, resolve_config(global)?, opts).await,
        Command::Aggregate(args) => handle_aggregate(args, resolve_config(global)?, opts),
        Command::Sync(args) => handle_sync(args, &resolve_config(global)?, opts).await,
    }
}

fn resolve_config(global: &GlobalArgs) -> Result<Config> {
    let mut config = load_config(global)?;
    apply_global_args(&mut config, global);
    Ok(config)
}

async fn handle_run(args: RunArgs, mut config: Config, opts: RunOptions) -> Result<()> {
    apply_grid_args(&mut config, &args.grid);
    apply_fetch_args(&mut config, &args.fetch);
    apply_inference_args(&mut config, &args.inference);
    validate_config(&config)?;

    let bucket = if args.upload {
        Some(storage_bucket(&config, None)?)
    } else {
        None
    };

    let boundary = load_boundary(&config)?;
    // Load the model before any stage runs so a bad model fails fast.
    let engine = build_engine(&config)?;
    let driver = build_driver(
        &config,
        boundary,
        args.fetch.end_date,
        opts.progress,
        opts.stale_lock_timeout,
    )?;

    let layout = RunLayout::create(&config.paths.data_dir, args.run_id.as_deref())?;
    let summary = driver
        .run(&grid_path(&config.paths.data_dir), &layout, engine)
        .await?;

    if let Some(bucket) = bucket {
        upload_run(&config, &bucket, layout.run_dir()).await?;
    }

    println!(
        "Run {}: {} positive tile(s) in {}",
        summary.run_id,
        summary.aggregate.positives,
        layout.fire_dir().display()
    );
    Ok(())
}

async fn handle_grid(
    regenerate: bool,
    args: &GridArgs,
    mut config: Config,
    progress: bool,
) -> Result<()> {
    apply_grid_args(&mut config, args);
    validate_config(&config)?;

    let boundary = load_boundary(&config)?;
    let path = grid_path(&config.paths.data_dir);
    let tiles =
        pipeline::prepare_grid(boundary, grid_settings(&config), &path, regenerate, progress).await?;
    println!("{} tile(s) in {}", tiles.len(), path.display());
    Ok(())
}

async fn handle_fetch(
    run_id: &str,
    grid: &GridArgs,
    fetch: &FetchArgs,
    mut config: Config,
    opts: RunOptions,
) -> Result<()> {
    apply_grid_args(&mut config, grid);
    apply_fetch_args(&mut config, fetch);
    validate_config(&config)?;

    let boundary = load_boundary(&config)?;
    let driver = build_driver(
        &config,
        boundary,
        fetch.end_date,
        opts.progress,
        opts.stale_lock_timeout,
    )?;
    let layout = RunLayout::create(&config.paths.data_dir, Some(run_id))?;
    let _lock = driver.lock(&layout)?;

    let tiles = driver.grid(&grid_path(&config.paths.data_dir), false).await?;
    let stats = driver.fetch(&tiles, &layout).await?;
    println!(
        "Fetched {} new image(s), {} already present, {} without imagery, {} failed",
        stats.fetched, stats.skipped, stats.no_image, stats.failed
    );
    Ok(())
}

async fn handle_infer(
    layout: RunLayout,
    args: &InferenceArgs,
    mut config: Config,
    opts: RunOptions,
) -> Result<()> {
    apply_inference_args(&mut config, args);
    validate_config(&config)?;

    let engine = build_engine(&config)?;
    std::fs::create_dir_all(layout.run_dir()).map_err(|e| Error::OutputDirCreateFailed {
        path: layout.run_dir().to_path_buf(),
        source: e,
    })?;
    let _lock = RunLock::acquire_or_reclaim(layout.run_dir(), opts.stale_lock_timeout)?;

    let stats = pipeline::infer(engine, &layout, opts.progress).await?;
    let aggregate = ResultAggregator::new(config.inference.positive_label.clone())
        .run(&layout.aggregate_target())?;
    println!(
        "Classified {} image(s) ({} already done, {} unreadable), {} positive",
        stats.classified, stats.skipped, stats.decode_failed, aggregate.positives
    );
    Ok(())
}

async fn handle_alerts(args: AlertsArgs, mut config: Config, opts: RunOptions) -> Result<()> {
    if let Some(sensor) = args.sensor {
        config.alerts.sensor = sensor;
    }
    if let Some(hours) = args.window_hours {
        config.alerts.window_hours = hours;
    }
    if let Some(workers) = args.fetch_workers {
        config.fetch.workers = workers;
    }
    apply_inference_args(&mut config, &args.inference);
    validate_config(&config)?;

    let bucket = if args.upload {
        Some(storage_bucket(&config, None)?)
    } else {
        None
    };

    let boundary = load_boundary(&config)?;
    let engine = build_engine(&config)?;
    let driver = build_driver(&config, boundary, None, opts.progress, opts.stale_lock_timeout)?;
    let settings = AlertSettings {
        dates: alert_dates(args.dates, Utc::now()),
        buffer_deg: grid::km_to_degrees(config.alerts.buffer_m / 1000.0),
        window_hours: config.alerts.window_hours,
        download_workers: config.alerts.download_workers,
    };

    let layout = RunLayout::create(&config.paths.data_dir, args.run_id.as_deref())?;
    let summary = driver
        .run_alerts(build_alert_source(&config)?, &settings, &layout, engine)
        .await?;

    if let Some(bucket) = bucket {
        upload_run(&config, &bucket, layout.run_dir()).await?;
    }

    println!(
        "Alert run {}: {} positive of {} alert tile(s) in {}",
        summary.run_id,
        summary.aggregate.positives,
        summary.tiles,
        layout.fire_dir().display()
    );
    Ok(())
}

fn handle_aggregate(args: AggregateArgs, mut config: Config, opts: RunOptions) -> Result<()> {
    if let Some(label) = args.positive_label {
        config.inference.positive_label = label;
    }
    validate_config(&config)?;

    let layout = RunLayout::open(&config.paths.data_dir, &args.run_id)?;
    let _lock = RunLock::acquire_or_reclaim(layout.run_dir(), opts.stale_lock_timeout)?;
    let stats = ResultAggregator::new(config.inference.positive_label.clone())
        .run(&layout.aggregate_target())?;
    println!(
        "{} of {} prediction(s) positive, {} copied to {}",
        stats.positives,
        stats.predictions,
        stats.copied,
        layout.fire_dir().display()
    );
    Ok(())
}

async fn handle_sync(args: SyncArgs, config: &Config, opts: RunOptions) -> Result<()> {
    let bucket = storage_bucket(config, args.bucket)?;
    let store = CommandObjectStore::new(&config.storage.command);

    match args.action {
        SyncAction::Push { run_id } => {
            let layout = RunLayout::open(&config.paths.data_dir, &run_id)?;
            // Refuse to copy a run that is being written; never copy a lock.
            RunLock::clear_stale(layout.run_dir(), opts.stale_lock_timeout)?;
            upload_run(config, &bucket, layout.run_dir()).await
        }
        SyncAction::Pull { run_id } => {
            let runs_dir = config.paths.data_dir.join(constants::layout::RUNS_DIR);
            let run_dir = runs_dir.join(&run_id);
            if run_dir.is_dir() {
                RunLock::clear_stale(&run_dir, opts.stale_lock_timeout)?;
            }
            std::fs::create_dir_all(&runs_dir).map_err(|e| Error::OutputDirCreateFailed {
                path: runs_dir.clone(),
                source: e,
            })?;
            store
                .download(&remote_run_path(&bucket, &run_id), &runs_dir)
                .await?;

            // A lock copied from the bucket belongs to no local process.
            if RunLock::is_locked(&run_dir) {
                warn!("Removing lock file pulled with run {run_id}");
                RunLock::remove_stale(&run_dir)?;
            }
            Ok(())
        }
    }
}

fn handle_config_command(action: ConfigAction, global: &GlobalArgs) -> Result<()> {
    match action {
        ConfigAction::Init => {
            let path = config_path(global)?;
            if path.exists() {
                println!("Configuration file already exists: {}", path.display());
            } else {
                save_config(&Config::default(), &path)?;
                println!("Created configuration file: {}", path.display());
                println!("\nNext steps:");
                println!("  set paths.boundary, inference.model and inference.labels, then run 'firewatch run'");
            }
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(global)?;
            println!("{config:#?}");
            Ok(())
        }
        ConfigAction::Path => {
            let path = config_path(global)?;
            println!("{}", path.display());
            Ok(())
        }
    }
}
