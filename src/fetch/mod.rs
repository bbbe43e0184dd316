//! Fetch stage: one representative image per tile.

mod provider;
mod stac;

pub use provider::{DateWindow, ImageAsset, ImageryProvider, RenderRequest};
pub use stac::{StacImageryProvider, StacSettings};

use crate::checkpoint::CheckpointStore;
use crate::constants::columns;
use crate::error::{Error, Result};
use crate::geo::Tile;
use crate::output::{CsvAppendLog, FetchRecord, progress};
use crate::pipeline::{TaskOutcome, WorkerPool};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Fetch stage parameters.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Concurrent fetch tasks.
    pub workers: usize,
    /// Acquisition window.
    pub window: DateWindow,
    /// Bands mapped to red, green and blue.
    pub bands: Vec<String>,
    /// Rendered edge length in pixels.
    pub dimensions: u32,
    /// Band rescale range.
    pub rescale: (f64, f64),
}

/// Result of a single tile task.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Image written and recorded.
    Fetched(FetchRecord),
    /// Provider had no image for the tile in the window.
    NoImage,
    /// Search, download or persistence failed; nothing recorded.
    Failed(String),
}

/// Summary of a fetch stage run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    /// Tiles given to the stage.
    pub tiles: usize,
    /// Tiles already in the checkpoint.
    pub skipped: usize,
    /// Tiles fetched in this run.
    pub fetched: usize,
    /// Tiles with no qualifying image.
    pub no_image: usize,
    /// Tiles whose task failed.
    pub failed: usize,
}

/// Paths the fetch stage writes to.
#[derive(Debug, Clone)]
pub struct FetchTarget {
    /// Directory receiving image files.
    pub images_dir: PathBuf,
    /// Fetch metadata log.
    pub metadata_log: PathBuf,
}

/// One tile paired with the acquisition window to search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchJob {
    /// Tile to fetch.
    pub tile: Tile,
    /// Acceptable acquisition times.
    pub window: DateWindow,
}

impl FetchJob {
    /// Jobs sharing one window, in tile order.
    pub fn in_window(tiles: &[Tile], window: DateWindow) -> Vec<Self> {
        tiles.iter().map(|&tile| Self { tile, window }).collect()
    }
}

/// Concurrent tile fetcher.
pub struct FetchStage<P> {
    provider: Arc<P>,
    settings: FetchSettings,
}

struct TaskContext<P> {
    provider: Arc<P>,
    settings: FetchSettings,
    images_dir: PathBuf,
    log: Arc<Mutex<CsvAppendLog>>,
}

impl<P> FetchStage<P>
where
    P: ImageryProvider + 'static,
{
    /// Create a fetch stage over a provider.
    pub fn new(provider: Arc<P>, settings: FetchSettings) -> Self {
        Self { provider, settings }
    }

    /// Fetch every tile not yet present in the metadata log, searching the
    /// configured window.
    pub async fn run(
        &self,
        tiles: &[Tile],
        target: &FetchTarget,
        progress_enabled: bool,
    ) -> Result<FetchStats> {
        self.run_jobs(
            FetchJob::in_window(tiles, self.settings.window),
            target,
            progress_enabled,
        )
        .await
    }

    /// Fetch every job whose image is not yet present in the metadata log.
    ///
    /// Returns once every scheduled task has resolved. Per-tile failures are
    /// logged and counted; only setup failures are returned as errors.
    pub async fn run_jobs(
        &self,
        jobs: Vec<FetchJob>,
        target: &FetchTarget,
        progress_enabled: bool,
    ) -> Result<FetchStats> {
        std::fs::create_dir_all(&target.images_dir).map_err(|e| Error::OutputDirCreateFailed {
            path: target.images_dir.clone(),
            source: e,
        })?;

        // Opening repairs a torn tail before the checkpoint snapshot is taken.
        let log = CsvAppendLog::open(&target.metadata_log, &FetchRecord::header())?;
        let checkpoint = CheckpointStore::load(&target.metadata_log, columns::IMAGE_NAME)?;
        let total = jobs.len();
        let pending = checkpoint.pending(jobs, |job| job.tile.image_name());

        let mut stats = FetchStats {
            tiles: total,
            skipped: total - pending.len(),
            ..FetchStats::default()
        };

        info!(
            "Fetching {} tile(s), {} already fetched ({} concurrent)",
            pending.len(),
            stats.skipped,
            self.settings.workers
        );

        let ctx = Arc::new(TaskContext {
            provider: Arc::clone(&self.provider),
            settings: self.settings.clone(),
            images_dir: target.images_dir.clone(),
            log: Arc::new(Mutex::new(log)),
        });

        let pb = progress::create_stage_progress(pending.len(), "tiles", progress_enabled);
        let outcomes = WorkerPool::new(self.settings.workers)
            .drain(
                pending,
                move |job| fetch_tile(Arc::clone(&ctx), job),
                pb.as_ref(),
            )
            .await;
        progress::finish_progress(pb, "Fetch complete");

        for outcome in outcomes {
            match outcome {
                TaskOutcome::Completed(FetchOutcome::Fetched(_)) => stats.fetched += 1,
                TaskOutcome::Completed(FetchOutcome::NoImage) => stats.no_image += 1,
                TaskOutcome::Completed(FetchOutcome::Failed(_)) | TaskOutcome::Panicked => {
                    stats.failed += 1;
                }
            }
        }

        info!(
            "Fetch stage: {} fetched, {} without imagery, {} failed, {} skipped",
            stats.fetched, stats.no_image, stats.failed, stats.skipped
        );
        Ok(stats)
    }
}

async fn fetch_tile<P: ImageryProvider>(ctx: Arc<TaskContext<P>>, job: FetchJob) -> FetchOutcome {
    let FetchJob { tile, window } = job;
    let name = tile.image_name();

    let assets = match ctx.provider.search(&tile.bounds, &window).await {
        Ok(assets) => assets,
        Err(e) => {
            warn!("[Tile {}] search failed: {e}", tile.index);
            return FetchOutcome::Failed(e.to_string());
        }
    };

    // Providers may return scenes just outside the requested interval.
    let Some(asset) = assets.into_iter().find(|a| window.contains(&a.acquired)) else {
        info!("[Tile {}] no images in window", tile.index);
        return FetchOutcome::NoImage;
    };
    debug!("[Tile {}] using {} ({})", tile.index, asset.id, asset.acquired);

    let request = RenderRequest {
        bounds: tile.bounds,
        bands: ctx.settings.bands.clone(),
        dimensions: ctx.settings.dimensions,
        rescale: ctx.settings.rescale,
    };

    let bytes = match ctx.provider.render(&asset, &request).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("[Tile {}] download failed: {e}", tile.index);
            return FetchOutcome::Failed(e.to_string());
        }
    };

    let path = ctx.images_dir.join(&name);
    if let Err(e) = write_image(&path, &bytes).await {
        warn!("[Tile {}] could not write {}: {e}", tile.index, path.display());
        return FetchOutcome::Failed(e.to_string());
    }

    let record = FetchRecord::new(name, tile.bounds, asset.acquired);
    if let Err(e) = append_record(Arc::clone(&ctx.log), record.clone()).await {
        warn!("[Tile {}] could not record fetch: {e}", tile.index);
        // An image without a record would still be classified.
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!("[Tile {}] could not remove {}: {e}", tile.index, path.display());
        }
        return FetchOutcome::Failed(e.to_string());
    }

    FetchOutcome::Fetched(record)
}

/// Write via a temporary file so a crash never leaves a truncated image.
async fn write_image(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("png.part");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Append and fsync on the blocking pool.
async fn append_record(log: Arc<Mutex<CsvAppendLog>>, record: FetchRecord) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        let mut log = log.lock().map_err(|_| Error::Internal {
            message: "metadata log lock poisoned".to_string(),
        })?;
        log.append(&record)?;
        log.sync()
    })
    .await
    .map_err(|e| Error::Internal {
        message: format!("metadata append task failed: {e}"),
    })?
}
