//! Stage sequencing for a pipeline run.

use super::coordinator::RunLayout;
use crate::aggregate::{AggregateStats, ResultAggregator};
use crate::alerts::{
    AlertSettings, AlertSource, alert_jobs, collect_alerts, load_alerts, save_alerts, select_alerts,
};
use crate::error::{Error, Result};
use crate::fetch::{FetchJob, FetchSettings, FetchStage, FetchStats, ImageryProvider};
use crate::geo::{BoundaryService, Tile};
use crate::grid::{GridFile, GridPartitioner, load_grid, save_grid};
use crate::inference::{BatchInferenceEngine, ImageClassifier, InferenceStats};
use crate::locking::RunLock;
use crate::output::progress;
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Grid generation parameters.
#[derive(Debug, Clone, Copy)]
pub struct GridSettings {
    /// Cell size in degrees.
    pub cell_size_deg: f64,
    /// Concurrent intersection tests.
    pub workers: usize,
}

/// Outcome of a full run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Run identifier.
    pub run_id: String,
    /// Tiles scheduled for fetching.
    pub tiles: usize,
    /// Fetch stage summary.
    pub fetch: FetchStats,
    /// Inference stage summary.
    pub inference: InferenceStats,
    /// Aggregation summary.
    pub aggregate: AggregateStats,
    /// Wall-clock duration in seconds.
    pub duration_secs: f64,
}

/// Sequences grid, fetch, inference and aggregation over one run directory.
///
/// Each stage fully drains before the next starts.
pub struct PipelineDriver<B, P> {
    boundary: Arc<B>,
    provider: Arc<P>,
    grid: GridSettings,
    fetch: FetchSettings,
    positive_label: String,
    progress: bool,
    stale_lock_timeout: Option<Duration>,
}

impl<B, P> PipelineDriver<B, P>
where
    B: BoundaryService + 'static,
    P: ImageryProvider + 'static,
{
    /// Create a driver over the injected boundary and imagery services.
    pub fn new(
        boundary: Arc<B>,
        provider: Arc<P>,
        grid: GridSettings,
        fetch: FetchSettings,
        positive_label: impl Into<String>,
    ) -> Self {
        Self {
            boundary,
            provider,
            grid,
            fetch,
            positive_label: positive_label.into(),
            progress: true,
            stale_lock_timeout: None,
        }
    }

    /// Enable or disable progress bars.
    #[must_use]
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress = enabled;
        self
    }

    /// Take over run locks older than `timeout`. Locks of exited processes
    /// on this host are taken over regardless.
    #[must_use]
    pub fn with_stale_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stale_lock_timeout = timeout;
        self
    }

    /// Lock `layout` for this process.
    pub fn lock(&self, layout: &RunLayout) -> Result<RunLock> {
        RunLock::acquire_or_reclaim(layout.run_dir(), self.stale_lock_timeout)
    }

    /// Load the serialized grid at `path`, or generate and save it.
    pub async fn grid(&self, path: &Path, regenerate: bool) -> Result<Vec<Tile>> {
        prepare_grid(Arc::clone(&self.boundary), self.grid, path, regenerate, self.progress).await
    }

    /// Run the fetch stage for `layout`.
    pub async fn fetch(&self, tiles: &[Tile], layout: &RunLayout) -> Result<FetchStats> {
        FetchStage::new(Arc::clone(&self.provider), self.fetch.clone())
            .run(tiles, &layout.fetch_target(), self.progress)
            .await
    }

    /// Run every stage for `layout`, holding the run lock throughout.
    pub async fn run<C>(
        &self,
        grid_path: &Path,
        layout: &RunLayout,
        engine: BatchInferenceEngine<C>,
    ) -> Result<RunSummary>
    where
        C: ImageClassifier + 'static,
    {
        let start = Instant::now();
        layout.ensure_dirs()?;
        let _lock = self.lock(layout)?;
        info!("Run {} in {}", layout.run_id(), layout.run_dir().display());

        let tiles = self.grid(grid_path, false).await?;
        let jobs = FetchJob::in_window(&tiles, self.fetch.window);
        self.finish(jobs, layout, engine, start).await
    }

    /// Run fetch, inference and aggregation over one tile per hotspot alert.
    ///
    /// Alerts are downloaded once per run and clipped to the boundary's
    /// bounding box; a resumed run reuses the saved set.
    pub async fn run_alerts<S, C>(
        &self,
        source: Arc<S>,
        settings: &AlertSettings,
        layout: &RunLayout,
        engine: BatchInferenceEngine<C>,
    ) -> Result<RunSummary>
    where
        S: AlertSource + 'static,
        C: ImageClassifier + 'static,
    {
        let start = Instant::now();
        layout.ensure_dirs()?;
        let _lock = self.lock(layout)?;
        info!("Alert run {} in {}", layout.run_id(), layout.run_dir().display());

        let path = layout.alerts_log();
        let alerts = if let Some(saved) = load_alerts(&path)? {
            info!("Loaded {} alert(s) from {}", saved.len(), path.display());
            saved
        } else {
            let downloaded =
                collect_alerts(source, &settings.dates, settings.download_workers).await?;
            let total = downloaded.len();
            let selected = select_alerts(downloaded, &self.boundary.bounds());
            save_alerts(&path, &selected)?;
            info!(
                "{} of {} alert(s) inside the territory, saved to {}",
                selected.len(),
                total,
                path.display()
            );
            selected
        };

        let jobs = alert_jobs(&alerts, settings.buffer_deg, settings.window_hours)?;
        self.finish(jobs, layout, engine, start).await
    }

    async fn finish<C>(
        &self,
        jobs: Vec<FetchJob>,
        layout: &RunLayout,
        engine: BatchInferenceEngine<C>,
        start: Instant,
    ) -> Result<RunSummary>
    where
        C: ImageClassifier + 'static,
    {
        let tiles = jobs.len();
        let fetch = FetchStage::new(Arc::clone(&self.provider), self.fetch.clone())
            .run_jobs(jobs, &layout.fetch_target(), self.progress)
            .await?;
        let inference = infer(engine, layout, self.progress).await?;
        let aggregate = ResultAggregator::new(self.positive_label.clone())
            .run(&layout.aggregate_target())?;

        let summary = RunSummary {
            run_id: layout.run_id().to_string(),
            tiles,
            fetch,
            inference,
            aggregate,
            duration_secs: start.elapsed().as_secs_f64(),
        };
        log_summary(&summary);
        Ok(summary)
    }
}

/// Load a grid from `path`, or partition the boundary and save the result.
///
/// A saved grid is used as-is without re-testing intersections.
pub async fn prepare_grid<B>(
    boundary: Arc<B>,
    settings: GridSettings,
    path: &Path,
    regenerate: bool,
    progress_enabled: bool,
) -> Result<Vec<Tile>>
where
    B: BoundaryService + 'static,
{
    let partitioner = GridPartitioner::new(boundary, settings.cell_size_deg, settings.workers);

    if !regenerate && let Some(grid) = load_grid(path)? {
        if !grid.matches(partitioner.cell_size_deg(), partitioner.origin()) {
            warn!(
                "Grid {} was generated with different parameters; use --regenerate to rebuild",
                path.display()
            );
        }
        info!("Loaded {} tiles from {}", grid.tiles.len(), path.display());
        return Ok(grid.tiles);
    }

    let pb = progress::create_stage_progress(partitioner.candidate_count(), "cells", progress_enabled);
    let tiles = partitioner.partition(pb.as_ref()).await?;
    progress::finish_progress(pb, "Grid complete");

    save_grid(
        path,
        &GridFile {
            cell_size_deg: partitioner.cell_size_deg(),
            origin: partitioner.origin(),
            generated: Utc::now(),
            tiles: tiles.clone(),
        },
    )?;
    info!("Saved {} tiles to {}", tiles.len(), path.display());
    Ok(tiles)
}

/// Run the inference stage on a blocking thread.
pub async fn infer<C>(
    mut engine: BatchInferenceEngine<C>,
    layout: &RunLayout,
    progress_enabled: bool,
) -> Result<InferenceStats>
where
    C: ImageClassifier + 'static,
{
    let images_dir = layout.images_dir().to_path_buf();
    let predictions_log = layout.predictions_log();

    tokio::task::spawn_blocking(move || engine.run(&images_dir, &predictions_log, progress_enabled))
        .await
        .map_err(|e| Error::Internal {
            message: format!("inference task failed: {e}"),
        })?
}

fn log_summary(summary: &RunSummary) {
    info!(
        "Run {} complete: {} tiles, {} fetched ({} without imagery, {} failed), {} classified, {} positive in {}",
        summary.run_id,
        summary.tiles,
        summary.fetch.fetched + summary.fetch.skipped,
        summary.fetch.no_image,
        summary.fetch.failed,
        summary.inference.classified + summary.inference.skipped,
        summary.aggregate.positives,
        progress::format_duration(summary.duration_secs)
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::alerts::HotspotAlert;
    use crate::fetch::{DateWindow, ImageAsset, RenderRequest};
    use crate::geo::{BoundingBox, PolygonBoundary};
    use crate::locking::LockInfo;
    use chrono::{NaiveDate, TimeZone};
    use image::{Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct PngProvider;

    impl ImageryProvider for PngProvider {
        async fn search(&self, _: &BoundingBox, _: &DateWindow) -> Result<Vec<ImageAsset>> {
            Ok(vec![ImageAsset {
                id: "a".to_string(),
                collection: "c".to_string(),
                acquired: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            }])
        }

        async fn render(&self, _: &ImageAsset, request: &RenderRequest) -> Result<Vec<u8>> {
            // Western tiles are bright, eastern tiles dark.
            let red = if request.bounds.lon_min < 0.5 { 255 } else { 0 };
            let mut bytes = Vec::new();
            RgbImage::from_pixel(4, 4, Rgb([red, 0, 0]))
                .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
                .unwrap();
            Ok(bytes)
        }
    }

    struct ThresholdClassifier {
        labels: Vec<String>,
    }

    impl ImageClassifier for ThresholdClassifier {
        fn labels(&self) -> &[String] {
            &self.labels
        }

        fn input_size(&self) -> u32 {
            2
        }

        fn forward(&mut self, batch: Vec<f32>, _: usize) -> Result<Vec<Vec<f32>>> {
            Ok(batch
                .chunks(12)
                .map(|img| if img[0] > 0.5 { vec![3.0, 0.0] } else { vec![0.0, 3.0] })
                .collect())
        }
    }

    fn driver() -> PipelineDriver<PolygonBoundary, PngProvider> {
        let square = vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)];
        PipelineDriver::new(
            Arc::new(PolygonBoundary::from_ring(square, 0.0).unwrap()),
            Arc::new(PngProvider),
            GridSettings {
                cell_size_deg: 0.5,
                workers: 2,
            },
            FetchSettings {
                workers: 3,
                window: DateWindow::ending_at(Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap(), 20),
                bands: vec!["B4".into(), "B3".into(), "B2".into()],
                dimensions: 4,
                rescale: (0.0, 3000.0),
            },
            "Fire",
        )
        .with_progress(false)
    }

    fn engine() -> BatchInferenceEngine<ThresholdClassifier> {
        BatchInferenceEngine::new(
            ThresholdClassifier {
                labels: vec!["Fire".to_string(), "No_Fire".to_string()],
            },
            2,
            [0.0; 3],
            [1.0; 3],
        )
    }

    #[tokio::test]
    async fn test_full_run() {
        let dir = TempDir::new().unwrap();
        let layout = RunLayout::create(dir.path(), Some("r1")).unwrap();
        let grid_path = dir.path().join("tiles.json");

        let summary = driver().run(&grid_path, &layout, engine()).await.unwrap();
        assert_eq!(summary.tiles, 4);
        assert_eq!(summary.fetch.fetched, 4);
        assert_eq!(summary.inference.classified, 4);
        assert_eq!(summary.aggregate.positives, 2);
        assert!(grid_path.exists());
        assert!(layout.fire_dir().join("tile_000.png").exists());
        assert!(!RunLock::is_locked(layout.run_dir()));
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let layout = RunLayout::create(dir.path(), Some("r1")).unwrap();
        let grid_path = dir.path().join("tiles.json");

        driver().run(&grid_path, &layout, engine()).await.unwrap();
        let second = driver().run(&grid_path, &layout, engine()).await.unwrap();
        assert_eq!(second.fetch.fetched, 0);
        assert_eq!(second.fetch.skipped, 4);
        assert_eq!(second.inference.classified, 0);
        assert_eq!(second.aggregate.predictions, 4);
    }

    #[tokio::test]
    async fn test_locked_run_fails_fast() {
        let dir = TempDir::new().unwrap();
        let layout = RunLayout::create(dir.path(), Some("r1")).unwrap();
        let _held = RunLock::acquire(layout.run_dir()).unwrap();

        let result = driver()
            .run(&dir.path().join("tiles.json"), &layout, engine())
            .await;
        assert!(matches!(result, Err(Error::RunLocked { .. })));
    }

    /// Write the lock a killed process would leave behind.
    fn leave_lock(layout: &RunLayout, pid: u32) -> std::path::PathBuf {
        let path = RunLock::lock_path_for(layout.run_dir());
        let info = LockInfo {
            pid,
            hostname: hostname::get().unwrap().to_string_lossy().into_owned(),
            started: Utc::now(),
            run_dir: layout.run_dir().to_path_buf(),
        };
        std::fs::write(&path, serde_json::to_string(&info).unwrap()).unwrap();
        path
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_run_resumes_after_holder_died() {
        let dir = TempDir::new().unwrap();
        let layout = RunLayout::create(dir.path(), Some("r1")).unwrap();
        let grid_path = dir.path().join("tiles.json");

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        leave_lock(&layout, pid);

        let summary = driver().run(&grid_path, &layout, engine()).await.unwrap();
        assert_eq!(summary.fetch.fetched, 4);
        assert!(!RunLock::is_locked(layout.run_dir()));
    }

    #[tokio::test]
    async fn test_run_resumes_past_expired_lock() {
        let dir = TempDir::new().unwrap();
        let layout = RunLayout::create(dir.path(), Some("r1")).unwrap();
        let grid_path = dir.path().join("tiles.json");
        driver().run(&grid_path, &layout, engine()).await.unwrap();

        // Our own pid is alive, so only the age rule can clear this lock.
        let path = leave_lock(&layout, std::process::id());
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(std::time::SystemTime::now() - Duration::from_secs(7200))
            .unwrap();

        let blocked = driver().run(&grid_path, &layout, engine()).await;
        assert!(matches!(blocked, Err(Error::RunLocked { .. })));

        let resumed = driver()
            .with_stale_lock_timeout(Some(Duration::from_secs(3600)))
            .run(&grid_path, &layout, engine())
            .await
            .unwrap();
        assert_eq!(resumed.fetch.skipped, 4);
        assert_eq!(resumed.inference.classified, 0);
        assert!(!RunLock::is_locked(layout.run_dir()));
    }

    struct FixedAlerts {
        calls: AtomicUsize,
    }

    impl AlertSource for FixedAlerts {
        async fn alerts_for(&self, _: NaiveDate) -> Result<Vec<HotspotAlert>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let at = Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap();
            Ok([(0.8, 0.5), (0.2, 0.5), (5.0, 5.0)]
                .into_iter()
                .map(|(longitude, latitude)| HotspotAlert {
                    latitude,
                    longitude,
                    acquired: at,
                    confidence: "n".to_string(),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_alert_run_and_resume() {
        let dir = TempDir::new().unwrap();
        let layout = RunLayout::create(dir.path(), Some("alerts")).unwrap();
        let source = Arc::new(FixedAlerts {
            calls: AtomicUsize::new(0),
        });
        let settings = AlertSettings {
            dates: vec![NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()],
            buffer_deg: 0.02,
            window_hours: 10,
            download_workers: 2,
        };

        let first = driver()
            .run_alerts(Arc::clone(&source), &settings, &layout, engine())
            .await
            .unwrap();
        // The alert at (5, 5) lies outside the territory.
        assert_eq!(first.tiles, 2);
        assert_eq!(first.fetch.fetched, 2);
        assert_eq!(first.aggregate.positives, 1);
        // Tiles follow the saved order: (0.2, 0.5) is the western, bright one.
        assert!(layout.fire_dir().join("tile_000.png").exists());
        assert_eq!(load_alerts(&layout.alerts_log()).unwrap().unwrap().len(), 2);

        let second = driver()
            .run_alerts(Arc::clone(&source), &settings, &layout, engine())
            .await
            .unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.fetch.skipped, 2);
        assert_eq!(second.inference.classified, 0);
    }

    #[tokio::test]
    async fn test_saved_grid_reused_verbatim() {
        let dir = TempDir::new().unwrap();
        let grid_path = dir.path().join("tiles.json");
        let driver = driver();

        let tiles = driver.grid(&grid_path, false).await.unwrap();
        let mut saved = load_grid(&grid_path).unwrap().unwrap();
        saved.tiles.truncate(1);
        save_grid(&grid_path, &saved).unwrap();

        assert_eq!(driver.grid(&grid_path, false).await.unwrap().len(), 1);
        assert_eq!(driver.grid(&grid_path, true).await.unwrap(), tiles);
    }
}
