//! Integration tests for the fetch and inference stages with in-memory services.

use chrono::{TimeZone, Utc};
use firewatch::fetch::{
    DateWindow, FetchSettings, FetchStage, FetchTarget, ImageAsset, ImageryProvider, RenderRequest,
};
use firewatch::geo::{BoundingBox, Tile, TileId};
use firewatch::inference::{BatchInferenceEngine, ImageClassifier};
use firewatch::output::read_log;
use firewatch::{Error, Result};
use image::{Rgb, RgbImage};
use std::collections::BTreeSet;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Renders a solid PNG per tile; odd tiles are red, even tiles blue.
/// Every fifth tile has no imagery and every seventh fails to download.
struct SyntheticProvider;

fn tile_index(bounds: &BoundingBox) -> usize {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let idx = (bounds.lon_min * 10.0).round() as usize;
    idx
}

impl ImageryProvider for SyntheticProvider {
    async fn search(&self, bounds: &BoundingBox, _: &DateWindow) -> Result<Vec<ImageAsset>> {
        let idx = tile_index(bounds);
        // Vary completion order across tasks.
        tokio::time::sleep(Duration::from_millis(((idx * 7) % 5) as u64)).await;
        if idx % 5 == 4 {
            return Ok(Vec::new());
        }
        Ok(vec![ImageAsset {
            id: format!("scene-{idx}"),
            collection: "synthetic".to_string(),
            acquired: Utc.with_ymd_and_hms(2025, 2, 1, 10, 30, 0).unwrap(),
        }])
    }

    async fn render(&self, _: &ImageAsset, request: &RenderRequest) -> Result<Vec<u8>> {
        let idx = tile_index(&request.bounds);
        if idx % 7 == 6 {
            return Err(Error::HttpStatus {
                url: "https://tiler.invalid".to_string(),
                status: 500,
            });
        }
        let pixel = if idx % 2 == 1 {
            Rgb([255, 0, 0])
        } else {
            Rgb([0, 0, 255])
        };
        let mut bytes = Vec::new();
        RgbImage::from_pixel(8, 8, pixel)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        Ok(bytes)
    }
}

/// Predicts the first label when the red channel dominates.
struct RedClassifier {
    labels: Vec<String>,
}

impl RedClassifier {
    fn new() -> Self {
        Self {
            labels: vec!["Fire".to_string(), "No_Fire".to_string()],
        }
    }
}

impl ImageClassifier for RedClassifier {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn input_size(&self) -> u32 {
        2
    }

    fn forward(&mut self, batch: Vec<f32>, _: usize) -> Result<Vec<Vec<f32>>> {
        // CHW layout: 4 red values then 4 green then 4 blue.
        Ok(batch
            .chunks(12)
            .map(|img| {
                if img[0] > img[8] {
                    vec![2.0, -2.0]
                } else {
                    vec![-2.0, 2.0]
                }
            })
            .collect())
    }
}

fn tiles(n: usize) -> Vec<Tile> {
    (0..n)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let lon = i as f64 / 10.0;
            Tile {
                index: i,
                id: TileId {
                    col: u32::try_from(i).unwrap(),
                    row: 0,
                },
                bounds: BoundingBox::new(lon, 0.0, lon + 0.1, 0.1),
            }
        })
        .collect()
}

fn settings(workers: usize) -> FetchSettings {
    FetchSettings {
        workers,
        window: DateWindow::ending_at(Utc.with_ymd_and_hms(2025, 2, 10, 0, 0, 0).unwrap(), 20),
        bands: vec!["B4".to_string(), "B3".to_string(), "B2".to_string()],
        dimensions: 8,
        rescale: (0.0, 3000.0),
    }
}

fn target(dir: &Path) -> FetchTarget {
    FetchTarget {
        images_dir: dir.join("images"),
        metadata_log: dir.join("metadata.csv"),
    }
}

fn sorted_rows(path: &Path) -> BTreeSet<Vec<String>> {
    read_log(path)
        .unwrap()
        .rows
        .iter()
        .map(|r| r.iter().map(ToString::to_string).collect())
        .collect()
}

#[tokio::test]
async fn test_fetch_result_independent_of_pool_size() {
    let serial = TempDir::new().unwrap();
    let parallel = TempDir::new().unwrap();
    let grid = tiles(20);

    let a = FetchStage::new(Arc::new(SyntheticProvider), settings(1))
        .run(&grid, &target(serial.path()), false)
        .await
        .unwrap();
    let b = FetchStage::new(Arc::new(SyntheticProvider), settings(8))
        .run(&grid, &target(parallel.path()), false)
        .await
        .unwrap();

    assert_eq!(a, b);
    // 4 tiles without imagery (4, 9, 14, 19), 2 failed (6, 13).
    assert_eq!(a.no_image, 4);
    assert_eq!(a.failed, 2);
    assert_eq!(a.fetched, 14);
    assert_eq!(
        sorted_rows(&serial.path().join("metadata.csv")),
        sorted_rows(&parallel.path().join("metadata.csv"))
    );

    for dir in [&serial, &parallel] {
        BatchInferenceEngine::new(RedClassifier::new(), 4, [0.0; 3], [1.0; 3])
            .run(&dir.path().join("images"), &dir.path().join("predictions.csv"), false)
            .unwrap();
    }
    assert_eq!(
        sorted_rows(&serial.path().join("predictions.csv")),
        sorted_rows(&parallel.path().join("predictions.csv"))
    );
}

#[tokio::test]
async fn test_fetch_then_classify_then_resume() {
    let dir = TempDir::new().unwrap();
    let fetch_target = target(dir.path());
    let predictions = dir.path().join("predictions.csv");

    FetchStage::new(Arc::new(SyntheticProvider), settings(4))
        .run(&tiles(10), &fetch_target, false)
        .await
        .unwrap();

    let mut engine = BatchInferenceEngine::new(RedClassifier::new(), 3, [0.0; 3], [1.0; 3]);
    let first = engine.run(&fetch_target.images_dir, &predictions, false).unwrap();
    // Tiles 4, 6 and 9 have no image.
    assert_eq!(first.classified, 7);

    // Simulate an interruption: keep three rows plus a torn partial line.
    let contents = std::fs::read_to_string(&predictions).unwrap();
    let kept: Vec<&str> = contents.lines().take(4).collect();
    let mut file = std::fs::File::create(&predictions).unwrap();
    writeln!(file, "{}", kept.join("\n")).unwrap();
    write!(file, "tile_00").unwrap();
    drop(file);

    let mut engine = BatchInferenceEngine::new(RedClassifier::new(), 3, [0.0; 3], [1.0; 3]);
    let second = engine.run(&fetch_target.images_dir, &predictions, false).unwrap();
    assert_eq!(second.skipped, 3);
    assert_eq!(second.classified, 4);

    let log = read_log(&predictions).unwrap();
    let names: Vec<&str> = log.rows.iter().map(|r| &r[0]).collect();
    let unique: BTreeSet<&str> = names.iter().copied().collect();
    assert_eq!(names.len(), 7);
    assert_eq!(unique.len(), 7);

    for row in &log.rows {
        let idx: usize = row[0]
            .trim_start_matches("tile_")
            .trim_end_matches(".png")
            .parse()
            .unwrap();
        let expected = if idx % 2 == 1 { "Fire" } else { "No_Fire" };
        assert_eq!(&row[1], expected, "{}", &row[0]);
    }
}

#[tokio::test]
async fn test_fetch_rerun_only_retries_missing_tiles() {
    let dir = TempDir::new().unwrap();
    let stage = FetchStage::new(Arc::new(SyntheticProvider), settings(3));
    let grid = tiles(10);

    let first = stage.run(&grid, &target(dir.path()), false).await.unwrap();
    let second = stage.run(&grid, &target(dir.path()), false).await.unwrap();

    assert_eq!(second.skipped, first.fetched);
    assert_eq!(second.fetched, 0);
    assert_eq!(second.no_image + second.failed, first.no_image + first.failed);
    assert_eq!(
        read_log(&dir.path().join("metadata.csv")).unwrap().rows.len(),
        first.fetched
    );
}
