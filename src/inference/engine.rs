//! Resumable batched classification over an image directory.

use super::ImageClassifier;
use super::preprocess::Normalization;
use crate::checkpoint::CheckpointStore;
use crate::constants::{columns, inference::IMAGE_EXTENSIONS};
use crate::error::Result;
use crate::output::{CsvAppendLog, PredictionRecord, progress};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Summary of an inference stage run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InferenceStats {
    /// Image files found in the directory.
    pub images: usize,
    /// Images already in the predictions log.
    pub skipped: usize,
    /// Images classified and recorded in this run.
    pub classified: usize,
    /// Images that failed to decode.
    pub decode_failed: usize,
    /// Batches processed.
    pub batches: usize,
}

/// Classifies an image directory in fixed-size batches, appending to a
/// predictions log that doubles as the resume checkpoint.
pub struct BatchInferenceEngine<C> {
    classifier: C,
    batch_size: usize,
    normalization: Normalization,
}

impl<C: ImageClassifier> BatchInferenceEngine<C> {
    /// Create an engine. `batch_size` is clamped to at least 1.
    pub fn new(classifier: C, batch_size: usize, mean: [f32; 3], std: [f32; 3]) -> Self {
        let normalization = Normalization {
            size: classifier.input_size(),
            mean,
            std,
        };
        Self {
            classifier,
            batch_size: batch_size.max(1),
            normalization,
        }
    }

    /// Effective batch size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Classify every image in `images_dir` not yet in `predictions_log`.
    ///
    /// The log is flushed to stable storage after every batch.
    pub fn run(
        &mut self,
        images_dir: &Path,
        predictions_log: &Path,
        progress_enabled: bool,
    ) -> Result<InferenceStats> {
        let header = PredictionRecord::header(self.classifier.labels());
        let mut log = CsvAppendLog::open(predictions_log, &header)?;
        let checkpoint = CheckpointStore::load(predictions_log, columns::FILENAME)?;

        let images = collect_images(images_dir)?;
        let pending = checkpoint.pending(images.clone(), |p| file_name(p));

        let mut stats = InferenceStats {
            images: images.len(),
            skipped: images.len() - pending.len(),
            ..InferenceStats::default()
        };

        info!(
            "Classifying {} image(s), {} already recorded (batch size {})",
            pending.len(),
            stats.skipped,
            self.batch_size
        );

        let pb = progress::create_stage_progress(pending.len(), "images", progress_enabled);

        for batch in partition_batches(&pending, self.batch_size) {
            let records = self.classify_batch(batch, &mut stats)?;
            for record in &records {
                log.append(record)?;
            }
            log.sync()?;

            stats.batches += 1;
            stats.classified += records.len();
            progress::inc_progress(pb.as_ref(), batch.len() as u64);
        }

        progress::finish_progress(pb, "Inference complete");

        info!(
            "Inference stage: {} classified in {} batch(es), {} undecodable, {} skipped",
            stats.classified, stats.batches, stats.decode_failed, stats.skipped
        );
        Ok(stats)
    }

    fn classify_batch(
        &mut self,
        batch: &[PathBuf],
        stats: &mut InferenceStats,
    ) -> Result<Vec<PredictionRecord>> {
        let mut tensor = Vec::with_capacity(batch.len() * self.normalization.tensor_len());
        let mut names = Vec::with_capacity(batch.len());

        for path in batch {
            match self.normalization.load(path) {
                Ok(pixels) => {
                    tensor.extend_from_slice(&pixels);
                    names.push(file_name(path));
                }
                Err(e) => {
                    warn!("Skipping {}: {e}", path.display());
                    stats.decode_failed += 1;
                }
            }
        }

        if names.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Forward pass over {} image(s)", names.len());
        let logits = self.classifier.forward(tensor, names.len())?;
        let labels = self.classifier.labels();

        Ok(names
            .into_iter()
            .zip(logits)
            .map(|(filename, logits)| {
                let probabilities = softmax(&logits);
                let (best, confidence) = argmax(&probabilities);
                PredictionRecord {
                    filename,
                    prediction: labels.get(best).cloned().unwrap_or_default(),
                    confidence,
                    probabilities,
                }
            })
            .collect())
    }
}

/// Split `items` into contiguous batches of `size`, the last possibly shorter.
pub fn partition_batches<T>(items: &[T], size: usize) -> Vec<&[T]> {
    items.chunks(size.max(1)).collect()
}

/// Normalised exponential over `logits`.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Index and value of the largest probability; ties go to the lowest index.
fn argmax(probabilities: &[f32]) -> (usize, f32) {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, p)| {
            if p > best.1 { (i, p) } else { best }
        })
}

/// Image files directly inside `dir`, in natural filename order.
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_image_file(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| compare_names(&file_name(a), &file_name(b)));
    Ok(files)
}

fn is_image_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| {
        IMAGE_EXTENSIONS
            .iter()
            .any(|known| ext.eq_ignore_ascii_case(known))
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Order names by their first embedded integer, then lexicographically.
/// Names without digits sort after all names with digits.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    match (first_integer(a), first_integer(b)) {
        (Some(x), Some(y)) => compare_digits(x, y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn first_integer(name: &str) -> Option<&str> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let rest = &name[start..];
    let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
    Some(&rest[..end])
}

// Compares digit strings of any length without parsing.
fn compare_digits(x: &str, y: &str) -> Ordering {
    let x = x.trim_start_matches('0');
    let y = y.trim_start_matches('0');
    x.len().cmp(&y.len()).then_with(|| x.cmp(y))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::output::read_log;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    /// Scores `Fire` when the first pixel value is positive.
    /// Fails the forward call numbered `fail_at` (zero-based), if set.
    struct FakeClassifier {
        labels: Vec<String>,
        batch_lens: Vec<usize>,
        fail_at: Option<usize>,
    }

    impl FakeClassifier {
        fn new() -> Self {
            Self {
                labels: vec!["Fire".to_string(), "No_Fire".to_string()],
                batch_lens: Vec::new(),
                fail_at: None,
            }
        }
    }

    impl ImageClassifier for FakeClassifier {
        fn labels(&self) -> &[String] {
            &self.labels
        }

        fn input_size(&self) -> u32 {
            2
        }

        fn forward(&mut self, batch: Vec<f32>, len: usize) -> Result<Vec<Vec<f32>>> {
            if self.fail_at == Some(self.batch_lens.len()) {
                return Err(Error::Inference {
                    reason: "device lost".to_string(),
                });
            }
            self.batch_lens.push(len);
            Ok(batch
                .chunks(12)
                .map(|img| {
                    if img[0] > 0.5 {
                        vec![2.0, 0.0]
                    } else {
                        vec![0.0, 2.0]
                    }
                })
                .collect())
        }
    }

    fn write_png(dir: &Path, name: &str, red: u8) {
        RgbImage::from_pixel(4, 4, Rgb([red, 0, 0]))
            .save(dir.join(name))
            .unwrap();
    }

    fn engine(batch_size: usize) -> BatchInferenceEngine<FakeClassifier> {
        BatchInferenceEngine::new(FakeClassifier::new(), batch_size, [0.0; 3], [1.0; 3])
    }

    #[test]
    fn test_forward_failure_keeps_completed_batches() {
        let dir = TempDir::new().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir(&images).unwrap();
        for i in 1..=5 {
            write_png(&images, &format!("tile_{i:03}.png"), 255);
        }
        let log_path = dir.path().join("predictions.csv");

        let mut failing = engine(2);
        failing.classifier.fail_at = Some(1);
        let result = failing.run(&images, &log_path, false);
        assert!(matches!(result, Err(Error::Inference { .. })));

        // The first batch was synced before the failing forward pass.
        let names: Vec<String> = read_log(&log_path)
            .unwrap()
            .rows
            .iter()
            .map(|r| r[0].to_string())
            .collect();
        assert_eq!(names, vec!["tile_001.png", "tile_002.png"]);

        let mut healthy = engine(2);
        let stats = healthy.run(&images, &log_path, false).unwrap();
        assert_eq!(stats.skipped, 2);
        assert_eq!(stats.classified, 3);
        assert_eq!(healthy.classifier.batch_lens, vec![2, 1]);

        let names: Vec<String> = read_log(&log_path)
            .unwrap()
            .rows
            .iter()
            .map(|r| r[0].to_string())
            .collect();
        let expected: Vec<String> = (1..=5).map(|i| format!("tile_{i:03}.png")).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_partition_batches() {
        let items = ["a1", "a2", "a3", "a4", "a5"];
        let batches = partition_batches(&items, 2);
        assert_eq!(
            batches,
            vec![&["a1", "a2"][..], &["a3", "a4"][..], &["a5"][..]]
        );
    }

    #[test]
    fn test_partition_is_lossless_cover() {
        let items: Vec<u32> = (0..103).collect();
        for size in [1, 7, 32, 103, 500] {
            let flat: Vec<u32> = partition_batches(&items, size).concat();
            assert_eq!(flat, items);
        }
        assert!(partition_batches::<u32>(&[], 8).is_empty());
    }

    #[test]
    fn test_softmax() {
        let p = softmax(&[1000.0, 1000.0]);
        assert!((p[0] - 0.5).abs() < 1e-6);
        let p = softmax(&[2.0, 0.0, -1.0]);
        assert!((p.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(p[0] > p[1] && p[1] > p[2]);
    }

    #[test]
    fn test_argmax_tie_goes_to_lowest_index() {
        assert_eq!(argmax(&[0.5, 0.5]), (0, 0.5));
        assert_eq!(argmax(&[0.2, 0.3, 0.5]).0, 2);
    }

    #[test]
    fn test_natural_order() {
        let mut names = vec![
            "tile_10.png",
            "notes.png",
            "tile_2.png",
            "tile_002b.png",
            "alpha.png",
            "tile_1.png",
        ];
        names.sort_by(|a, b| compare_names(a, b));
        assert_eq!(
            names,
            vec![
                "tile_1.png",
                "tile_002b.png",
                "tile_2.png",
                "tile_10.png",
                "alpha.png",
                "notes.png",
            ]
        );
    }

    #[test]
    fn test_collect_images_filters_extensions() {
        let dir = TempDir::new().unwrap();
        write_png(dir.path(), "tile_001.png", 0);
        std::fs::write(dir.path().join("tile_000.JPG"), b"x").unwrap();
        std::fs::write(dir.path().join("tile_002.png.part"), b"x").unwrap();
        std::fs::write(dir.path().join("metadata.csv"), b"x").unwrap();

        let names: Vec<String> = collect_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| file_name(p))
            .collect();
        assert_eq!(names, vec!["tile_000.JPG", "tile_001.png"]);
    }

    #[test]
    fn test_resume_processes_only_new_images() {
        let dir = TempDir::new().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir(&images).unwrap();
        write_png(&images, "tile_003.png", 255);
        write_png(&images, "tile_004.png", 255);

        let log = dir.path().join("predictions.csv");
        std::fs::write(
            &log,
            "filename,prediction,confidence,prob_fire,prob_no_fire\n\
             tile_003.png,Fire,0.880797,0.880797,0.119203\n",
        )
        .unwrap();

        let mut engine = engine(8);
        let stats = engine.run(&images, &log, false).unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.classified, 1);

        let contents = read_log(&log).unwrap();
        let names: Vec<&str> = contents.rows.iter().map(|r| &r[0]).collect();
        assert_eq!(names, vec!["tile_003.png", "tile_004.png"]);
    }

    #[test]
    fn test_batches_follow_sorted_order() {
        let dir = TempDir::new().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir(&images).unwrap();
        for (i, red) in [(10, 255u8), (2, 0), (1, 255), (30, 0), (3, 255)] {
            write_png(&images, &format!("tile_{i}.png"), red);
        }

        let log = dir.path().join("predictions.csv");
        let mut engine = engine(2);
        let stats = engine.run(&images, &log, false).unwrap();
        assert_eq!(stats.batches, 3);
        assert_eq!(engine.classifier.batch_lens, vec![2, 2, 1]);

        let contents = read_log(&log).unwrap();
        let rows: Vec<(&str, &str)> = contents.rows.iter().map(|r| (&r[0], &r[1])).collect();
        assert_eq!(
            rows,
            vec![
                ("tile_1.png", "Fire"),
                ("tile_2.png", "No_Fire"),
                ("tile_3.png", "Fire"),
                ("tile_10.png", "Fire"),
                ("tile_30.png", "No_Fire"),
            ]
        );
    }

    #[test]
    fn test_decode_failure_skipped_without_aborting_batch() {
        let dir = TempDir::new().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir(&images).unwrap();
        write_png(&images, "tile_000.png", 255);
        std::fs::write(images.join("tile_001.png"), b"corrupt").unwrap();
        write_png(&images, "tile_002.png", 0);

        let log = dir.path().join("predictions.csv");
        let stats = engine(4).run(&images, &log, false).unwrap();
        assert_eq!(stats.decode_failed, 1);
        assert_eq!(stats.classified, 2);

        let contents = read_log(&log).unwrap();
        assert_eq!(contents.rows.len(), 2);
        assert_eq!(
            contents.header,
            vec!["filename", "prediction", "confidence", "prob_fire", "prob_no_fire"]
        );
    }

    #[test]
    fn test_header_mismatch_is_fatal() {
        let dir = TempDir::new().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir(&images).unwrap();
        let log = dir.path().join("predictions.csv");
        std::fs::write(&log, "filename,prediction,confidence,prob_smoke\n").unwrap();

        let result = engine(4).run(&images, &log, false);
        assert!(matches!(result, Err(Error::LogSchemaMismatch { .. })));
    }
}
