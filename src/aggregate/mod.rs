//! Positive-class extraction from the predictions log.

use crate::constants::columns;
use crate::error::{Error, Result};
use crate::output::{read_log, write_log};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Summary of an aggregation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggregateStats {
    /// Rows in the predictions log.
    pub predictions: usize,
    /// Rows predicted as the positive label.
    pub positives: usize,
    /// Images copied into the positive directory.
    pub copied: usize,
    /// Images that could not be copied.
    pub copy_failed: usize,
}

/// Paths read and written by [`ResultAggregator::run`].
#[derive(Debug, Clone)]
pub struct AggregateTarget {
    /// Full predictions log.
    pub predictions_log: PathBuf,
    /// Directory holding the classified images.
    pub images_dir: PathBuf,
    /// Filtered log to (re)write.
    pub positive_log: PathBuf,
    /// Directory receiving copies of positive images.
    pub positive_dir: PathBuf,
}

/// Filters predictions to one label and materializes the matching images.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    positive_label: String,
}

impl ResultAggregator {
    /// Aggregator for `positive_label`.
    pub fn new(positive_label: impl Into<String>) -> Self {
        Self {
            positive_label: positive_label.into(),
        }
    }

    /// Rewrite the filtered log and copy each matching image.
    ///
    /// A failed copy is logged and counted; the remaining copies proceed.
    pub fn run(&self, target: &AggregateTarget) -> Result<AggregateStats> {
        let contents = read_log(&target.predictions_log)?;
        let mut stats = AggregateStats {
            predictions: contents.rows.len(),
            ..AggregateStats::default()
        };

        if contents.header.is_empty() {
            info!(
                "No predictions in {}, nothing to aggregate",
                target.predictions_log.display()
            );
            return Ok(stats);
        }

        let missing = |column: &str| Error::MissingColumn {
            path: target.predictions_log.clone(),
            column: column.to_string(),
        };
        let prediction_idx = contents
            .column(columns::PREDICTION)
            .ok_or_else(|| missing(columns::PREDICTION))?;
        let filename_idx = contents
            .column(columns::FILENAME)
            .ok_or_else(|| missing(columns::FILENAME))?;

        let positives: Vec<_> = contents
            .rows
            .iter()
            .filter(|row| row.get(prediction_idx) == Some(self.positive_label.as_str()))
            .collect();
        stats.positives = write_log(&target.positive_log, &contents.header, positives.iter().copied())?;

        std::fs::create_dir_all(&target.positive_dir).map_err(|e| {
            Error::OutputDirCreateFailed {
                path: target.positive_dir.clone(),
                source: e,
            }
        })?;

        for row in &positives {
            let Some(name) = row.get(filename_idx) else {
                continue;
            };
            match copy_image(&target.images_dir, &target.positive_dir, name) {
                Ok(()) => stats.copied += 1,
                Err(e) => {
                    warn!("{e}");
                    stats.copy_failed += 1;
                }
            }
        }

        info!(
            "Aggregate: {} of {} prediction(s) labelled '{}', {} copied, {} copy failure(s)",
            stats.positives, stats.predictions, self.positive_label, stats.copied, stats.copy_failed
        );
        Ok(stats)
    }
}

fn copy_image(from_dir: &Path, to_dir: &Path, name: &str) -> Result<()> {
    let from = from_dir.join(name);
    let to = to_dir.join(name);
    std::fs::copy(&from, &to).map_err(|e| Error::FileCopy {
        from,
        to,
        source: e,
    })?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    const LOG: &str = "filename,prediction,confidence,prob_fire,prob_no_fire\n\
        tile_000.png,Fire,0.900000,0.900000,0.100000\n\
        tile_001.png,No_Fire,0.800000,0.200000,0.800000\n\
        tile_002.png,Fire,0.700000,0.700000,0.300000\n\
        tile_003.png,Fire,0.600000,0.600000,0.400000\n";

    fn setup(dir: &TempDir) -> AggregateTarget {
        let images = dir.path().join("images");
        std::fs::create_dir(&images).unwrap();
        for name in ["tile_000.png", "tile_001.png", "tile_002.png"] {
            std::fs::write(images.join(name), name).unwrap();
        }
        std::fs::write(dir.path().join("predictions.csv"), LOG).unwrap();

        AggregateTarget {
            predictions_log: dir.path().join("predictions.csv"),
            images_dir: images,
            positive_log: dir.path().join("predictions_fire.csv"),
            positive_dir: dir.path().join("fire"),
        }
    }

    #[test]
    fn test_positive_log_is_filtered_subset() {
        let dir = TempDir::new().unwrap();
        let target = setup(&dir);

        let stats = ResultAggregator::new("Fire").run(&target).unwrap();
        assert_eq!(stats.predictions, 4);
        assert_eq!(stats.positives, 3);

        let full = read_log(&target.predictions_log).unwrap();
        let fire = read_log(&target.positive_log).unwrap();
        assert_eq!(fire.header, full.header);

        let all: HashSet<&str> = full.rows.iter().map(|r| &r[0]).collect();
        for row in &fire.rows {
            assert!(all.contains(&row[0]));
            assert_eq!(&row[1], "Fire");
        }
        let expected = full.rows.iter().filter(|r| &r[1] == "Fire").count();
        assert_eq!(fire.rows.len(), expected);
    }

    #[test]
    fn test_missing_image_does_not_abort_copies() {
        let dir = TempDir::new().unwrap();
        let target = setup(&dir);

        let stats = ResultAggregator::new("Fire").run(&target).unwrap();
        assert_eq!(stats.copied, 2);
        assert_eq!(stats.copy_failed, 1);
        assert_eq!(
            std::fs::read_to_string(target.positive_dir.join("tile_002.png")).unwrap(),
            "tile_002.png"
        );
        assert!(!target.positive_dir.join("tile_001.png").exists());
    }

    #[test]
    fn test_rerun_rewrites_log() {
        let dir = TempDir::new().unwrap();
        let target = setup(&dir);
        let aggregator = ResultAggregator::new("Fire");

        aggregator.run(&target).unwrap();
        aggregator.run(&target).unwrap();
        assert_eq!(read_log(&target.positive_log).unwrap().rows.len(), 3);
    }

    #[test]
    fn test_empty_predictions() {
        let dir = TempDir::new().unwrap();
        let target = AggregateTarget {
            predictions_log: dir.path().join("predictions.csv"),
            images_dir: dir.path().join("images"),
            positive_log: dir.path().join("predictions_fire.csv"),
            positive_dir: dir.path().join("fire"),
        };
        let stats = ResultAggregator::new("Fire").run(&target).unwrap();
        assert_eq!(stats, AggregateStats::default());
    }
}
