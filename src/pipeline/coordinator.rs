//! Run directory layout and run identifiers.

use crate::aggregate::AggregateTarget;
use crate::constants::{grid::TILES_FILE, layout};
use crate::error::{Error, Result};
use crate::fetch::FetchTarget;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Paths owned by one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    run_id: String,
    run_dir: PathBuf,
    images_dir: PathBuf,
}

impl RunLayout {
    /// Layout of `<data_dir>/runs/<run_id>`.
    pub fn for_run(data_dir: &Path, run_id: &str) -> Self {
        let run_dir = data_dir.join(layout::RUNS_DIR).join(run_id);
        Self {
            run_id: run_id.to_string(),
            images_dir: run_dir.join(layout::IMAGES_DIR),
            run_dir,
        }
    }

    /// Layout for classifying an existing image directory, writing outputs
    /// to `output_dir`.
    pub fn for_images(images_dir: &Path, output_dir: &Path) -> Self {
        let run_id = output_dir.file_name().map_or_else(
            || "output".to_string(),
            |n| n.to_string_lossy().into_owned(),
        );
        Self {
            run_id,
            run_dir: output_dir.to_path_buf(),
            images_dir: images_dir.to_path_buf(),
        }
    }

    /// Create a run directory, generating an id from the current time
    /// unless one is given. An existing directory is reused for resume.
    pub fn create(data_dir: &Path, run_id: Option<&str>) -> Result<Self> {
        let run_id = run_id.map_or_else(|| new_run_id(Utc::now()), ToString::to_string);
        let layout = Self::for_run(data_dir, &run_id);
        layout.ensure_dirs()?;
        Ok(layout)
    }

    /// Open an existing run directory.
    pub fn open(data_dir: &Path, run_id: &str) -> Result<Self> {
        let layout = Self::for_run(data_dir, run_id);
        if !layout.run_dir.is_dir() {
            return Err(Error::RunNotFound {
                run_id: run_id.to_string(),
                path: data_dir.join(layout::RUNS_DIR),
            });
        }
        Ok(layout)
    }

    /// Create the run and image directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.run_dir, &self.images_dir] {
            std::fs::create_dir_all(dir).map_err(|e| Error::OutputDirCreateFailed {
                path: dir.clone(),
                source: e,
            })?;
        }
        Ok(())
    }

    /// Run identifier.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Run directory.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Fetched images.
    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Fetch metadata log.
    pub fn metadata_log(&self) -> PathBuf {
        self.run_dir.join(layout::METADATA_LOG)
    }

    /// Predictions log.
    pub fn predictions_log(&self) -> PathBuf {
        self.run_dir.join(layout::PREDICTIONS_LOG)
    }

    /// Filtered positive-class log.
    pub fn fire_log(&self) -> PathBuf {
        self.run_dir.join(layout::FIRE_LOG)
    }

    /// Hotspot alerts behind an alert run's tiles.
    pub fn alerts_log(&self) -> PathBuf {
        self.run_dir.join(layout::ALERTS_LOG)
    }

    /// Positive image copies.
    pub fn fire_dir(&self) -> PathBuf {
        self.run_dir.join(layout::FIRE_DIR)
    }

    /// Paths for the fetch stage.
    pub fn fetch_target(&self) -> FetchTarget {
        FetchTarget {
            images_dir: self.images_dir.clone(),
            metadata_log: self.metadata_log(),
        }
    }

    /// Paths for the aggregation step.
    pub fn aggregate_target(&self) -> AggregateTarget {
        AggregateTarget {
            predictions_log: self.predictions_log(),
            images_dir: self.images_dir.clone(),
            positive_log: self.fire_log(),
            positive_dir: self.fire_dir(),
        }
    }
}

/// Run id for a start time, e.g. `20250301_142500`.
pub fn new_run_id(now: DateTime<Utc>) -> String {
    now.format(layout::RUN_ID_FORMAT).to_string()
}

/// Serialized grid location inside the data directory.
pub fn grid_path(data_dir: &Path) -> PathBuf {
    data_dir.join(TILES_FILE)
}

/// Determine the output directory for an image directory.
pub fn output_dir_for(images_dir: &Path, explicit_output_dir: Option<&Path>) -> PathBuf {
    explicit_output_dir.map_or_else(
        || {
            images_dir
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
        },
        Path::to_path_buf,
    )
}
