//! Serialized tile grid.

use crate::error::{Error, Result};
use crate::geo::Tile;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk grid: the parameters it was generated with plus the retained tiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridFile {
    /// Cell size in degrees.
    pub cell_size_deg: f64,
    /// Lattice origin `(lon, lat)`.
    pub origin: (f64, f64),
    /// When the grid was generated.
    pub generated: chrono::DateTime<chrono::Utc>,
    /// Retained tiles in lattice order.
    pub tiles: Vec<Tile>,
}

impl GridFile {
    /// Whether this grid was generated with the given parameters.
    pub fn matches(&self, cell_size_deg: f64, origin: (f64, f64)) -> bool {
        const EPS: f64 = 1e-9;
        (self.cell_size_deg - cell_size_deg).abs() < EPS
            && (self.origin.0 - origin.0).abs() < EPS
            && (self.origin.1 - origin.1).abs() < EPS
    }
}

/// Load a serialized grid. Returns `None` if the file does not exist.
pub fn load_grid(path: &Path) -> Result<Option<GridFile>> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| Error::GridStore {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Save a grid, replacing any previous file atomically.
pub fn save_grid(path: &Path, grid: &GridFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::OutputDirCreateFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let json = serde_json::to_string(grid).map_err(|e| Error::GridStore {
        path: path.to_path_buf(),
        source: e,
    })?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
