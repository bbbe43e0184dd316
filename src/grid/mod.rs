//! Tile grid partitioning over the territory boundary.

mod store;

pub use store::{GridFile, load_grid, save_grid};

use crate::constants::KM_PER_DEGREE;
use crate::error::{Error, Result};
use crate::geo::{BoundaryService, BoundingBox, Tile, TileId};
use crate::pipeline::{TaskOutcome, WorkerPool};
use indicatif::ProgressBar;
use std::sync::Arc;
use tracing::{debug, info};

/// Convert a distance in kilometres to degrees using the flat approximation.
pub fn km_to_degrees(km: f64) -> f64 {
    km / KM_PER_DEGREE
}

/// Number of lattice steps of `step` whose start lies strictly before `span`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn lattice_steps(span: f64, step: f64) -> u32 {
    if span <= 0.0 || step <= 0.0 {
        return 0;
    }
    // Tolerate float noise so exact multiples do not gain an extra cell.
    let steps = (span / step - 1e-9).ceil().max(1.0) as u32;
    let mut n = steps;
    while n > 1 && f64::from(n - 1) * step >= span {
        n -= 1;
    }
    n
}

/// Enumerate candidate cells over `bounds`, longitude-major then latitude.
pub fn lattice(bounds: &BoundingBox, cell_size_deg: f64) -> Vec<(TileId, BoundingBox)> {
    let cols = lattice_steps(bounds.lon_max - bounds.lon_min, cell_size_deg);
    let rows = lattice_steps(bounds.lat_max - bounds.lat_min, cell_size_deg);

    let mut cells = Vec::with_capacity(cols as usize * rows as usize);
    for col in 0..cols {
        let lon = f64::from(col).mul_add(cell_size_deg, bounds.lon_min);
        for row in 0..rows {
            let lat = f64::from(row).mul_add(cell_size_deg, bounds.lat_min);
            cells.push((
                TileId { col, row },
                BoundingBox::new(lon, lat, lon + cell_size_deg, lat + cell_size_deg),
            ));
        }
    }
    cells
}

/// Derives the tile grid for a territory.
pub struct GridPartitioner<B> {
    boundary: Arc<B>,
    cell_size_deg: f64,
    pool: WorkerPool,
}

impl<B> GridPartitioner<B>
where
    B: BoundaryService + 'static,
{
    /// Create a partitioner with a cell size in degrees and a validation pool.
    pub fn new(boundary: Arc<B>, cell_size_deg: f64, workers: usize) -> Self {
        Self {
            boundary,
            cell_size_deg,
            pool: WorkerPool::new(workers),
        }
    }

    /// Cell size in degrees.
    pub fn cell_size_deg(&self) -> f64 {
        self.cell_size_deg
    }

    /// Lattice origin (south-west corner of the boundary's bounding box).
    pub fn origin(&self) -> (f64, f64) {
        let b = self.boundary.bounds();
        (b.lon_min, b.lat_min)
    }

    /// Number of candidate cells before intersection pruning.
    pub fn candidate_count(&self) -> usize {
        lattice(&self.boundary.bounds(), self.cell_size_deg).len()
    }

    /// Walk the lattice and keep the cells that intersect the boundary.
    ///
    /// Intersection tests run concurrently; the returned order is the lattice
    /// walk order and tile indices are assigned in that order.
    pub async fn partition(&self, progress: Option<&ProgressBar>) -> Result<Vec<Tile>> {
        let candidates = lattice(&self.boundary.bounds(), self.cell_size_deg);
        info!(
            "Testing {} candidate cells ({} concurrent)",
            candidates.len(),
            self.pool.workers()
        );

        let boundary = Arc::clone(&self.boundary);
        let outcomes = self
            .pool
            .drain(
                candidates.clone(),
                move |(_, cell)| {
                    let boundary = Arc::clone(&boundary);
                    async move { boundary.intersects(&cell).await }
                },
                progress,
            )
            .await;

        let mut tiles = Vec::new();
        for ((id, bounds), outcome) in candidates.into_iter().zip(outcomes) {
            let keep = match outcome {
                TaskOutcome::Completed(result) => result?,
                TaskOutcome::Panicked => {
                    return Err(Error::Internal {
                        message: format!("intersection test for cell {id} panicked"),
                    });
                }
            };
            if keep {
                tiles.push(Tile {
                    index: tiles.len(),
                    id,
                    bounds,
                });
            } else {
                debug!("Pruned cell {id}");
            }
        }

        info!("Retained {} tiles", tiles.len());
        Ok(tiles)
    }
}
