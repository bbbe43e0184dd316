//! Geographic primitives: bounding boxes, tiles and the territory boundary.

mod boundary;

pub use boundary::{BoundaryService, PolygonBoundary};

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle in EPSG:4326 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western edge.
    pub lon_min: f64,
    /// Southern edge.
    pub lat_min: f64,
    /// Eastern edge.
    pub lon_max: f64,
    /// Northern edge.
    pub lat_max: f64,
}

impl BoundingBox {
    /// Create a bounding box from its edges.
    pub const fn new(lon_min: f64, lat_min: f64, lon_max: f64, lat_max: f64) -> Self {
        Self {
            lon_min,
            lat_min,
            lon_max,
            lat_max,
        }
    }

    /// Smallest box containing every point, or `None` for an empty iterator.
    pub fn enclosing<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        points.into_iter().fold(None, |acc, (lon, lat)| {
            Some(acc.map_or(Self::new(lon, lat, lon, lat), |b: Self| Self {
                lon_min: b.lon_min.min(lon),
                lat_min: b.lat_min.min(lat),
                lon_max: b.lon_max.max(lon),
                lat_max: b.lat_max.max(lat),
            }))
        })
    }

    /// Center point as `(lon, lat)`.
    pub fn center(&self) -> (f64, f64) {
        (
            f64::midpoint(self.lon_min, self.lon_max),
            f64::midpoint(self.lat_min, self.lat_max),
        )
    }

    /// Box grown by `margin` degrees on every side.
    pub fn expanded(&self, margin: f64) -> Self {
        Self::new(
            self.lon_min - margin,
            self.lat_min - margin,
            self.lon_max + margin,
            self.lat_max + margin,
        )
    }

    /// Whether the point lies inside or on the edge of the box.
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.lon_min..=self.lon_max).contains(&lon) && (self.lat_min..=self.lat_max).contains(&lat)
    }

    /// Whether two boxes share any point.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.lon_min <= other.lon_max
            && other.lon_min <= self.lon_max
            && self.lat_min <= other.lat_max
            && other.lat_min <= self.lat_max
    }

    /// Corners in counter-clockwise order starting at the south-west.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.lon_min, self.lat_min),
            (self.lon_max, self.lat_min),
            (self.lon_max, self.lat_max),
            (self.lon_min, self.lat_max),
        ]
    }
}

/// Lattice position of a tile: column along longitude, row along latitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileId {
    /// Longitude step index from the grid origin.
    pub col: u32,
    /// Latitude step index from the grid origin.
    pub row: u32,
}

impl std::fmt::Display for TileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.col, self.row)
    }
}

/// One retained cell of the partition grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    /// Position in the retained, lattice-ordered tile sequence.
    pub index: usize,
    /// Stable lattice id.
    pub id: TileId,
    /// Cell extent.
    pub bounds: BoundingBox,
}

impl Tile {
    /// Deterministic image file name for this tile.
    pub fn image_name(&self) -> String {
        format!("tile_{:03}.png", self.index)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_enclosing_box() {
        let b = BoundingBox::enclosing([(1.0, 2.0), (-3.0, 5.0), (0.5, -1.0)]).unwrap();
        assert_eq!(b, BoundingBox::new(-3.0, -1.0, 1.0, 5.0));
        assert!(BoundingBox::enclosing(std::iter::empty()).is_none());
    }

    #[test]
    fn test_center_and_contains() {
        let b = BoundingBox::new(0.0, 0.0, 2.0, 4.0);
        assert_eq!(b.center(), (1.0, 2.0));
        assert!(b.contains(2.0, 4.0));
        assert!(!b.contains(2.1, 1.0));
    }

    #[test]
    fn test_overlaps_touching_edges() {
        let a = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let b = BoundingBox::new(1.0, 0.0, 2.0, 1.0);
        let c = BoundingBox::new(1.5, 1.5, 2.0, 2.0);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_image_name_is_zero_padded() {
        let tile = Tile {
            index: 3,
            id: TileId { col: 0, row: 3 },
            bounds: BoundingBox::new(0.0, 0.0, 1.0, 1.0),
        };
        assert_eq!(tile.image_name(), "tile_003.png");
    }
}
