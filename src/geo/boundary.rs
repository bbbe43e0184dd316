//! Territory boundary geometry.

use super::BoundingBox;
use crate::error::{Error, Result};
use serde_json::Value;
use std::future::Future;
use std::path::Path;

/// Geometry capability used by the grid partitioner.
pub trait BoundaryService: Send + Sync {
    /// Bounding box of the territory.
    fn bounds(&self) -> BoundingBox;

    /// Whether `cell` intersects the territory within the service's error margin.
    fn intersects(&self, cell: &BoundingBox) -> impl Future<Output = Result<bool>> + Send;
}

type Ring = Vec<(f64, f64)>;

/// Polygon with an exterior ring followed by zero or more holes.
#[derive(Debug, Clone)]
struct Polygon {
    rings: Vec<Ring>,
}

/// Territory boundary held in memory as one or more polygons.
#[derive(Debug, Clone)]
pub struct PolygonBoundary {
    polygons: Vec<Polygon>,
    bounds: BoundingBox,
    margin_deg: f64,
}

impl PolygonBoundary {
    /// Load a boundary from a GeoJSON file.
    ///
    /// Accepts a `Polygon`, `MultiPolygon`, `Feature` or `FeatureCollection`;
    /// every polygon found is part of the territory.
    pub fn from_geojson_file(path: &Path, margin_deg: f64) -> Result<Self> {
        let load_err = |reason: String| Error::BoundaryLoad {
            path: path.to_path_buf(),
            reason,
        };

        let contents = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let value: Value = serde_json::from_str(&contents).map_err(|e| load_err(e.to_string()))?;

        let mut polygons = Vec::new();
        collect_polygons(&value, &mut polygons).map_err(load_err)?;
        Self::from_polygons(polygons, margin_deg).map_err(load_err)
    }

    /// Build a boundary from a single exterior ring.
    pub fn from_ring(ring: Vec<(f64, f64)>, margin_deg: f64) -> Result<Self> {
        Self::from_polygons(vec![Polygon { rings: vec![ring] }], margin_deg).map_err(|reason| {
            Error::BoundaryLoad {
                path: "<inline>".into(),
                reason,
            }
        })
    }

    fn from_polygons(polygons: Vec<Polygon>, margin_deg: f64) -> std::result::Result<Self, String> {
        let bounds = BoundingBox::enclosing(
            polygons
                .iter()
                .filter_map(|p| p.rings.first())
                .flat_map(|ring| ring.iter().copied()),
        )
        .ok_or_else(|| "no polygon coordinates found".to_string())?;

        Ok(Self {
            polygons,
            bounds,
            margin_deg,
        })
    }

    /// Synchronous intersection test against the rectangle grown by the margin.
    pub fn intersects_box(&self, cell: &BoundingBox) -> bool {
        let cell = cell.expanded(self.margin_deg);
        if !cell.overlaps(&self.bounds) {
            return false;
        }

        self.polygons.iter().any(|polygon| {
            let Some(exterior) = polygon.rings.first() else {
                return false;
            };

            exterior.iter().any(|&(lon, lat)| cell.contains(lon, lat))
                || cell
                    .corners()
                    .iter()
                    .any(|&(lon, lat)| polygon.contains(lon, lat))
                || polygon.rings.iter().any(|ring| ring_crosses_box(ring, &cell))
        })
    }
}

impl BoundaryService for PolygonBoundary {
    fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    async fn intersects(&self, cell: &BoundingBox) -> Result<bool> {
        Ok(self.intersects_box(cell))
    }
}

impl Polygon {
    /// Even-odd point in polygon test; holes count as outside.
    fn contains(&self, lon: f64, lat: f64) -> bool {
        let mut inside = false;
        for ring in &self.rings {
            if ring_contains(ring, lon, lat) {
                inside = !inside;
            }
        }
        inside
    }
}

fn ring_contains(ring: &[(f64, f64)], x: f64, y: f64) -> bool {
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = ring[i];
        let (xj, yj) = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn ring_crosses_box(ring: &[(f64, f64)], cell: &BoundingBox) -> bool {
    let corners = cell.corners();
    let edges = [
        (corners[0], corners[1]),
        (corners[1], corners[2]),
        (corners[2], corners[3]),
        (corners[3], corners[0]),
    ];

    ring.windows(2).any(|w| {
        edges
            .iter()
            .any(|&(a, b)| segments_intersect(w[0], w[1], a, b))
    })
}

fn orientation(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> f64 {
    (q.0 - p.0).mul_add(r.1 - p.1, -((q.1 - p.1) * (r.0 - p.0)))
}

fn on_segment(p: (f64, f64), q: (f64, f64), r: (f64, f64)) -> bool {
    q.0 <= p.0.max(r.0) && q.0 >= p.0.min(r.0) && q.1 <= p.1.max(r.1) && q.1 >= p.1.min(r.1)
}

fn segments_intersect(p1: (f64, f64), p2: (f64, f64), q1: (f64, f64), q2: (f64, f64)) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(q1, p1, q2))
        || (d2 == 0.0 && on_segment(q1, p2, q2))
        || (d3 == 0.0 && on_segment(p1, q1, p2))
        || (d4 == 0.0 && on_segment(p1, q2, p2))
}

fn collect_polygons(value: &Value, out: &mut Vec<Polygon>) -> std::result::Result<(), String> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| "GeoJSON object without a type".to_string())?;

    match kind {
        "FeatureCollection" => {
            let features = value
                .get("features")
                .and_then(Value::as_array)
                .ok_or_else(|| "FeatureCollection without features".to_string())?;
            for feature in features {
                collect_polygons(feature, out)?;
            }
        }
        "Feature" => {
            if let Some(geometry) = value.get("geometry").filter(|g| !g.is_null()) {
                collect_polygons(geometry, out)?;
            }
        }
        "Polygon" => {
            let coords = value
                .get("coordinates")
                .ok_or_else(|| "Polygon without coordinates".to_string())?;
            out.push(parse_polygon(coords)?);
        }
        "MultiPolygon" => {
            let polygons = value
                .get("coordinates")
                .and_then(Value::as_array)
                .ok_or_else(|| "MultiPolygon without coordinates".to_string())?;
            for coords in polygons {
                out.push(parse_polygon(coords)?);
            }
        }
        other => return Err(format!("unsupported geometry type '{other}'")),
    }

    Ok(())
}

fn parse_polygon(coords: &Value) -> std::result::Result<Polygon, String> {
    let rings = coords
        .as_array()
        .ok_or_else(|| "polygon coordinates must be an array of rings".to_string())?
        .iter()
        .map(parse_ring)
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if rings.is_empty() {
        return Err("polygon has no rings".to_string());
    }
    Ok(Polygon { rings })
}

fn parse_ring(ring: &Value) -> std::result::Result<Ring, String> {
    ring.as_array()
        .ok_or_else(|| "ring must be an array of positions".to_string())?
        .iter()
        .map(|pos| match pos.as_array().map(Vec::as_slice) {
            Some([lon, lat, ..]) => lon
                .as_f64()
                .zip(lat.as_f64())
                .ok_or_else(|| "position values must be numbers".to_string()),
            _ => Err("position must have at least two values".to_string()),
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn unit_square() -> PolygonBoundary {
        PolygonBoundary::from_ring(
            vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)],
            0.0,
        )
        .unwrap()
    }

    #[test]
    fn test_box_inside_polygon() {
        let b = unit_square();
        assert!(b.intersects_box(&BoundingBox::new(0.2, 0.2, 0.4, 0.4)));
    }

    #[test]
    fn test_polygon_inside_box() {
        let b = unit_square();
        assert!(b.intersects_box(&BoundingBox::new(-1.0, -1.0, 2.0, 2.0)));
    }

    #[test]
    fn test_disjoint_box() {
        let b = unit_square();
        assert!(!b.intersects_box(&BoundingBox::new(1.5, 1.5, 2.0, 2.0)));
    }

    #[test]
    fn test_margin_includes_near_miss() {
        let strict = unit_square();
        let loose = PolygonBoundary::from_ring(
            vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)],
            0.2,
        )
        .unwrap();
        let near = BoundingBox::new(1.1, 0.2, 1.5, 0.4);
        assert!(!strict.intersects_box(&near));
        assert!(loose.intersects_box(&near));
    }

    #[test]
    fn test_crossing_without_contained_vertices() {
        // Thin horizontal bar crossing a thin vertical box: no vertex of
        // either lies inside the other.
        let bar = PolygonBoundary::from_ring(
            vec![(-1.0, 0.4), (2.0, 0.4), (2.0, 0.6), (-1.0, 0.6), (-1.0, 0.4)],
            0.0,
        )
        .unwrap();
        assert!(bar.intersects_box(&BoundingBox::new(0.4, -1.0, 0.6, 2.0)));
    }

    #[test]
    fn test_box_inside_hole_is_outside() {
        let json = r#"{"type":"Polygon","coordinates":[
            [[0,0],[10,0],[10,10],[0,10],[0,0]],
            [[3,3],[7,3],[7,7],[3,7],[3,3]]
        ]}"#;
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{json}").unwrap();
        let b = PolygonBoundary::from_geojson_file(file.path(), 0.0).unwrap();
        assert!(!b.intersects_box(&BoundingBox::new(4.0, 4.0, 5.0, 5.0)));
        assert!(b.intersects_box(&BoundingBox::new(1.0, 1.0, 2.0, 2.0)));
    }

    #[test]
    fn test_load_feature_collection_bounds() {
        let json = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{},"geometry":{"type":"MultiPolygon","coordinates":[
                [[[-58.4,-35.0],[-53.1,-35.0],[-53.1,-30.1],[-58.4,-30.1],[-58.4,-35.0]]]
            ]}}
        ]}"#;
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{json}").unwrap();
        let b = PolygonBoundary::from_geojson_file(file.path(), 0.0).unwrap();
        assert_eq!(
            b.bounds(),
            BoundingBox::new(-58.4, -35.0, -53.1, -30.1)
        );
    }

    #[test]
    fn test_unsupported_geometry_is_load_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"type":"Point","coordinates":[0,0]}}"#).unwrap();
        let result = PolygonBoundary::from_geojson_file(file.path(), 0.0);
        assert!(matches!(result, Err(Error::BoundaryLoad { .. })));
    }
}
