//! Imagery provider capability.

use crate::error::Result;
use crate::geo::BoundingBox;
use chrono::{DateTime, Duration, Utc};
use std::future::Future;

/// Inclusive acquisition time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    /// Window start.
    pub start: DateTime<Utc>,
    /// Window end.
    pub end: DateTime<Utc>,
}

impl DateWindow {
    /// Window of `days` ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    /// Window reaching `half_width` either side of `center`.
    pub fn around(center: DateTime<Utc>, half_width: Duration) -> Self {
        Self {
            start: center - half_width,
            end: center + half_width,
        }
    }

    /// RFC 3339 interval `start/end`.
    pub fn interval(&self) -> String {
        format!(
            "{}/{}",
            self.start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        )
    }

    /// Whether `t` lies inside the window.
    pub fn contains(&self, t: &DateTime<Utc>) -> bool {
        (self.start..=self.end).contains(t)
    }
}

/// One image available from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAsset {
    /// Provider-specific asset id.
    pub id: String,
    /// Collection the asset belongs to.
    pub collection: String,
    /// Acquisition time.
    pub acquired: DateTime<Utc>,
}

/// How an asset should be rendered to a raster.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    /// Region to render.
    pub bounds: BoundingBox,
    /// Bands mapped to red, green and blue.
    pub bands: Vec<String>,
    /// Output edge length in pixels.
    pub dimensions: u32,
    /// Linear rescale range `(min, max)` applied to band values.
    pub rescale: (f64, f64),
}

/// Remote imagery source.
pub trait ImageryProvider: Send + Sync {
    /// Images intersecting `bounds` acquired within `window`, newest first.
    fn search(
        &self,
        bounds: &BoundingBox,
        window: &DateWindow,
    ) -> impl Future<Output = Result<Vec<ImageAsset>>> + Send;

    /// Render `asset` and return the encoded PNG bytes.
    fn render(
        &self,
        asset: &ImageAsset,
        request: &RenderRequest,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_interval() {
        let end = Utc.with_ymd_and_hms(2025, 2, 21, 0, 0, 0).unwrap();
        let window = DateWindow::ending_at(end, 20);
        assert_eq!(window.interval(), "2025-02-01T00:00:00Z/2025-02-21T00:00:00Z");
        assert!(window.contains(&Utc.with_ymd_and_hms(2025, 2, 10, 12, 0, 0).unwrap()));
        assert!(!window.contains(&Utc.with_ymd_and_hms(2025, 1, 31, 23, 0, 0).unwrap()));
    }

    #[test]
    fn test_window_around() {
        let alert = Utc.with_ymd_and_hms(2025, 1, 12, 4, 12, 0).unwrap();
        let window = DateWindow::around(alert, Duration::hours(10));
        assert_eq!(window.interval(), "2025-01-11T18:12:00Z/2025-01-12T14:12:00Z");
        assert!(window.contains(&window.end));
    }
}
