//! Hotspot alerts as a tile source.
//!
//! Active-fire detections become small square tiles centred on the detection,
//! each searched in a window around the detection time. The alert set behind
//! a run is saved in the run directory, so a resumed run fetches exactly the
//! same tiles under the same names.

mod firms;

pub use firms::{FirmsArchive, FirmsSettings, archive_url, parse_firms_csv};

use crate::constants::{columns, fetch::TIMESTAMP_FORMAT};
use crate::error::{Error, Result};
use crate::fetch::{DateWindow, FetchJob};
use crate::geo::{BoundingBox, Tile, TileId};
use crate::output::{read_log, write_log};
use crate::pipeline::{TaskOutcome, WorkerPool};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// One active-fire detection.
#[derive(Debug, Clone, PartialEq)]
pub struct HotspotAlert {
    /// Detection latitude.
    pub latitude: f64,
    /// Detection longitude.
    pub longitude: f64,
    /// Satellite overpass time.
    pub acquired: DateTime<Utc>,
    /// Product confidence as published (class letter or percentage).
    pub confidence: String,
}

/// Source of daily alert lists.
pub trait AlertSource: Send + Sync {
    /// Alerts detected on `date`. A day with no published file is empty.
    fn alerts_for(&self, date: NaiveDate) -> impl Future<Output = Result<Vec<HotspotAlert>>> + Send;
}

/// How alerts become fetch jobs.
#[derive(Debug, Clone)]
pub struct AlertSettings {
    /// Days to download.
    pub dates: Vec<NaiveDate>,
    /// Half the tile edge, in degrees.
    pub buffer_deg: f64,
    /// Search window either side of each detection.
    pub window_hours: i64,
    /// Concurrent daily downloads.
    pub download_workers: usize,
}

/// Download every day through the worker pool and concatenate in date order.
///
/// Any failed day fails the whole collection, so nothing partial is saved.
pub async fn collect_alerts<S>(
    source: Arc<S>,
    dates: &[NaiveDate],
    workers: usize,
) -> Result<Vec<HotspotAlert>>
where
    S: AlertSource + 'static,
{
    let outcomes = WorkerPool::new(workers)
        .drain(
            dates.to_vec(),
            move |date| {
                let source = Arc::clone(&source);
                async move { (date, source.alerts_for(date).await) }
            },
            None,
        )
        .await;

    let mut alerts = Vec::new();
    for outcome in outcomes {
        match outcome {
            TaskOutcome::Completed((date, Ok(day))) => {
                info!("{date}: {} alert(s)", day.len());
                alerts.extend(day);
            }
            TaskOutcome::Completed((date, Err(e))) => {
                warn!("{date}: alert download failed: {e}");
                return Err(e);
            }
            TaskOutcome::Panicked => {
                return Err(Error::Internal {
                    message: "alert download task panicked".to_string(),
                });
            }
        }
    }
    Ok(alerts)
}

/// Keep alerts inside `bounds`, ordered by time then position.
pub fn select_alerts(mut alerts: Vec<HotspotAlert>, bounds: &BoundingBox) -> Vec<HotspotAlert> {
    alerts.retain(|a| bounds.contains(a.longitude, a.latitude));
    alerts.sort_by(|a, b| {
        a.acquired
            .cmp(&b.acquired)
            .then(a.latitude.total_cmp(&b.latitude))
            .then(a.longitude.total_cmp(&b.longitude))
    });
    alerts
}

/// One fetch job per alert: a square of `buffer_deg` around the detection,
/// searched within `window_hours` of it.
pub fn alert_jobs(alerts: &[HotspotAlert], buffer_deg: f64, window_hours: i64) -> Result<Vec<FetchJob>> {
    alerts
        .iter()
        .enumerate()
        .map(|(index, alert)| {
            let col = u32::try_from(index).map_err(|_| Error::Internal {
                message: format!("too many alerts ({})", alerts.len()),
            })?;
            Ok(FetchJob {
                tile: Tile {
                    index,
                    id: TileId { col, row: 0 },
                    bounds: BoundingBox::new(
                        alert.longitude - buffer_deg,
                        alert.latitude - buffer_deg,
                        alert.longitude + buffer_deg,
                        alert.latitude + buffer_deg,
                    ),
                },
                window: DateWindow::around(alert.acquired, Duration::hours(window_hours)),
            })
        })
        .collect()
}

/// Write the alert set of a run. Row `i` backs tile `i`.
pub fn save_alerts(path: &Path, alerts: &[HotspotAlert]) -> Result<usize> {
    let header: Vec<String> = columns::ALERTS_HEADER.iter().map(ToString::to_string).collect();
    let rows: Vec<csv::StringRecord> = alerts
        .iter()
        .enumerate()
        .map(|(index, a)| {
            csv::StringRecord::from(vec![
                format!("tile_{index:03}.png"),
                a.latitude.to_string(),
                a.longitude.to_string(),
                a.acquired.format(TIMESTAMP_FORMAT).to_string(),
                a.confidence.clone(),
            ])
        })
        .collect();
    write_log(path, &header, &rows)
}

/// Read a saved alert set, or `None` if the run has none yet.
pub fn load_alerts(path: &Path) -> Result<Option<Vec<HotspotAlert>>> {
    if !path.exists() {
        return Ok(None);
    }

    let log = read_log(path)?;
    let column = |name: &str| {
        log.column(name).ok_or_else(|| Error::MissingColumn {
            path: path.to_path_buf(),
            column: name.to_string(),
        })
    };
    let (lat, lon, acquired, confidence) = (
        column("latitude")?,
        column("longitude")?,
        column("acquired_utc")?,
        column("confidence")?,
    );

    let bad_row = |row: usize, reason: String| Error::ProviderResponse {
        reason: format!("{} row {}: {reason}", path.display(), row + 2),
    };

    log.rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            Ok(HotspotAlert {
                latitude: row[lat].parse().map_err(|_| bad_row(i, "bad latitude".into()))?,
                longitude: row[lon].parse().map_err(|_| bad_row(i, "bad longitude".into()))?,
                acquired: NaiveDateTime::parse_from_str(&row[acquired], TIMESTAMP_FORMAT)
                    .map_err(|e| bad_row(i, e.to_string()))?
                    .and_utc(),
                confidence: row[confidence].to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}
