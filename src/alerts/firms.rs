//! NASA FIRMS near-real-time archive client.
//!
//! Daily detections are plain CSV files at
//! `{archive}/{sensor dir}/{region}/{prefix}{YYYYDDD}.txt`, served behind a
//! bearer token. A day that has not been published yet returns 404.

use super::{AlertSource, HotspotAlert};
use crate::config::FirmsSensor;
use crate::error::{Error, Result};
use chrono::{NaiveDate, NaiveTime};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection settings for [`FirmsArchive`].
#[derive(Debug, Clone)]
pub struct FirmsSettings {
    /// Archive root URL.
    pub archive_url: String,
    /// Region directory, e.g. `South_America`.
    pub region: String,
    /// Detection product.
    pub sensor: FirmsSensor,
    /// Optional bearer token.
    pub token: Option<String>,
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
}

/// Alert source reading the FIRMS NRT archive over HTTP.
pub struct FirmsArchive {
    client: Client,
    settings: FirmsSettings,
}

impl FirmsArchive {
    /// Build an archive client with its own HTTP client.
    pub fn new(settings: FirmsSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::Internal {
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self { client, settings })
    }
}

/// URL of the daily file for `date`.
pub fn archive_url(base: &str, region: &str, sensor: FirmsSensor, date: NaiveDate) -> String {
    format!(
        "{}/{}/{region}/{}{}.txt",
        base.trim_end_matches('/'),
        sensor.archive_dir(),
        sensor.file_prefix(region),
        date.format("%Y%j")
    )
}

#[derive(Debug, Deserialize)]
struct FirmsRow {
    latitude: f64,
    longitude: f64,
    acq_date: String,
    acq_time: String,
    #[serde(default)]
    confidence: String,
}

/// Parse a FIRMS CSV file. Rows that cannot be read are skipped.
///
/// `acq_time` is `HHMM`, sometimes with the leading zeros dropped (`412`) or
/// written as `04:12`.
pub fn parse_firms_csv(text: &str) -> Result<Vec<HotspotAlert>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers().map_err(|e| Error::ProviderResponse {
        reason: format!("FIRMS file header: {e}"),
    })?;
    for required in ["latitude", "longitude", "acq_date", "acq_time"] {
        if !headers.iter().any(|h| h == required) {
            return Err(Error::ProviderResponse {
                reason: format!("FIRMS file has no '{required}' column"),
            });
        }
    }

    let mut alerts = Vec::new();
    for (line, result) in reader.deserialize::<FirmsRow>().enumerate() {
        match result.map_err(|e| e.to_string()).and_then(to_alert) {
            Ok(alert) => alerts.push(alert),
            Err(e) => warn!("FIRMS row {}: {e}", line + 2),
        }
    }
    Ok(alerts)
}

fn to_alert(row: FirmsRow) -> std::result::Result<HotspotAlert, String> {
    let date = NaiveDate::parse_from_str(&row.acq_date, "%Y-%m-%d")
        .map_err(|_| format!("bad acq_date '{}'", row.acq_date))?;

    let digits: String = row.acq_time.chars().filter(char::is_ascii_digit).collect();
    let time = NaiveTime::parse_from_str(&format!("{digits:0>4}"), "%H%M")
        .map_err(|_| format!("bad acq_time '{}'", row.acq_time))?;

    Ok(HotspotAlert {
        latitude: row.latitude,
        longitude: row.longitude,
        acquired: date.and_time(time).and_utc(),
        confidence: row.confidence,
    })
}

impl AlertSource for FirmsArchive {
    async fn alerts_for(&self, date: NaiveDate) -> Result<Vec<HotspotAlert>> {
        let s = &self.settings;
        let url = archive_url(&s.archive_url, &s.region, s.sensor, date);
        debug!("Downloading {url}");

        let mut request = self.client.get(&url);
        if let Some(token) = &s.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| Error::Transport {
            url: url.clone(),
            source: e,
        })?;

        if response.status() == StatusCode::NOT_FOUND {
            info!("{date}: no {} file published", s.sensor);
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(Error::HttpStatus {
                url,
                status: response.status().as_u16(),
            });
        }

        let text = response.text().await.map_err(|e| Error::Transport {
            url: url.clone(),
            source: e,
        })?;
        parse_firms_csv(&text)
    }
}
