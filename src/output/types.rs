//! Record types persisted by the pipeline stages.

use crate::constants::{columns, confidence::DECIMAL_PLACES, fetch::TIMESTAMP_FORMAT};
use crate::geo::BoundingBox;
use crate::output::LogRecord;
use chrono::{DateTime, Utc};

/// One successfully fetched tile image.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRecord {
    /// File name of the image inside the run's image directory.
    pub image_name: String,
    /// Tile extent.
    pub bounds: BoundingBox,
    /// Tile center `(lon, lat)`.
    pub center: (f64, f64),
    /// Acquisition time of the source asset.
    pub timestamp_utc: DateTime<Utc>,
}

impl FetchRecord {
    /// Build a record, deriving the center from the bounds.
    pub fn new(image_name: String, bounds: BoundingBox, timestamp_utc: DateTime<Utc>) -> Self {
        Self {
            image_name,
            center: bounds.center(),
            bounds,
            timestamp_utc,
        }
    }

    /// Metadata log header.
    pub fn header() -> Vec<String> {
        columns::METADATA_HEADER
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

impl LogRecord for FetchRecord {
    fn to_row(&self) -> Vec<String> {
        vec![
            self.image_name.clone(),
            self.bounds.lon_min.to_string(),
            self.bounds.lat_min.to_string(),
            self.bounds.lon_max.to_string(),
            self.bounds.lat_max.to_string(),
            self.center.0.to_string(),
            self.center.1.to_string(),
            self.timestamp_utc.format(TIMESTAMP_FORMAT).to_string(),
        ]
    }
}

/// Classification result for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    /// Image file name.
    pub filename: String,
    /// Highest-probability label.
    pub prediction: String,
    /// Probability of the predicted label.
    pub confidence: f32,
    /// Probability per class, in label order.
    pub probabilities: Vec<f32>,
}

impl PredictionRecord {
    /// Predictions log header for a label set.
    ///
    /// `Fire` and `No_Fire` become `prob_fire` and `prob_no_fire`.
    pub fn header(labels: &[String]) -> Vec<String> {
        let mut header = vec![
            columns::FILENAME.to_string(),
            columns::PREDICTION.to_string(),
            columns::CONFIDENCE.to_string(),
        ];
        header.extend(labels.iter().map(|l| probability_column(l)));
        header
    }
}

impl LogRecord for PredictionRecord {
    fn to_row(&self) -> Vec<String> {
        let mut row = vec![
            self.filename.clone(),
            self.prediction.clone(),
            format!("{:.decimal$}", self.confidence, decimal = DECIMAL_PLACES),
        ];
        row.extend(
            self.probabilities
                .iter()
                .map(|p| format!("{p:.decimal$}", decimal = DECIMAL_PLACES)),
        );
        row
    }
}

/// Column name of the probability for `label`.
pub fn probability_column(label: &str) -> String {
    let slug: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}{slug}", columns::PROB_PREFIX)
}
