//! Application-wide constants.
//!
//! All magic numbers and strings are defined here to ensure consistency
//! and make changes easy to track.

/// Application name used for config directories and user-facing messages.
pub const APP_NAME: &str = "firewatch";

/// Approximate kilometres per degree of latitude (and of longitude at the equator).
pub const KM_PER_DEGREE: f64 = 111.0;

/// Grid partitioning defaults.
pub mod grid {
    /// Default cell edge length in kilometres.
    pub const DEFAULT_CELL_SIZE_KM: f64 = 4.0;

    /// Default number of concurrent intersection tests.
    pub const DEFAULT_WORKERS: usize = 8;

    /// Default intersection error margin in metres.
    pub const DEFAULT_ERROR_MARGIN_M: f64 = 1.0;

    /// File name of the serialized grid inside the data directory.
    pub const TILES_FILE: &str = "tiles.json";
}

/// Fetch stage defaults.
pub mod fetch {
    /// Default number of concurrent fetch tasks.
    pub const DEFAULT_WORKERS: usize = 10;

    /// Default look-back window in days.
    pub const DEFAULT_WINDOW_DAYS: i64 = 20;

    /// Default rendered image edge length in pixels.
    pub const DEFAULT_DIMENSIONS: u32 = 512;

    /// Default rescale lower bound.
    pub const DEFAULT_RESCALE_MIN: f64 = 0.0;

    /// Default rescale upper bound.
    pub const DEFAULT_RESCALE_MAX: f64 = 3000.0;

    /// Default band selection (red, green, blue).
    pub const DEFAULT_BANDS: [&str; 3] = ["B4", "B3", "B2"];

    /// Default number of search results requested per tile.
    pub const SEARCH_LIMIT: usize = 10;

    /// Default HTTP request timeout in seconds.
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

    /// Default HTTP connect timeout in seconds.
    pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

    /// Timestamp format written to the metadata log.
    pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
}

/// Hotspot alert defaults.
pub mod alerts {
    /// NRT archive root.
    pub const DEFAULT_ARCHIVE_URL: &str = "https://nrt3.modaps.eosdis.nasa.gov/archive/FIRMS";

    /// Archive region directory.
    pub const DEFAULT_REGION: &str = "South_America";

    /// Environment variable holding the archive token.
    pub const DEFAULT_TOKEN_ENV: &str = "FIRMS_TOKEN";

    /// Half the edge length of an alert tile, in metres.
    pub const DEFAULT_BUFFER_M: f64 = 2000.0;

    /// Search window either side of the detection time, in hours.
    pub const DEFAULT_WINDOW_HOURS: i64 = 10;

    /// Concurrent alert file downloads.
    pub const DEFAULT_DOWNLOAD_WORKERS: usize = 5;
}

/// Batch size defaults by execution device.
pub mod batch_size {
    /// CPU batch size.
    pub const CPU: usize = 8;

    /// Accelerated (GPU) batch size.
    pub const GPU: usize = 32;

    /// Hard upper bound on configured batch sizes.
    pub const MAX: usize = 512;
}

/// Inference defaults.
pub mod inference {
    /// Default label of the positive class.
    pub const DEFAULT_POSITIVE_LABEL: &str = "Fire";

    /// Default square model input edge length in pixels.
    pub const DEFAULT_IMAGE_SIZE: u32 = 224;

    /// `ImageNet` channel means.
    pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

    /// `ImageNet` channel standard deviations.
    pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

    /// Image file extensions accepted by the inference stage.
    pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];
}

/// Run directory layout.
pub mod layout {
    /// Subdirectory of the data directory holding runs.
    pub const RUNS_DIR: &str = "runs";
    /// Fetched images subdirectory.
    pub const IMAGES_DIR: &str = "images";
    /// Positive-class image copies subdirectory.
    pub const FIRE_DIR: &str = "fire";
    /// Fetch metadata log.
    pub const METADATA_LOG: &str = "metadata.csv";
    /// Predictions log.
    pub const PREDICTIONS_LOG: &str = "predictions.csv";
    /// Filtered positive-class log.
    pub const FIRE_LOG: &str = "predictions_fire.csv";
    /// Hotspot alerts behind an alert run's tiles.
    pub const ALERTS_LOG: &str = "alerts.csv";
    /// Run id timestamp format.
    pub const RUN_ID_FORMAT: &str = "%Y%m%d_%H%M%S";
}

/// Log column names.
pub mod columns {
    /// Identifier column of the fetch metadata log.
    pub const IMAGE_NAME: &str = "image_name";
    /// Identifier column of the predictions log.
    pub const FILENAME: &str = "filename";
    /// Predicted label column.
    pub const PREDICTION: &str = "prediction";
    /// Confidence column.
    pub const CONFIDENCE: &str = "confidence";
    /// Prefix of per-class probability columns.
    pub const PROB_PREFIX: &str = "prob_";
    /// Alert log header.
    pub const ALERTS_HEADER: [&str; 5] =
        [IMAGE_NAME, "latitude", "longitude", "acquired_utc", "confidence"];
    /// Fetch metadata log header.
    pub const METADATA_HEADER: [&str; 8] = [
        IMAGE_NAME,
        "lon_min",
        "lat_min",
        "lon_max",
        "lat_max",
        "lon_center",
        "lat_center",
        "timestamp_utc",
    ];
}

/// Confidence value formatting.
pub mod confidence {
    /// Decimal places for probability formatting.
    pub const DECIMAL_PLACES: usize = 6;
}

/// Lock file name inside a run directory.
pub const LOCK_FILE_NAME: &str = ".firewatch.lock";

/// Default object storage command.
pub const DEFAULT_STORAGE_COMMAND: &str = "gsutil";
