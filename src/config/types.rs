//! Configuration type definitions.

use crate::constants::{
    DEFAULT_STORAGE_COMMAND, alerts as alert_defaults, fetch as fetch_defaults,
    grid as grid_defaults, inference as inference_defaults,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Filesystem locations.
    pub paths: PathsConfig,

    /// Grid partitioning settings.
    pub grid: GridConfig,

    /// Imagery fetch settings.
    pub fetch: FetchConfig,

    /// Inference settings.
    pub inference: InferenceConfig,

    /// Object storage settings.
    pub storage: StorageConfig,

    /// Hotspot alert settings.
    pub alerts: AlertsConfig,
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root directory holding the grid and run directories.
    pub data_dir: PathBuf,

    /// Territory boundary as a GeoJSON file.
    pub boundary: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            boundary: None,
        }
    }
}

/// Grid partitioning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Cell edge length in kilometres.
    pub cell_size_km: f64,

    /// Concurrent intersection tests.
    pub workers: usize,

    /// Intersection tolerance in metres.
    pub error_margin_m: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_size_km: grid_defaults::DEFAULT_CELL_SIZE_KM,
            workers: grid_defaults::DEFAULT_WORKERS,
            error_margin_m: grid_defaults::DEFAULT_ERROR_MARGIN_M,
        }
    }
}

/// Imagery fetch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Concurrent fetch tasks.
    pub workers: usize,

    /// Look-back window in days, ending now.
    pub window_days: i64,

    /// Rendered image edge length in pixels.
    pub dimensions: u32,

    /// Bands mapped to red, green and blue.
    pub bands: Vec<String>,

    /// Band rescale lower bound.
    pub rescale_min: f64,

    /// Band rescale upper bound.
    pub rescale_max: f64,

    /// STAC item search endpoint.
    pub search_url: String,

    /// Tiler base URL.
    pub render_url: String,

    /// Imagery collection.
    pub collection: String,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Name of an environment variable holding a bearer token.
    pub api_key_env: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: fetch_defaults::DEFAULT_WORKERS,
            window_days: fetch_defaults::DEFAULT_WINDOW_DAYS,
            dimensions: fetch_defaults::DEFAULT_DIMENSIONS,
            bands: fetch_defaults::DEFAULT_BANDS
                .iter()
                .map(ToString::to_string)
                .collect(),
            rescale_min: fetch_defaults::DEFAULT_RESCALE_MIN,
            rescale_max: fetch_defaults::DEFAULT_RESCALE_MAX,
            search_url: "https://earth-search.aws.element84.com/v1/search".to_string(),
            render_url: "https://titiler.xyz/stac".to_string(),
            collection: "sentinel-2-l2a".to_string(),
            timeout_secs: fetch_defaults::DEFAULT_TIMEOUT_SECS,
            connect_timeout_secs: fetch_defaults::DEFAULT_CONNECT_TIMEOUT_SECS,
            api_key_env: None,
        }
    }
}

/// Inference device configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InferenceDevice {
    /// Use CUDA if the provider registers, else CPU.
    #[default]
    Auto,
    /// Request CUDA; warn and fall back to CPU if unavailable.
    Gpu,
    /// Force CPU inference.
    Cpu,
}

impl std::fmt::Display for InferenceDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Gpu => write!(f, "gpu"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// Inference settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Path to the ONNX model file.
    pub model: Option<PathBuf>,

    /// Path to the newline-separated labels file.
    pub labels: Option<PathBuf>,

    /// Label whose predictions form the fire-only set.
    pub positive_label: String,

    /// Device to use for inference.
    pub device: InferenceDevice,

    /// Explicit batch size; derived from the device when unset.
    pub batch_size: Option<usize>,

    /// Square model input edge length.
    pub image_size: u32,

    /// Per-channel normalisation mean.
    pub mean: [f32; 3],

    /// Per-channel normalisation standard deviation.
    pub std: [f32; 3],
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model: None,
            labels: None,
            positive_label: inference_defaults::DEFAULT_POSITIVE_LABEL.to_string(),
            device: InferenceDevice::Auto,
            batch_size: None,
            image_size: inference_defaults::DEFAULT_IMAGE_SIZE,
            mean: inference_defaults::IMAGENET_MEAN,
            std: inference_defaults::IMAGENET_STD,
        }
    }
}

/// Object storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Remote bucket prefix, e.g. `gs://my-bucket/firewatch`.
    pub bucket: Option<String>,

    /// Copy command.
    pub command: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            bucket: None,
            command: DEFAULT_STORAGE_COMMAND.to_string(),
        }
    }
}

/// FIRMS near-real-time product.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirmsSensor {
    /// MODIS Collection 6.1.
    Modis,
    /// VIIRS on NOAA-20.
    Noaa20,
    /// VIIRS on NOAA-21.
    #[default]
    Noaa21,
    /// VIIRS on Suomi NPP.
    Suomi,
}

impl FirmsSensor {
    /// Archive directory of the product.
    pub const fn archive_dir(self) -> &'static str {
        match self {
            Self::Modis => "modis-c6.1",
            Self::Noaa20 => "noaa-20-viirs-c2",
            Self::Noaa21 => "noaa-21-viirs-c2",
            Self::Suomi => "suomi-npp-viirs-c2",
        }
    }

    /// Daily file name prefix for `region`, e.g. `J2_VIIRS_C2_South_America_VJ214IMGTDL_NRT_`.
    pub fn file_prefix(self, region: &str) -> String {
        let (platform, product) = match self {
            Self::Modis => ("MODIS_C6_1", "MCD14DL"),
            Self::Noaa20 => ("J1_VIIRS_C2", "VJ114IMGTDL"),
            Self::Noaa21 => ("J2_VIIRS_C2", "VJ214IMGTDL"),
            Self::Suomi => ("SUOMI_VIIRS_C2", "VNP14IMGTDL"),
        };
        format!("{platform}_{region}_{product}_NRT_")
    }
}

impl std::fmt::Display for FirmsSensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Modis => write!(f, "modis"),
            Self::Noaa20 => write!(f, "noaa20"),
            Self::Noaa21 => write!(f, "noaa21"),
            Self::Suomi => write!(f, "suomi"),
        }
    }
}

impl std::str::FromStr for FirmsSensor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "modis" => Ok(Self::Modis),
            "noaa20" | "noaa-20" => Ok(Self::Noaa20),
            "noaa21" | "noaa-21" => Ok(Self::Noaa21),
            "suomi" | "snpp" => Ok(Self::Suomi),
            other => Err(format!("unknown FIRMS sensor: {other}")),
        }
    }
}

/// Hotspot alert settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// NRT archive root URL.
    pub archive_url: String,

    /// Archive region directory.
    pub region: String,

    /// Detection product.
    pub sensor: FirmsSensor,

    /// Name of an environment variable holding the archive token.
    pub token_env: Option<String>,

    /// Half the edge length of an alert tile, in metres.
    pub buffer_m: f64,

    /// Search window either side of the detection time, in hours.
    pub window_hours: i64,

    /// Concurrent daily file downloads.
    pub download_workers: usize,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            archive_url: alert_defaults::DEFAULT_ARCHIVE_URL.to_string(),
            region: alert_defaults::DEFAULT_REGION.to_string(),
            sensor: FirmsSensor::default(),
            token_env: Some(alert_defaults::DEFAULT_TOKEN_ENV.to_string()),
            buffer_m: alert_defaults::DEFAULT_BUFFER_M,
            window_hours: alert_defaults::DEFAULT_WINDOW_HOURS,
            download_workers: alert_defaults::DEFAULT_DOWNLOAD_WORKERS,
        }
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.grid.cell_size_km, 4.0);
        assert_eq!(config.fetch.workers, 10);
        assert_eq!(config.fetch.bands, vec!["B4", "B3", "B2"]);
        assert_eq!(config.inference.positive_label, "Fire");
        assert_eq!(config.inference.device, InferenceDevice::Auto);
        assert_eq!(config.storage.command, "gsutil");
    }

    #[test]
    fn test_firms_sensor_names() {
        assert_eq!("NOAA21".parse::<FirmsSensor>().ok(), Some(FirmsSensor::Noaa21));
        assert_eq!("modis".parse::<FirmsSensor>().ok(), Some(FirmsSensor::Modis));
        assert!("goes".parse::<FirmsSensor>().is_err());
        assert_eq!(FirmsSensor::Suomi.to_string(), "suomi");
        assert_eq!(
            FirmsSensor::Modis.file_prefix("South_America"),
            "MODIS_C6_1_South_America_MCD14DL_NRT_"
        );
        assert_eq!(Config::default().alerts.sensor, FirmsSensor::Noaa21);
    }

    #[test]
    fn test_device_display() {
        assert_eq!(InferenceDevice::Cpu.to_string(), "cpu");
        assert_eq!(InferenceDevice::Gpu.to_string(), "gpu");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
[grid]
cell_size_km = 2.5

[inference]
device = "cpu"
"#,
        )
        .unwrap_or_default();
        assert_eq!(config.grid.cell_size_km, 2.5);
        assert_eq!(config.grid.workers, 8);
        assert_eq!(config.inference.device, InferenceDevice::Cpu);
    }
}
