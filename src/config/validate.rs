//! Configuration validation.

use crate::config::{AlertsConfig, Config, FetchConfig, GridConfig, InferenceConfig};
use crate::constants::batch_size;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Validate the entire configuration.
pub fn validate_config(config: &Config) -> Result<()> {
    validate_grid(&config.grid)?;
    validate_fetch(&config.fetch)?;
    validate_inference(&config.inference)?;
    validate_alerts(&config.alerts)?;
    Ok(())
}

fn invalid(message: String) -> Error {
    Error::ConfigValidation { message }
}

fn validate_grid(grid: &GridConfig) -> Result<()> {
    if !(grid.cell_size_km.is_finite() && grid.cell_size_km > 0.0) {
        return Err(invalid(format!(
            "grid.cell_size_km must be positive, got {}",
            grid.cell_size_km
        )));
    }

    if grid.workers == 0 {
        return Err(invalid("grid.workers must be at least 1".to_string()));
    }

    if !(grid.error_margin_m.is_finite() && grid.error_margin_m >= 0.0) {
        return Err(invalid(format!(
            "grid.error_margin_m must be non-negative, got {}",
            grid.error_margin_m
        )));
    }

    Ok(())
}

fn validate_alerts(alerts: &AlertsConfig) -> Result<()> {
    if !(alerts.buffer_m.is_finite() && alerts.buffer_m > 0.0) {
        return Err(invalid(format!(
            "alerts.buffer_m must be positive, got {}",
            alerts.buffer_m
        )));
    }

    if alerts.window_hours <= 0 {
        return Err(invalid(format!(
            "alerts.window_hours must be positive, got {}",
            alerts.window_hours
        )));
    }

    if alerts.download_workers == 0 {
        return Err(invalid("alerts.download_workers must be at least 1".to_string()));
    }

    if !(alerts.archive_url.starts_with("http://") || alerts.archive_url.starts_with("https://")) {
        return Err(invalid(format!(
            "alerts.archive_url must be an http(s) URL, got '{}'",
            alerts.archive_url
        )));
    }

    Ok(())
}

fn validate_fetch(fetch: &FetchConfig) -> Result<()> {
    if fetch.workers == 0 {
        return Err(invalid("fetch.workers must be at least 1".to_string()));
    }

    if fetch.window_days <= 0 {
        return Err(invalid(format!(
            "fetch.window_days must be positive, got {}",
            fetch.window_days
        )));
    }

    if fetch.dimensions == 0 {
        return Err(invalid("fetch.dimensions must be at least 1".to_string()));
    }

    if fetch.bands.is_empty() {
        return Err(invalid("fetch.bands must not be empty".to_string()));
    }

    if fetch.rescale_min >= fetch.rescale_max {
        return Err(invalid(format!(
            "fetch.rescale_min ({}) must be below fetch.rescale_max ({})",
            fetch.rescale_min, fetch.rescale_max
        )));
    }

    for (key, url) in [
        ("fetch.search_url", &fetch.search_url),
        ("fetch.render_url", &fetch.render_url),
    ] {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid(format!("{key} must be an http(s) URL, got '{url}'")));
        }
    }

    Ok(())
}

fn validate_inference(inference: &InferenceConfig) -> Result<()> {
    if let Some(size) = inference.batch_size
        && !(1..=batch_size::MAX).contains(&size)
    {
        return Err(invalid(format!(
            "inference.batch_size must be between 1 and {}, got {size}",
            batch_size::MAX
        )));
    }

    if inference.image_size == 0 {
        return Err(invalid("inference.image_size must be at least 1".to_string()));
    }

    if inference.std.iter().any(|s| *s <= 0.0) {
        return Err(invalid(format!(
            "inference.std values must be positive, got {:?}",
            inference.std
        )));
    }

    if inference.positive_label.trim().is_empty() {
        return Err(invalid("inference.positive_label must not be empty".to_string()));
    }

    Ok(())
}

/// Configured boundary file, checked to exist.
pub fn require_boundary(config: &Config) -> Result<&Path> {
    let path = config
        .paths
        .boundary
        .as_deref()
        .ok_or(Error::BoundaryNotConfigured)?;

    if !path.exists() {
        return Err(Error::BoundaryLoad {
            path: path.to_path_buf(),
            reason: "file not found".to_string(),
        });
    }

    Ok(path)
}

/// Configured model and labels files, checked to exist.
pub fn require_model(inference: &InferenceConfig) -> Result<(PathBuf, PathBuf)> {
    let (Some(model), Some(labels)) = (&inference.model, &inference.labels) else {
        return Err(Error::ModelNotConfigured);
    };

    if !model.exists() {
        return Err(Error::ModelFileNotFound {
            path: model.clone(),
        });
    }

    if !labels.exists() {
        return Err(Error::LabelsFileNotFound {
            path: labels.clone(),
        });
    }

    Ok((model.clone(), labels.clone()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_cell_size() {
        let mut config = Config::default();
        config.grid.cell_size_km = 0.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_fetch_workers() {
        let mut config = Config::default();
        config.fetch.workers = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_inverted_rescale() {
        let mut config = Config::default();
        config.fetch.rescale_min = 3000.0;
        config.fetch.rescale_max = 0.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_alert_window() {
        let mut config = Config::default();
        config.alerts.window_hours = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.alerts.buffer_m = -5.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_bad_url() {
        let mut config = Config::default();
        config.fetch.search_url = "ftp://stac.example".to_string();
        assert!(matches!(
            validate_config(&config),
            Err(Error::ConfigValidation { .. })
        ));
    }

    #[test]
    fn test_validate_batch_size_bounds() {
        let mut config = Config::default();
        config.inference.batch_size = Some(0);
        assert!(validate_config(&config).is_err());
        config.inference.batch_size = Some(batch_size::MAX + 1);
        assert!(validate_config(&config).is_err());
        config.inference.batch_size = Some(16);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_require_boundary_unset() {
        let config = Config::default();
        assert!(matches!(
            require_boundary(&config),
            Err(Error::BoundaryNotConfigured)
        ));
    }

    #[test]
    fn test_require_model_checks_files() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("model.onnx");
        let labels = dir.path().join("labels.txt");

        let mut inference = InferenceConfig::default();
        assert!(matches!(
            require_model(&inference),
            Err(Error::ModelNotConfigured)
        ));

        inference.model = Some(model.clone());
        inference.labels = Some(labels.clone());
        assert!(matches!(
            require_model(&inference),
            Err(Error::ModelFileNotFound { .. })
        ));

        std::fs::write(&model, b"onnx").unwrap();
        assert!(matches!(
            require_model(&inference),
            Err(Error::LabelsFileNotFound { .. })
        ));

        std::fs::write(&labels, "Fire\nNo_Fire\n").unwrap();
        assert_eq!(require_model(&inference).unwrap(), (model, labels));
    }
}
