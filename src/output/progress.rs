//! Progress bar utilities for pipeline stages.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a progress bar for a stage over `total` items.
pub fn create_stage_progress(total: usize, unit: &str, enabled: bool) -> Option<ProgressBar> {
    if !enabled || total == 0 {
        return None;
    }

    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] {{bar:40.cyan/blue}} {{pos}}/{{len}} {unit} ({{eta}})"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░ "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// Finish a progress bar with a message.
pub fn finish_progress(pb: Option<ProgressBar>, message: &str) {
    if let Some(pb) = pb {
        pb.finish_with_message(message.to_string());
    }
}

/// Increment a progress bar by `n`.
pub fn inc_progress(pb: Option<&ProgressBar>, n: u64) {
    if let Some(pb) = pb {
        pb.inc(n);
    }
}

/// Format a duration in seconds as `1h 2m 3s`, `2m 3s` or `3.4s`.
pub fn format_duration(secs: f64) -> String {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let whole = secs.max(0.0) as u64;
    let (h, m, s) = (whole / 3600, (whole % 3600) / 60, whole % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{secs:.1}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_progress_is_none() {
        assert!(create_stage_progress(10, "tiles", false).is_none());
        assert!(create_stage_progress(0, "tiles", true).is_none());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(3.44), "3.4s");
        assert_eq!(format_duration(125.0), "2m 5s");
        assert_eq!(format_duration(3723.0), "1h 2m 3s");
    }
}
