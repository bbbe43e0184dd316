//! CLI argument validators.
//!
//! Shared validation functions for CLI argument parsing.

use chrono::{DateTime, NaiveDate, Utc};
use std::time::Duration;

/// Parse a strictly positive, finite float.
pub fn parse_positive_float(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if !(value.is_finite() && value > 0.0) {
        return Err(format!("value must be positive, got {value}"));
    }

    Ok(value)
}

/// Parse a count of at least one.
pub fn parse_count(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid count"))?;

    if value == 0 {
        return Err("value must be at least 1".to_string());
    }

    Ok(value)
}

/// Parse a `YYYY-MM-DD` calendar day.
pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("'{s}' is not a valid date (expected YYYY-MM-DD)"))
}

/// Parse a `YYYY-MM-DD` date as midnight UTC at the end of that day.
///
/// The acquisition window includes the whole given day.
pub fn parse_end_date(s: &str) -> Result<DateTime<Utc>, String> {
    let date = parse_date(s)?;

    date.succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("date '{s}' is out of range"))
}

/// Parse a duration such as `90s`, `30m`, `1h` or `2d`. A bare number is seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);

    let value: u64 = digits
        .parse()
        .map_err(|_| format!("'{s}' is not a valid duration (e.g. 90s, 30m, 1h)"))?;
    let scale = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return Err(format!("unknown duration unit '{unit}' (use s, m, h or d)")),
    };

    if value == 0 {
        return Err("duration must be positive".to_string());
    }
    value
        .checked_mul(scale)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("duration '{s}' is out of range"))
}
