//! CLI argument validators.
//!
//! Shared validation functions for CLI argument parsing.

use crate::constants::gps;

/// Parse and validate confidence value (0.0-1.0).
pub fn parse_confidence(s: &str) -> Result<f32, String> {
    let value: f32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if !(0.0..=1.0).contains(&value) {
        return Err(format!(
            "confidence must be between 0.0 and 1.0, got {value}"
        ));
    }

    Ok(value)
}

/// Parse and validate a tile overlap fraction [0.0, 1.0).
pub fn parse_overlap(s: &str) -> Result<f32, String> {
    let value: f32 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if !(0.0..1.0).contains(&value) {
        return Err(format!("overlap must be in [0.0, 1.0), got {value}"));
    }

    Ok(value)
}

/// Parse and validate a longitude value.
pub fn parse_longitude(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if !(gps::LON_MIN..=gps::LON_MAX).contains(&value) {
        return Err(format!(
            "longitude must be between {} and {}, got {value}",
            gps::LON_MIN,
            gps::LON_MAX
        ));
    }

    Ok(value)
}

/// Parse and validate a latitude value.
pub fn parse_latitude(s: &str) -> Result<f64, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if !(gps::LAT_MIN..=gps::LAT_MAX).contains(&value) {
        return Err(format!(
            "latitude must be between {} and {}, got {value}",
            gps::LAT_MIN,
            gps::LAT_MAX
        ));
    }

    Ok(value)
}
