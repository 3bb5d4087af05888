//! Configuration validation.

use crate::config::{Config, EstimationMethod, ModelConfig};
use crate::constants::confidence;
use crate::error::{Error, Result};

/// Validate the entire configuration.
pub fn validate_config(config: &Config) -> Result<()> {
    validate_defaults(config)?;
    validate_tiling(config)?;
    validate_estimation(config)?;
    validate_breaker(config)?;
    Ok(())
}

/// Validate default settings.
fn validate_defaults(config: &Config) -> Result<()> {
    let defaults = &config.defaults;

    for (name, value) in [
        ("min_confidence", defaults.min_confidence),
        ("region_min_confidence", defaults.region_min_confidence),
    ] {
        if !(confidence::MIN..=confidence::MAX).contains(&value) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "{name} must be between {} and {}, got {value}",
                    confidence::MIN,
                    confidence::MAX,
                ),
            });
        }
    }

    if defaults.segmentation_resolution == 0 {
        return Err(Error::ConfigValidation {
            message: "segmentation_resolution must be at least 1".to_string(),
        });
    }

    if defaults.unit_timeout_secs == 0 {
        return Err(Error::ConfigValidation {
            message: "unit_timeout_secs must be at least 1".to_string(),
        });
    }

    Ok(())
}

/// Validate tiling settings.
fn validate_tiling(config: &Config) -> Result<()> {
    let tiling = &config.tiling;

    if tiling.tile_size == 0 {
        return Err(Error::ConfigValidation {
            message: "tile_size must be at least 1".to_string(),
        });
    }

    if !(0.0..1.0).contains(&tiling.overlap) {
        return Err(Error::ConfigValidation {
            message: format!(
                "overlap must be in [0.0, 1.0), got {}",
                tiling.overlap
            ),
        });
    }

    if !(confidence::MIN..=confidence::MAX).contains(&tiling.merge_threshold) {
        return Err(Error::ConfigValidation {
            message: format!(
                "merge_threshold must be between 0.0 and 1.0, got {}",
                tiling.merge_threshold
            ),
        });
    }

    if tiling.tile_attempts == 0 {
        return Err(Error::ConfigValidation {
            message: "tile_attempts must be at least 1".to_string(),
        });
    }

    Ok(())
}

/// Validate estimation calibration.
fn validate_estimation(config: &Config) -> Result<()> {
    let estimation = &config.estimation;

    if !(0.0..=1.0).contains(&estimation.band_fraction) || estimation.band_fraction == 0.0 {
        return Err(Error::ConfigValidation {
            message: format!(
                "band_fraction must be in (0.0, 1.0], got {}",
                estimation.band_fraction
            ),
        });
    }

    if estimation.method == EstimationMethod::Density
        && estimation.density_per_megapixel.is_none()
    {
        return Err(Error::ConfigValidation {
            message: "density estimation requires density_per_megapixel".to_string(),
        });
    }

    if let Some(density) = estimation.density_per_megapixel
        && density <= 0.0
    {
        return Err(Error::ConfigValidation {
            message: format!("density_per_megapixel must be positive, got {density}"),
        });
    }

    if estimation.low_factor > 1.0 || estimation.low_factor <= 0.0 {
        return Err(Error::ConfigValidation {
            message: format!(
                "low_factor must be in (0.0, 1.0], got {}",
                estimation.low_factor
            ),
        });
    }

    if estimation.high_factor < 1.0 {
        return Err(Error::ConfigValidation {
            message: format!(
                "high_factor must be at least 1.0, got {}",
                estimation.high_factor
            ),
        });
    }

    Ok(())
}

/// Validate circuit breaker settings.
fn validate_breaker(config: &Config) -> Result<()> {
    if config.breaker.failure_threshold == 0 {
        return Err(Error::ConfigValidation {
            message: "failure_threshold must be at least 1".to_string(),
        });
    }
    Ok(())
}

/// Validate a model configuration and check the file exists.
pub fn validate_model_config(model: &ModelConfig) -> Result<()> {
    if !model.path.exists() {
        return Err(Error::ModelFileNotFound {
            path: model.path.clone(),
        });
    }

    if model.resolution == 0 {
        return Err(Error::ConfigValidation {
            message: "model resolution must be at least 1".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_tile_size_rejected() {
        let mut config = Config::default();
        config.tiling.tile_size = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_full_overlap_rejected() {
        let mut config = Config::default();
        config.tiling.overlap = 1.0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_density_method_requires_constant() {
        let mut config = Config::default();
        config.estimation.method = EstimationMethod::Density;
        config.estimation.density_per_megapixel = None;
        assert!(validate_config(&config).is_err());

        config.estimation.density_per_megapixel = Some(120.0);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_out_of_range_confidence_rejected() {
        let mut config = Config::default();
        config.defaults.min_confidence = 1.5;
        assert!(validate_config(&config).is_err());
    }
}
