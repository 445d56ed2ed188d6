//! Data Validator for Range Checking

use crate::error::ValidationError;
use crate::snapshot::Field;
use serde::{Deserialize, Serialize};

/// Physical bounds of the snapshot fields, inclusive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// RPM valid range
    pub rpm_range: (f64, f64),
    /// Speed valid range (km/h)
    pub speed_range: (f64, f64),
    /// Throttle position valid range (%)
    pub throttle_range: (f64, f64),
    /// Engine load valid range (%)
    pub load_range: (f64, f64),
    /// Coolant temp valid range (°C)
    pub coolant_range: (f64, f64),
    /// Oil temp valid range (°C)
    pub oil_range: (f64, f64),
    /// Intake manifold pressure valid range (kPa)
    pub boost_range: (f64, f64),
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            rpm_range: (0.0, 10000.0),
            speed_range: (0.0, 350.0),
            throttle_range: (0.0, 100.0),
            load_range: (0.0, 100.0),
            coolant_range: (-40.0, 150.0),
            oil_range: (-40.0, 150.0),
            boost_range: (0.0, 400.0),
        }
    }
}

impl ValidationConfig {
    /// Bounds for one field
    pub fn range(&self, field: Field) -> (f64, f64) {
        match field {
            Field::Rpm => self.rpm_range,
            Field::Speed => self.speed_range,
            Field::Throttle => self.throttle_range,
            Field::EngineLoad => self.load_range,
            Field::CoolantTemp => self.coolant_range,
            Field::OilTemp => self.oil_range,
            Field::Boost => self.boost_range,
        }
    }
}

/// Range checker for snapshot fields
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
}

impl Validator {
    /// Create a new validator with given config
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    /// Check a snapshot field value against its bounds, inclusive
    pub fn validate(&self, field: Field, value: f64) -> Result<(), ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NotFinite { field });
        }
        let (min, max) = self.config.range(field);
        if (min..=max).contains(&value) {
            Ok(())
        } else {
            Err(ValidationError::OutOfRange {
                field,
                value,
                min,
                max,
            })
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_rpm() {
        let validator = Validator::default();
        assert!(validator.validate(Field::Rpm, 3000.0).is_ok());
        assert!(validator.validate(Field::Rpm, 0.0).is_ok());
        assert!(validator.validate(Field::Rpm, 10000.0).is_ok());
    }

    #[test]
    fn test_invalid_rpm() {
        let validator = Validator::default();
        assert!(validator.validate(Field::Rpm, -100.0).is_err());
        assert_eq!(
            validator.validate(Field::Rpm, 15000.0),
            Err(ValidationError::OutOfRange {
                field: Field::Rpm,
                value: 15000.0,
                min: 0.0,
                max: 10000.0,
            })
        );
    }

    #[test]
    fn test_temperature_ranges() {
        let validator = Validator::default();
        assert!(validator.validate(Field::CoolantTemp, -40.0).is_ok());
        assert!(validator.validate(Field::CoolantTemp, 150.0).is_ok());
        assert!(validator.validate(Field::CoolantTemp, 151.0).is_err());
        assert!(validator.validate(Field::OilTemp, -41.0).is_err());
    }

    #[test]
    fn test_nan_is_rejected() {
        let validator = Validator::default();
        assert_eq!(
            validator.validate(Field::Boost, f64::NAN),
            Err(ValidationError::NotFinite { field: Field::Boost })
        );
        assert!(validator.validate(Field::Rpm, f64::INFINITY).is_err());
    }

    #[test]
    fn test_custom_bounds() {
        let validator = Validator::new(ValidationConfig {
            speed_range: (0.0, 200.0),
            ..Default::default()
        });
        assert!(validator.validate(Field::Speed, 250.0).is_err());
        assert!(validator.validate(Field::Speed, 200.0).is_ok());
    }
}
