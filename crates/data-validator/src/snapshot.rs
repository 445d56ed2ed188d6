//! Latest-known vehicle values

use obd_protocol::{mode, Parameter};
use serde::{Deserialize, Serialize};

/// Watched snapshot fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Rpm,
    Speed,
    Throttle,
    EngineLoad,
    CoolantTemp,
    OilTemp,
    Boost,
}

impl Field {
    /// Every watched field
    pub const ALL: [Field; 7] = [
        Field::Rpm,
        Field::Speed,
        Field::Throttle,
        Field::EngineLoad,
        Field::CoolantTemp,
        Field::OilTemp,
        Field::Boost,
    ];

    /// Mode 01 PID feeding this field
    pub fn parameter_id(&self) -> &'static str {
        match self {
            Field::Rpm => "0C",
            Field::Speed => "0D",
            Field::Throttle => "11",
            Field::EngineLoad => "04",
            Field::CoolantTemp => "05",
            Field::OilTemp => "5C",
            Field::Boost => "0B",
        }
    }

    /// Field fed by `parameter`, if any
    pub fn for_parameter(parameter: &Parameter) -> Option<Field> {
        if parameter.mode != mode::CURRENT_DATA {
            return None;
        }
        Self::ALL
            .into_iter()
            .find(|field| field.parameter_id().eq_ignore_ascii_case(&parameter.id))
    }

    /// Name used in logs and validation errors
    pub fn name(&self) -> &'static str {
        match self {
            Field::Rpm => "rpm",
            Field::Speed => "speed",
            Field::Throttle => "throttle",
            Field::EngineLoad => "engine_load",
            Field::CoolantTemp => "coolant_temp",
            Field::OilTemp => "oil_temp",
            Field::Boost => "boost",
        }
    }
}

/// Latest decoded values; `None` means unknown
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    /// Timestamp of the last accepted reading (Unix ms)
    pub timestamp_ms: u64,
    /// Engine RPM
    pub rpm: Option<f64>,
    /// Vehicle speed (km/h)
    pub speed: Option<f64>,
    /// Throttle position (%)
    pub throttle: Option<f64>,
    /// Calculated engine load (%)
    pub engine_load: Option<f64>,
    /// Coolant temperature (°C)
    pub coolant_temp: Option<f64>,
    /// Oil temperature (°C)
    pub oil_temp: Option<f64>,
    /// Intake manifold pressure (kPa)
    pub boost: Option<f64>,
    /// Estimated gear, derived from rpm and speed
    pub gear: Option<u8>,
}

impl VehicleSnapshot {
    /// Whether nothing is known yet
    pub fn is_empty(&self) -> bool {
        *self == VehicleSnapshot::default()
    }

    /// Current value of a field
    pub fn get(&self, field: Field) -> Option<f64> {
        match field {
            Field::Rpm => self.rpm,
            Field::Speed => self.speed,
            Field::Throttle => self.throttle,
            Field::EngineLoad => self.engine_load,
            Field::CoolantTemp => self.coolant_temp,
            Field::OilTemp => self.oil_temp,
            Field::Boost => self.boost,
        }
    }

    pub(crate) fn slot(&mut self, field: Field) -> &mut Option<f64> {
        match field {
            Field::Rpm => &mut self.rpm,
            Field::Speed => &mut self.speed,
            Field::Throttle => &mut self.throttle,
            Field::EngineLoad => &mut self.engine_load,
            Field::CoolantTemp => &mut self.coolant_temp,
            Field::OilTemp => &mut self.oil_temp,
            Field::Boost => &mut self.boost,
        }
    }
}

/// Estimate the engaged gear from the rpm/speed ratio
///
/// Undefined when either value is missing, zero or negative.
pub fn estimate_gear(rpm: Option<f64>, speed: Option<f64>) -> Option<u8> {
    let (rpm, speed) = (rpm?, speed?);
    if rpm <= 0.0 || speed <= 0.0 {
        return None;
    }

    let ratio = rpm / speed;
    let gear = if ratio > 110.0 {
        1
    } else if ratio > 70.0 {
        2
    } else if ratio > 50.0 {
        3
    } else if ratio > 40.0 {
        4
    } else if ratio > 30.0 {
        5
    } else {
        6
    };
    Some(gear)
}

#[cfg(test)]
mod tests {
    use super::*;
    use obd_protocol::ParameterCatalog;

    #[test]
    fn test_field_mapping() {
        let catalog = ParameterCatalog::standard();
        for field in Field::ALL {
            let parameter = catalog.get(field.parameter_id()).unwrap();
            assert_eq!(Field::for_parameter(parameter), Some(field));
        }
        assert_eq!(Field::for_parameter(catalog.get("0F").unwrap()), None);
    }

    #[test]
    fn test_other_mode_does_not_map() {
        let mut parameter = ParameterCatalog::standard().get("0C").unwrap().as_ref().clone();
        parameter.mode = mode::VEHICLE_INFO;
        assert_eq!(Field::for_parameter(&parameter), None);
    }

    #[test]
    fn test_gear_thresholds() {
        assert_eq!(estimate_gear(Some(3000.0), Some(20.0)), Some(1)); // 150
        assert_eq!(estimate_gear(Some(3000.0), Some(40.0)), Some(2)); // 75
        assert_eq!(estimate_gear(Some(3000.0), Some(50.0)), Some(3)); // 60
        assert_eq!(estimate_gear(Some(3000.0), Some(70.0)), Some(4)); // ~42.9
        assert_eq!(estimate_gear(Some(3000.0), Some(90.0)), Some(5)); // ~33.3
        assert_eq!(estimate_gear(Some(3000.0), Some(120.0)), Some(6)); // 25
    }

    #[test]
    fn test_gear_boundaries_are_exclusive() {
        // ratio exactly 110 falls through to gear 2
        assert_eq!(estimate_gear(Some(1100.0), Some(10.0)), Some(2));
        assert_eq!(estimate_gear(Some(300.0), Some(10.0)), Some(6));
    }

    #[test]
    fn test_gear_undefined() {
        assert_eq!(estimate_gear(None, Some(50.0)), None);
        assert_eq!(estimate_gear(Some(2000.0), None), None);
        assert_eq!(estimate_gear(Some(2000.0), Some(0.0)), None);
        assert_eq!(estimate_gear(Some(0.0), Some(50.0)), None);
        assert_eq!(estimate_gear(Some(-5.0), Some(50.0)), None);
    }
}
