//! OBD-II Parameter Catalog
//!
//! Static table of the diagnostic parameters this engine knows how to request and
//! decode, together with their scaling formulas, byte widths, physical bounds and
//! polling priority.

use crate::error::ObdError;
use crate::mode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Scaling formula turning raw response bytes into a physical value.
///
/// `A`, `B`, ... denote response data bytes in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Formula {
    /// A
    Direct,
    /// A * 100 / 255
    Percentage,
    /// A * 100 / 255
    Throttle,
    /// A * 100 / 255
    EngineLoad,
    /// A - 40
    Temperature,
    /// ((A * 256) + B) / 4
    Rpm,
    /// A * 3
    Pressure,
    /// A / 10
    Voltage,
    /// A * 3
    CustomA,
    /// A / 2 - 64
    CustomB,
    /// Big-endian accumulation of up to four bytes
    MultiByte,
}

impl Formula {
    /// Apply the formula to `bytes`, or `None` if there are not enough of them.
    pub fn apply(&self, bytes: &[u8]) -> Option<f64> {
        let a = *bytes.first()? as f64;
        let value = match self {
            Formula::Direct => a,
            Formula::Percentage | Formula::Throttle | Formula::EngineLoad => a * 100.0 / 255.0,
            Formula::Temperature => a - 40.0,
            Formula::Rpm => {
                let b = *bytes.get(1)? as f64;
                ((a * 256.0) + b) / 4.0
            }
            Formula::Pressure | Formula::CustomA => a * 3.0,
            Formula::Voltage => a / 10.0,
            Formula::CustomB => a / 2.0 - 64.0,
            Formula::MultiByte => bytes
                .iter()
                .take(4)
                .fold(0u32, |acc, &byte| (acc << 8) | byte as u32) as f64,
        };
        Some(value)
    }
}

/// A diagnostic parameter the engine can request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    /// Two-hex-digit PID, upper case (e.g. "0C")
    pub id: String,
    /// Human readable name
    pub name: String,
    /// Physical unit of the decoded value
    pub unit: String,
    /// Lowest physically meaningful value
    pub min_value: f64,
    /// Highest physically meaningful value
    pub max_value: f64,
    /// OBD-II mode the PID belongs to
    #[serde(default = "default_mode")]
    pub mode: u8,
    /// Scaling formula
    pub formula: Formula,
    /// Number of data bytes the formula needs
    pub byte_width: usize,
    /// Polling priority (lower = served first)
    pub priority: u32,
}

fn default_mode() -> u8 {
    mode::CURRENT_DATA
}

impl Parameter {
    /// Create a mode 01 parameter
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: &str,
        name: &str,
        unit: &str,
        min_value: f64,
        max_value: f64,
        formula: Formula,
        byte_width: usize,
        priority: u32,
    ) -> Self {
        Self {
            id: id.to_ascii_uppercase(),
            name: name.to_string(),
            unit: unit.to_string(),
            min_value,
            max_value,
            mode: mode::CURRENT_DATA,
            formula,
            byte_width,
            priority,
        }
    }

    /// Numeric PID, if the id is a valid hex byte
    pub fn pid(&self) -> Option<u8> {
        u8::from_str_radix(&self.id, 16).ok()
    }
}

/// A decoded answer to one parameter request
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedResponse {
    /// The parameter that was queried
    pub parameter: Arc<Parameter>,
    /// Data bytes following the echoed mode and PID
    pub raw_bytes: Vec<u8>,
    /// Decoded value, `None` when there were fewer than `byte_width` bytes
    pub value: Option<f64>,
    /// Timestamp when the response was decoded (Unix ms)
    pub timestamp_ms: u64,
}

impl DecodedResponse {
    /// Decode `raw_bytes` with the parameter's formula
    pub fn new(parameter: Arc<Parameter>, raw_bytes: Vec<u8>, timestamp_ms: u64) -> Self {
        let value = if raw_bytes.len() < parameter.byte_width {
            None
        } else {
            parameter.formula.apply(&raw_bytes)
        };
        Self {
            parameter,
            raw_bytes,
            value,
            timestamp_ms,
        }
    }
}

/// Ordered set of known parameters, unique by id
#[derive(Debug, Clone)]
pub struct ParameterCatalog {
    parameters: Vec<Arc<Parameter>>,
    index: HashMap<String, usize>,
}

impl ParameterCatalog {
    /// Build a catalog, rejecting repeated ids
    pub fn new(parameters: Vec<Parameter>) -> Result<Self, ObdError> {
        let mut catalog = Self {
            parameters: Vec::with_capacity(parameters.len()),
            index: HashMap::with_capacity(parameters.len()),
        };
        for parameter in parameters {
            catalog.insert(parameter)?;
        }
        Ok(catalog)
    }

    /// The fixed table of mode 01 parameters the engine ships with
    pub fn standard() -> Self {
        let mut catalog = Self {
            parameters: Vec::new(),
            index: HashMap::new(),
        };
        for parameter in standard_parameters() {
            // Ids in the built-in table are distinct
            let _ = catalog.insert(parameter);
        }
        catalog
    }

    /// Append user-defined parameters after the existing ones
    pub fn with_extra(mut self, extra: Vec<Parameter>) -> Result<Self, ObdError> {
        for parameter in extra {
            self.insert(parameter)?;
        }
        Ok(self)
    }

    fn insert(&mut self, mut parameter: Parameter) -> Result<(), ObdError> {
        parameter.id = parameter.id.to_ascii_uppercase();
        if self.index.contains_key(&parameter.id) {
            return Err(ObdError::DuplicateParameter(parameter.id));
        }
        self.index.insert(parameter.id.clone(), self.parameters.len());
        self.parameters.push(Arc::new(parameter));
        Ok(())
    }

    /// Look up a parameter by id (case-insensitive)
    pub fn get(&self, id: &str) -> Option<&Arc<Parameter>> {
        let position = self.position(id)?;
        self.parameters.get(position)
    }

    /// Insertion position of a parameter, used to break priority ties
    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(&id.to_ascii_uppercase()).copied()
    }

    /// Iterate in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Parameter>> {
        self.parameters.iter()
    }

    /// Parameters of one OBD-II mode, in insertion order
    pub fn in_mode(&self, mode: u8) -> impl Iterator<Item = &Arc<Parameter>> {
        self.parameters.iter().filter(move |p| p.mode == mode)
    }

    /// Number of parameters
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

impl Default for ParameterCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

fn standard_parameters() -> Vec<Parameter> {
    use Formula::*;

    vec![
        Parameter::new("0C", "Engine RPM", "rpm", 0.0, 16383.75, Rpm, 2, 0),
        Parameter::new("0D", "Vehicle Speed", "km/h", 0.0, 255.0, Direct, 1, 0),
        Parameter::new("11", "Throttle Position", "%", 0.0, 100.0, Throttle, 1, 1),
        Parameter::new("04", "Calculated Engine Load", "%", 0.0, 100.0, EngineLoad, 1, 1),
        Parameter::new("0B", "Intake Manifold Pressure", "kPa", 0.0, 255.0, Direct, 1, 2),
        Parameter::new("05", "Coolant Temperature", "°C", -40.0, 215.0, Temperature, 1, 3),
        Parameter::new("5C", "Oil Temperature", "°C", -40.0, 210.0, Temperature, 1, 3),
        Parameter::new("0E", "Timing Advance", "°", -64.0, 63.5, CustomB, 1, 4),
        Parameter::new("0F", "Intake Air Temperature", "°C", -40.0, 215.0, Temperature, 1, 4),
        Parameter::new("0A", "Fuel Pressure", "kPa", 0.0, 765.0, Pressure, 1, 5),
        Parameter::new("2F", "Fuel Tank Level", "%", 0.0, 100.0, Percentage, 1, 6),
        Parameter::new("1F", "Run Time Since Engine Start", "s", 0.0, 65535.0, MultiByte, 2, 7),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(id: &str, bytes: Vec<u8>) -> Option<f64> {
        let catalog = ParameterCatalog::standard();
        let parameter = catalog.get(id).unwrap().clone();
        DecodedResponse::new(parameter, bytes, 0).value
    }

    #[test]
    fn test_rpm_formula() {
        // ((0x0F * 256) + 0xA0) / 4 = (3840 + 160) / 4 = 1000
        assert_eq!(decode("0C", vec![0x0F, 0xA0]), Some(1000.0));
    }

    #[test]
    fn test_temperature_formula() {
        // 0x7A = 122, so temp = 122 - 40 = 82°C
        assert_eq!(decode("05", vec![0x7A]), Some(82.0));
    }

    #[test]
    fn test_throttle_formula_bounds() {
        assert_eq!(decode("11", vec![0xFF]), Some(100.0));
        assert_eq!(decode("11", vec![0x00]), Some(0.0));
        assert_eq!(Formula::Percentage.apply(&[0xFF]), Some(100.0));
    }

    #[test]
    fn test_remaining_formulas() {
        assert_eq!(Formula::Pressure.apply(&[0x10]), Some(48.0));
        assert_eq!(Formula::CustomA.apply(&[0x10]), Some(48.0));
        assert_eq!(Formula::Voltage.apply(&[0x7D]), Some(12.5));
        assert_eq!(Formula::CustomB.apply(&[0x80]), Some(0.0));
        assert_eq!(Formula::Direct.apply(&[0x55]), Some(85.0));
    }

    #[test]
    fn test_multi_byte_uses_at_most_four_bytes() {
        assert_eq!(Formula::MultiByte.apply(&[0x01, 0x00]), Some(256.0));
        assert_eq!(
            Formula::MultiByte.apply(&[0x00, 0x00, 0x01, 0x00, 0xFF]),
            Some(256.0)
        );
    }

    #[test]
    fn test_short_payload_has_no_value() {
        assert_eq!(decode("0C", vec![0x0F]), None);
        assert_eq!(decode("0D", vec![]), None);
        assert_eq!(decode("1F", vec![0x01]), None);
    }

    #[test]
    fn test_catalog_rejects_duplicate_ids() {
        let catalog = ParameterCatalog::standard();
        let duplicate = Parameter::new("0c", "RPM again", "rpm", 0.0, 1.0, Formula::Rpm, 2, 9);
        assert_eq!(
            catalog.with_extra(vec![duplicate]).unwrap_err(),
            ObdError::DuplicateParameter("0C".to_string())
        );
    }

    #[test]
    fn test_catalog_lookup_and_order() {
        let catalog = ParameterCatalog::standard();
        assert_eq!(catalog.position("0c"), Some(0));
        assert_eq!(catalog.get("0d").unwrap().name, "Vehicle Speed");
        assert!(catalog.get("FF").is_none());
        assert_eq!(catalog.in_mode(mode::CURRENT_DATA).count(), catalog.len());
        assert_eq!(catalog.get("5C").unwrap().pid(), Some(0x5C));
    }

    #[test]
    fn test_extra_parameter_is_appended() {
        let voltage = Parameter {
            mode: 0x22,
            ..Parameter::new("1A", "Battery", "V", 0.0, 25.5, Formula::Voltage, 1, 9)
        };
        let catalog = ParameterCatalog::standard().with_extra(vec![voltage]).unwrap();
        assert_eq!(catalog.position("1A"), Some(catalog.len() - 1));
        assert_eq!(catalog.in_mode(0x22).count(), 1);
    }
}
