//! Validation Error Types

use crate::snapshot::Field;
use thiserror::Error;

/// Reasons a reading is kept out of the snapshot
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{} value {value} is out of range [{min}, {max}]", .field.name())]
    OutOfRange {
        field: Field,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{} value is not a finite number", .field.name())]
    NotFinite { field: Field },
}
