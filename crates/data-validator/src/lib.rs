//! Vehicle Data Validation and Aggregation
//!
//! Keeps the latest decoded value of every watched field, derives a gear
//! estimate, and drops readings outside their physical bounds.

mod aggregator;
mod error;
mod snapshot;
mod validator;

pub use aggregator::VehicleDataAggregator;
pub use error::ValidationError;
pub use snapshot::{estimate_gear, Field, VehicleSnapshot};
pub use validator::{ValidationConfig, Validator};
