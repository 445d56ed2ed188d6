//! OBD-II Protocol Implementation
//!
//! ASCII command protocol of ELM327-compatible serial bridges: the parameter
//! catalog, command building and reply decoding, reply framing, and the PID
//! support map filled by the bitmap probe. Everything here is transport-agnostic.

mod assembler;
mod catalog;
pub mod codec;
mod error;
mod protocol;
mod support;

pub use assembler::{Frame, ResponseAssembler};
pub use catalog::{DecodedResponse, Formula, Parameter, ParameterCatalog};
pub use error::ObdError;
pub use protocol::ObdProtocol;
pub use support::SupportMap;

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;
}
