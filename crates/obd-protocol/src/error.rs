//! OBD-II Error Types

use thiserror::Error;

/// Errors that can occur during OBD-II communication
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ObdError {
    /// No adapter was found while scanning
    #[error("OBD adapter not found")]
    DeviceNotFound,

    /// Adapter found but it does not expose a serial service
    #[error("Serial service not found on adapter")]
    ServiceNotFound,

    /// Serial service found but no readable/writable channel on it
    #[error("Serial characteristic not found on adapter")]
    CharacteristicNotFound,

    /// Operation requires a connected, initialized adapter
    #[error("OBD adapter not connected")]
    NotConnected,

    /// Setup handshake exhausted its retry budget
    #[error("OBD adapter initialization failed")]
    InitializationFailed,

    /// Timeout waiting for response
    #[error("Timeout waiting for OBD response after {0}ms")]
    Timeout(u64),

    /// Invalid response from adapter
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Parameter unknown to the catalog or not supported by the vehicle
    #[error("Command not supported: {0}")]
    UnsupportedCommand(String),

    /// Serial port / byte stream error
    #[error("Serial port error: {0}")]
    SerialError(String),

    /// A command was issued while another one was awaiting its response
    #[error("Command {0} is still awaiting a response")]
    CommandInFlight(String),

    /// Catalog construction with a repeated parameter id
    #[error("Duplicate parameter id {0}")]
    DuplicateParameter(String),

    /// Session task has ended
    #[error("OBD session closed")]
    SessionClosed,
}

impl From<std::io::Error> for ObdError {
    fn from(err: std::io::Error) -> Self {
        ObdError::SerialError(err.to_string())
    }
}
