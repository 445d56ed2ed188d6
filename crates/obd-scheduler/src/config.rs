//! Session Configuration

use data_validator::Field;
use obd_protocol::{ObdError, ObdProtocol, Parameter, ParameterCatalog};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for an OBD session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Poll tick period in milliseconds (default: 100)
    pub poll_interval_ms: u64,
    /// Per-command reply timeout in milliseconds (default: 3000)
    pub command_timeout_ms: u64,
    /// Failed init steps tolerated across the whole sequence
    pub init_retry_budget: u32,
    /// Start polling as soon as the adapter is initialized
    pub poll_on_connect: bool,
    /// Protocol selected during init (`ATSPn`)
    pub protocol: ObdProtocol,
    /// Parameter ids in the polling working set
    pub watched: Vec<String>,
    /// Catalog entries beyond the standard table
    pub extra_parameters: Vec<Parameter>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            command_timeout_ms: 3000,
            init_retry_budget: 3,
            poll_on_connect: true,
            protocol: ObdProtocol::Auto,
            watched: Field::ALL
                .iter()
                .map(|field| field.parameter_id().to_string())
                .collect(),
            extra_parameters: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Poll tick period
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Per-command reply timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Standard catalog extended with [`Self::extra_parameters`]
    pub fn catalog(&self) -> Result<ParameterCatalog, ObdError> {
        ParameterCatalog::standard().with_extra(self.extra_parameters.clone())
    }
}
