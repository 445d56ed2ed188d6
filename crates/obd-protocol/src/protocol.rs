//! Adapter Bus Protocol Selection

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bus protocol an ELM327-style adapter is pinned to with `ATSPn`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObdProtocol {
    /// Let the adapter search
    #[default]
    Auto,
    J1850Pwm,
    J1850Vpw,
    /// ISO 9141-2, 5 baud init
    Iso9141_2,
    /// KWP2000, 5 baud init
    Iso14230_4Kwp,
    /// KWP2000, fast init
    Iso14230_4KwpFast,
    Iso15765_4Can11bit500,
    Iso15765_4Can29bit500,
    Iso15765_4Can11bit250,
    Iso15765_4Can29bit250,
}

impl ObdProtocol {
    /// Protocol number in the adapter's `ATSP` table
    pub fn elm_digit(&self) -> u8 {
        match self {
            ObdProtocol::Auto => 0,
            ObdProtocol::J1850Pwm => 1,
            ObdProtocol::J1850Vpw => 2,
            ObdProtocol::Iso9141_2 => 3,
            ObdProtocol::Iso14230_4Kwp => 4,
            ObdProtocol::Iso14230_4KwpFast => 5,
            ObdProtocol::Iso15765_4Can11bit500 => 6,
            ObdProtocol::Iso15765_4Can29bit500 => 7,
            ObdProtocol::Iso15765_4Can11bit250 => 8,
            ObdProtocol::Iso15765_4Can29bit250 => 9,
        }
    }

    /// Setup command selecting this protocol
    pub fn select_command(&self) -> String {
        format!("ATSP{}", self.elm_digit())
    }

    /// ISO 15765-4 variants occupy slots 6 to 9
    pub fn is_can(&self) -> bool {
        self.elm_digit() >= 6
    }

    /// Serial baud rate to open the adapter with when none is configured
    pub fn default_baud_rate(&self) -> u32 {
        // clones ship at 38400; CAN-pinned adapters are usually reflashed faster
        if self.is_can() {
            115200
        } else {
            38400
        }
    }
}

impl fmt::Display for ObdProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObdProtocol::Auto => "automatic",
            ObdProtocol::J1850Pwm => "SAE J1850 PWM",
            ObdProtocol::J1850Vpw => "SAE J1850 VPW",
            ObdProtocol::Iso9141_2 => "ISO 9141-2",
            ObdProtocol::Iso14230_4Kwp => "ISO 14230-4 KWP (5 baud init)",
            ObdProtocol::Iso14230_4KwpFast => "ISO 14230-4 KWP (fast init)",
            ObdProtocol::Iso15765_4Can11bit500 => "ISO 15765-4 CAN 11/500",
            ObdProtocol::Iso15765_4Can29bit500 => "ISO 15765-4 CAN 29/500",
            ObdProtocol::Iso15765_4Can11bit250 => "ISO 15765-4 CAN 11/250",
            ObdProtocol::Iso15765_4Can29bit250 => "ISO 15765-4 CAN 29/250",
        };
        f.write_str(name)
    }
}
