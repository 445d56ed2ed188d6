//! Response Framing
//!
//! ELM327 replies have no length field; a reply is over when the prompt or a
//! terminal sentinel shows up, or when a positive data reply for the outstanding
//! request is long enough. The assembler buffers transport fragments until one of
//! those holds and hands the complete frame back with the token that was
//! registered for the outstanding command.

use crate::codec::{self, PROMPT};
use crate::error::ObdError;
use crate::mode;
use tracing::debug;

/// A complete reply matched to the command that asked for it
#[derive(Debug)]
pub struct Frame<T> {
    /// The command the reply belongs to (without terminator)
    pub command: String,
    /// Reply text as received; empty when completed by a timeout
    pub text: String,
    /// Token registered with [`ResponseAssembler::begin`]
    pub token: T,
}

#[derive(Debug)]
struct InFlight<T> {
    command: String,
    /// Positive reply prefix (`41`, `49`) for data requests
    data_prefix: Option<String>,
    /// Hex digits a prefixed reply needs before it counts as complete
    min_hex_len: usize,
    token: T,
}

/// Accumulates fragments for the single outstanding command
#[derive(Debug)]
pub struct ResponseAssembler<T> {
    buffer: String,
    in_flight: Option<InFlight<T>>,
    /// Last frame completed on length alone; its prompt is still on the wire
    trailing_prompt: bool,
}

impl<T> ResponseAssembler<T> {
    /// Create an idle assembler
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            in_flight: None,
            trailing_prompt: false,
        }
    }

    /// Register `command` as outstanding
    ///
    /// `expected_bytes` is the number of data bytes a positive reply carries after the
    /// echoed PID, or 0 if unknown.
    pub fn begin(&mut self, command: &str, expected_bytes: usize, token: T) -> Result<(), ObdError> {
        if let Some(current) = &self.in_flight {
            return Err(ObdError::CommandInFlight(current.command.clone()));
        }

        let data_prefix = data_mode(command)
            .filter(|m| matches!(*m, mode::CURRENT_DATA | mode::VEHICLE_INFO))
            .map(codec::response_prefix);
        let min_hex_len = data_prefix
            .as_ref()
            .map_or(0, |prefix| prefix.len() + 2 + expected_bytes * 2);

        self.buffer.clear();
        self.in_flight = Some(InFlight {
            command: command.to_string(),
            data_prefix,
            min_hex_len,
            token,
        });
        Ok(())
    }

    /// Feed a transport fragment
    ///
    /// An empty fragment completes the outstanding command with an empty payload;
    /// the timeout path uses it. Fragments arriving while idle are dropped.
    pub fn append(&mut self, fragment: &str) -> Option<Frame<T>> {
        if fragment.is_empty() {
            self.buffer.clear();
            return self.take();
        }

        let fragment = self.skip_trailing_prompt(fragment);
        if self.in_flight.is_none() {
            if !fragment.trim().is_empty() {
                debug!("Discarding fragment with no command outstanding: {:?}", fragment);
            }
            return None;
        }
        if fragment.is_empty() {
            return None;
        }

        self.buffer.push_str(fragment);
        if self.is_complete() {
            self.take()
        } else {
            None
        }
    }

    /// Drop the prompt that belongs to a frame already completed on length
    fn skip_trailing_prompt<'a>(&mut self, fragment: &'a str) -> &'a str {
        if !self.trailing_prompt || !self.buffer.trim().is_empty() {
            return fragment;
        }
        let leading = fragment.trim_start();
        if leading.is_empty() {
            return leading;
        }
        self.trailing_prompt = false;
        leading.strip_prefix(PROMPT).unwrap_or(fragment)
    }

    /// Whether a command is awaiting its reply
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// The outstanding command, if any
    pub fn in_flight_command(&self) -> Option<&str> {
        self.in_flight.as_ref().map(|f| f.command.as_str())
    }

    /// Bytes buffered for the outstanding command
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Drop the outstanding command and buffer, returning its token
    pub fn reset(&mut self) -> Option<T> {
        self.buffer.clear();
        self.trailing_prompt = false;
        self.in_flight.take().map(|f| f.token)
    }

    fn is_complete(&self) -> bool {
        let trimmed = self.buffer.trim();
        if trimmed.contains(PROMPT) || trimmed.contains("ERROR") || trimmed.contains("NO DATA") {
            return true;
        }

        let Some(in_flight) = &self.in_flight else {
            return false;
        };
        match &in_flight.data_prefix {
            Some(prefix) => {
                let hex: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
                hex.to_ascii_uppercase().starts_with(prefix.as_str())
                    && hex.len() >= in_flight.min_hex_len
            }
            None => false,
        }
    }

    fn take(&mut self) -> Option<Frame<T>> {
        let in_flight = self.in_flight.take()?;
        let text = std::mem::take(&mut self.buffer);
        self.trailing_prompt = !text.is_empty() && !text.contains(PROMPT);
        Some(Frame {
            command: in_flight.command,
            text,
            token: in_flight.token,
        })
    }
}

impl<T> Default for ResponseAssembler<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Mode byte of an OBD request such as `010C`; `None` for AT commands
fn data_mode(command: &str) -> Option<u8> {
    if command.len() < 4 || !command.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(&command[..2], 16).ok()
}
