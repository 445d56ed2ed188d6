//! Adapter Initialization
//!
//! Walks the ELM327 setup sequence one command at a time, then probes the
//! vehicle's support bitmaps. Sans-IO: every reply goes in through
//! [`AdapterInitializer::on_response`] and the next step comes back as an
//! [`InitAction`].

use metrics::counter;
use obd_protocol::codec::{self, SUPPORT_RANGE};
use obd_protocol::{mode, ParameterCatalog, SupportMap};
use tracing::{debug, error, info, warn};

/// Data bytes in a support bitmap reply
const BITMAP_BYTES: usize = 4;

/// Where the initializer is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitPhase {
    Idle,
    /// Waiting for the reply to `sequence[step]`
    SendingInit { step: usize },
    /// Waiting for the bitmap of PIDs `base+1 ..= base+0x20`
    ProbingSupport { base: u8 },
    Complete,
    Failed,
}

/// What the caller has to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitAction {
    /// Send `command`; a positive data reply carries `expected_bytes` after the PID
    Send {
        command: String,
        expected_bytes: usize,
    },
    /// Adapter ready, support map populated
    Complete,
    /// Retry budget exhausted
    Failed,
}

/// Init handshake and capability probe state machine
#[derive(Debug, Clone)]
pub struct AdapterInitializer {
    sequence: Vec<String>,
    phase: InitPhase,
    /// Failed steps tolerated over the whole sequence
    retry_budget: u32,
    retries_used: u32,
}

impl AdapterInitializer {
    /// Create an idle initializer for `sequence`
    pub fn new(sequence: Vec<String>, retry_budget: u32) -> Self {
        Self {
            sequence,
            phase: InitPhase::Idle,
            retry_budget,
            retries_used: 0,
        }
    }

    /// Current phase
    pub fn phase(&self) -> &InitPhase {
        &self.phase
    }

    /// Retries consumed so far
    pub fn retries_used(&self) -> u32 {
        self.retries_used
    }

    /// Begin from the first step with a fresh retry budget
    pub fn start(&mut self) -> InitAction {
        info!(
            "Initializing adapter: {} setup commands, retry budget {}",
            self.sequence.len(),
            self.retry_budget
        );
        self.retries_used = 0;
        if self.sequence.is_empty() {
            return self.probe(0);
        }
        self.send_step(0)
    }

    /// Back to idle
    pub fn reset(&mut self) {
        self.phase = InitPhase::Idle;
        self.retries_used = 0;
    }

    /// Feed the reply to the last [`InitAction::Send`]
    ///
    /// An empty `text` means the command timed out. Returns `None` when no reply
    /// was expected.
    pub fn on_response(
        &mut self,
        text: &str,
        catalog: &ParameterCatalog,
        support: &mut SupportMap,
    ) -> Option<InitAction> {
        match self.phase {
            InitPhase::SendingInit { step } => Some(self.on_step_reply(step, text)),
            InitPhase::ProbingSupport { base } => {
                Some(self.on_probe_reply(base, text, catalog, support))
            }
            _ => {
                debug!("Initializer {:?}, ignoring reply {:?}", self.phase, text);
                None
            }
        }
    }

    fn send_step(&mut self, step: usize) -> InitAction {
        self.phase = InitPhase::SendingInit { step };
        let command = self.sequence[step].clone();
        let expected_bytes = if is_support_request(&command) {
            BITMAP_BYTES
        } else {
            0
        };
        debug!("Init step {}: {}", step, command);
        InitAction::Send {
            command,
            expected_bytes,
        }
    }

    fn on_step_reply(&mut self, step: usize, text: &str) -> InitAction {
        let last = step + 1 == self.sequence.len();
        let succeeded =
            codec::is_adapter_ready(text) || (last && text.trim_start().starts_with("41"));
        if succeeded {
            return if last {
                self.probe(0)
            } else {
                self.send_step(step + 1)
            };
        }

        // one budget for the whole sequence, not per step
        if self.retries_used < self.retry_budget {
            self.retries_used += 1;
            counter!("obd_init_retries_total").increment(1);
            warn!(
                "Init step {} ({}) failed with {:?}, retry {}/{}",
                step,
                self.sequence[step],
                text.trim(),
                self.retries_used,
                self.retry_budget
            );
            return self.send_step(step);
        }

        error!(
            "Adapter initialization failed at {} after {} retries",
            self.sequence[step], self.retries_used
        );
        self.phase = InitPhase::Failed;
        InitAction::Failed
    }

    fn probe(&mut self, base: u8) -> InitAction {
        self.phase = InitPhase::ProbingSupport { base };
        InitAction::Send {
            command: codec::build_support_request(base),
            expected_bytes: BITMAP_BYTES,
        }
    }

    fn on_probe_reply(
        &mut self,
        base: u8,
        text: &str,
        catalog: &ParameterCatalog,
        support: &mut SupportMap,
    ) -> InitAction {
        if !text.trim_start().starts_with("41") {
            if base == 0 {
                warn!(
                    "Support probe unanswered ({:?}), assuming every PID is supported",
                    text.trim()
                );
                support.clear();
            } else {
                warn!(
                    "Support probe {} unanswered, PIDs above {:02X} left unprobed",
                    codec::build_support_request(base),
                    base
                );
            }
            return self.complete();
        }

        let pids: Vec<(&str, u8)> = catalog
            .in_mode(mode::CURRENT_DATA)
            .filter_map(|p| p.pid().map(|pid| (p.id.as_str(), pid)))
            .collect();
        let upper = base as u16 + SUPPORT_RANGE as u16;

        for &(id, pid) in &pids {
            if pid > base && pid as u16 <= upper {
                support.set(id, codec::is_command_supported_in_range(text, base, pid));
            }
        }

        let beyond: Vec<&str> = pids
            .iter()
            .filter(|(_, pid)| *pid as u16 > upper)
            .map(|(id, _)| *id)
            .collect();
        if beyond.is_empty() {
            return self.complete();
        }

        // beyond is non-empty, so upper is below 0x100
        let next = upper as u8;
        if codec::is_command_supported_in_range(text, base, next) {
            return self.probe(next);
        }
        for id in beyond {
            support.set(id, false);
        }
        self.complete()
    }

    fn complete(&mut self) -> InitAction {
        info!("Adapter initialization complete");
        self.phase = InitPhase::Complete;
        InitAction::Complete
    }
}

fn is_support_request(command: &str) -> bool {
    command.len() == 4
        && command.starts_with("01")
        && u8::from_str_radix(&command[2..], 16).is_ok_and(|pid| pid % SUPPORT_RANGE == 0)
}
