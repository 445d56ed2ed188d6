//! OBD Protocol Engine
//!
//! Sans-IO core of a session. The engine owns every piece of mutable protocol
//! state (connection lifecycle, reply buffer, command in flight, working set,
//! support map, snapshot) and is only ever driven from one task, so no locking
//! is needed. Callers feed it received bytes, poll ticks and the current time,
//! and drain the bytes it wants written with [`ObdEngine::take_output`].

use crate::config::SessionConfig;
use crate::connection::{ConnectionState, ConnectionStateMachine};
use crate::initializer::{AdapterInitializer, InitAction};
use crate::scheduler::{PollScheduler, ScheduledParameter};
use data_validator::{ValidationConfig, VehicleDataAggregator, VehicleSnapshot};
use metrics::counter;
use obd_protocol::{
    codec, DecodedResponse, Frame, ObdError, Parameter, ParameterCatalog, ResponseAssembler,
    SupportMap,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Completion channel of a one-shot parameter request
pub type Responder = oneshot::Sender<Result<DecodedResponse, ObdError>>;

/// Owner of the outstanding command
#[derive(Debug)]
enum Pending {
    /// Init handshake or support probe
    Setup,
    /// Working-set poll
    Poll(Arc<Parameter>),
    /// One-shot request
    Request(Arc<Parameter>, Responder),
}

#[derive(Debug)]
struct QueuedRequest {
    parameter: Arc<Parameter>,
    responder: Responder,
}

/// Comparable summary of the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStatus {
    pub state: ConnectionState,
    /// Command awaiting its reply
    pub in_flight: Option<String>,
    /// Reply bytes buffered so far
    pub buffered: usize,
    pub polling: bool,
    pub working_set: usize,
    /// Explicit support map entries
    pub supported_entries: usize,
    pub queued_requests: usize,
    /// Commands not yet written to the transport
    pub pending_output: usize,
    pub timer_armed: bool,
}

/// Single-flight OBD-II protocol engine
pub struct ObdEngine {
    config: SessionConfig,
    catalog: ParameterCatalog,
    connection: ConnectionStateMachine,
    assembler: ResponseAssembler<Pending>,
    initializer: AdapterInitializer,
    scheduler: PollScheduler,
    support: SupportMap,
    aggregator: VehicleDataAggregator,
    /// One-shot requests waiting for the command slot
    requests: VecDeque<QueuedRequest>,
    outbox: VecDeque<Vec<u8>>,
    /// Timeout of the command in flight
    deadline: Option<Instant>,
}

impl ObdEngine {
    /// Create a disconnected engine
    ///
    /// Fails if the configured extra parameters clash with the standard catalog.
    pub fn new(
        config: SessionConfig,
        validation: ValidationConfig,
        connection: ConnectionStateMachine,
    ) -> Result<Self, ObdError> {
        let catalog = config.catalog()?;
        let initializer = AdapterInitializer::new(
            codec::init_sequence_for(config.protocol),
            config.init_retry_budget,
        );
        info!(
            "OBD engine created: {} catalog parameters, {} watched",
            catalog.len(),
            config.watched.len()
        );

        Ok(Self {
            config,
            catalog,
            connection,
            assembler: ResponseAssembler::new(),
            initializer,
            scheduler: PollScheduler::new(),
            support: SupportMap::new(),
            aggregator: VehicleDataAggregator::new(validation),
            requests: VecDeque::new(),
            outbox: VecDeque::new(),
            deadline: None,
        })
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Subscribe to connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe()
    }

    /// Subscribe to snapshot changes
    pub fn subscribe_snapshot(&self) -> watch::Receiver<VehicleSnapshot> {
        self.aggregator.subscribe()
    }

    /// Poll tick period
    pub fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    /// When the command in flight times out
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            state: self.connection.state(),
            in_flight: self.assembler.in_flight_command().map(str::to_string),
            buffered: self.assembler.buffered().len(),
            polling: self.scheduler.is_enabled(),
            working_set: self.scheduler.len(),
            supported_entries: self.support.len(),
            queued_requests: self.requests.len(),
            pending_output: self.outbox.len(),
            timer_armed: self.deadline.is_some(),
        }
    }

    /// Start (or restart) the adapter handshake on a fresh protocol state
    pub fn connect(&mut self, now: Instant) {
        self.teardown();
        let state = self.connection.state();
        if matches!(
            state,
            ConnectionState::Initializing | ConnectionState::Connected
        ) {
            self.connection.reset();
        }
        if state != ConnectionState::Connecting {
            self.connection.begin_connect();
        }
        self.connection.transition(ConnectionState::Initializing);

        let action = self.initializer.start();
        self.apply_init_action(action, now);
    }

    /// Feed bytes read from the transport
    pub fn receive(&mut self, bytes: &[u8], now: Instant) {
        // some clones pad replies with NULs
        let text: String = String::from_utf8_lossy(bytes)
            .chars()
            .filter(|c| *c != '\0')
            .collect();
        if text.is_empty() {
            return;
        }

        debug!("<- {:?}", text);
        if let Some(frame) = self.assembler.append(&text) {
            self.deadline = None;
            self.complete(frame, false, now);
        }
    }

    /// Expire the command in flight if its deadline has passed
    ///
    /// The expired command completes with an empty reply and frees the slot.
    pub fn check_timeout(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {}
            _ => return false,
        }
        self.deadline = None;

        counter!("obd_command_timeouts_total").increment(1);
        warn!(
            "Command {} timed out after {}ms",
            self.assembler.in_flight_command().unwrap_or("?"),
            self.config.command_timeout_ms
        );
        if let Some(frame) = self.assembler.append("") {
            self.complete(frame, true, now);
        }
        true
    }

    /// Poll tick: serve a queued request, else the next working-set parameter
    ///
    /// No-op unless connected and the command slot is free.
    pub fn tick(&mut self, now: Instant) {
        if self.assembler.is_busy() || !self.connection.state().is_connected() {
            return;
        }
        if self.dispatch_request(now) {
            return;
        }
        if let Some(parameter) = self.scheduler.next(&self.support) {
            let command = codec::build_request(&parameter);
            self.send(command, parameter.byte_width, Pending::Poll(parameter), now);
        }
    }

    /// Request one parameter outside the working set
    ///
    /// The result arrives on `responder`. While another command is outstanding
    /// the request waits for the slot, ahead of the next poll.
    pub fn request_parameter(&mut self, id: &str, responder: Responder, now: Instant) {
        let parameter = match self.admit(id) {
            Ok(parameter) => parameter,
            Err(err) => {
                debug!("Rejecting request for {}: {}", id, err);
                let _ = responder.send(Err(err));
                return;
            }
        };

        if let Some(command) = self.assembler.in_flight_command() {
            debug!("Request for {} queued behind {}", parameter.id, command);
        }
        self.requests.push_back(QueuedRequest {
            parameter,
            responder,
        });
        self.dispatch_request(now);
    }

    /// Enable the working-set schedule
    pub fn start_polling(&mut self) -> Result<(), ObdError> {
        if !self.connection.state().is_connected() {
            return Err(ObdError::NotConnected);
        }
        self.scheduler.enable();
        Ok(())
    }

    /// Disable the working-set schedule; the command in flight still completes
    pub fn stop_polling(&mut self) {
        self.scheduler.disable();
    }

    /// Tear everything down and publish [`ConnectionState::Disconnected`]
    ///
    /// Safe to call in any state and any number of times.
    pub fn disconnect(&mut self) {
        if self.connection.state() != ConnectionState::Disconnected {
            info!("Disconnecting OBD session");
        }
        self.teardown();
        self.connection.reset();
    }

    /// Tear everything down and publish [`ConnectionState::Failed`]
    pub fn fail(&mut self, reason: ObdError) {
        error!("OBD session failed: {}", reason);
        self.teardown();
        self.connection.fail(reason);
    }

    /// Next chunk of bytes to write to the transport
    pub fn take_output(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }

    fn teardown(&mut self) {
        self.deadline = None;
        self.scheduler.clear();
        self.initializer.reset();
        if let Some(Pending::Request(parameter, responder)) = self.assembler.reset() {
            debug!("Cancelling in-flight request for {}", parameter.id);
            let _ = responder.send(Err(ObdError::NotConnected));
        }
        for request in self.requests.drain(..) {
            let _ = request.responder.send(Err(ObdError::NotConnected));
        }
        self.support.clear();
        self.outbox.clear();
        self.aggregator.reset();
    }

    fn admit(&self, id: &str) -> Result<Arc<Parameter>, ObdError> {
        if !self.connection.state().is_connected() {
            return Err(ObdError::NotConnected);
        }
        let parameter = self
            .catalog
            .get(id)
            .ok_or_else(|| ObdError::UnsupportedCommand(id.to_string()))?;
        if !self.support.is_supported(&parameter.id) {
            return Err(ObdError::UnsupportedCommand(parameter.id.clone()));
        }
        Ok(Arc::clone(parameter))
    }

    fn send(&mut self, command: String, expected_bytes: usize, pending: Pending, now: Instant) {
        if let Err(err) = self.assembler.begin(&command, expected_bytes, pending) {
            error!("Not sending {}: {}", command, err);
            return;
        }

        debug!("-> {}", command);
        counter!("obd_commands_sent_total").increment(1);
        self.outbox.push_back(codec::finalize(&command).into_bytes());
        self.deadline = Some(now + self.config.command_timeout());
    }

    fn dispatch_request(&mut self, now: Instant) -> bool {
        if self.assembler.is_busy() || !self.connection.state().is_connected() {
            return false;
        }
        let Some(request) = self.requests.pop_front() else {
            return false;
        };

        let command = codec::build_request(&request.parameter);
        let expected_bytes = request.parameter.byte_width;
        let pending = Pending::Request(request.parameter, request.responder);
        self.send(command, expected_bytes, pending, now);
        true
    }

    fn complete(&mut self, frame: Frame<Pending>, timed_out: bool, now: Instant) {
        debug!("Reply to {}: {:?}", frame.command, frame.text);
        match frame.token {
            Pending::Setup => {
                let action =
                    self.initializer
                        .on_response(&frame.text, &self.catalog, &mut self.support);
                if let Some(action) = action {
                    self.apply_init_action(action, now);
                }
            }
            Pending::Poll(parameter) => {
                self.scheduler.resolve();
                if let Some(response) = self.decode(&frame.text, &parameter) {
                    self.aggregator.ingest(&response);
                }
            }
            Pending::Request(parameter, responder) => {
                let result = match self.decode(&frame.text, &parameter) {
                    Some(response) => {
                        self.aggregator.ingest(&response);
                        Ok(response)
                    }
                    None if timed_out => Err(ObdError::Timeout(self.config.command_timeout_ms)),
                    None => Err(ObdError::InvalidResponse(reply_text(&frame.text))),
                };
                if responder.send(result).is_err() {
                    debug!("Requester for {} went away", parameter.id);
                }
            }
        }

        // queued one-shot requests take the free slot before the next poll tick
        self.dispatch_request(now);
    }

    fn decode(&self, text: &str, parameter: &Arc<Parameter>) -> Option<DecodedResponse> {
        let response = codec::decode(text, parameter);
        if response.is_none() && !text.is_empty() {
            counter!("obd_decode_failures_total", "pid" => parameter.id.clone()).increment(1);
        }
        response
    }

    fn apply_init_action(&mut self, action: InitAction, now: Instant) {
        match action {
            InitAction::Send {
                command,
                expected_bytes,
            } => self.send(command, expected_bytes, Pending::Setup, now),
            InitAction::Complete => self.on_initialized(),
            InitAction::Failed => self.fail(ObdError::InitializationFailed),
        }
    }

    fn on_initialized(&mut self) {
        let mut working_set: Vec<ScheduledParameter> = Vec::new();
        for id in &self.config.watched {
            let (Some(parameter), Some(order)) = (self.catalog.get(id), self.catalog.position(id))
            else {
                warn!("Watched PID {} is not in the catalog", id);
                continue;
            };
            if working_set.iter().all(|s| s.parameter.id != parameter.id) {
                working_set.push(ScheduledParameter::new(Arc::clone(parameter), order));
            }
        }

        let supported = working_set
            .iter()
            .filter(|s| self.support.is_supported(&s.parameter.id))
            .count();
        info!(
            "Adapter ready: {} of {} watched PIDs supported",
            supported,
            working_set.len()
        );

        self.scheduler.load(working_set);
        if self.config.poll_on_connect {
            self.scheduler.enable();
        }
        self.connection.transition(ConnectionState::Connected);
    }
}

/// Reply without surrounding whitespace and prompt
fn reply_text(text: &str) -> String {
    text.trim().trim_end_matches(codec::PROMPT).trim().to_string()
}
