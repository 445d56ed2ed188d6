//! Connection Lifecycle
//!
//! One [`ConnectionStateMachine`] per session. The collaborator that acquires the
//! transport creates it (and may publish scanning/connecting/failed itself), then
//! hands it to the engine, which drives the rest of the lifecycle.

use obd_protocol::ObdError;
use tokio::sync::watch;
use tracing::{info, warn};

/// Session connection state
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ConnectionState {
    /// No session
    #[default]
    Disconnected,
    /// Looking for the adapter
    Scanning,
    /// Opening the transport
    Connecting,
    /// Running the adapter handshake and support probe
    Initializing,
    /// Ready for requests
    Connected,
    /// Gave up; the reason is surfaced to the user
    Failed(ObdError),
}

impl ConnectionState {
    /// Check if requests can be served
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Disconnected) | (_, Failed(_)) => true,
            (Disconnected | Failed(_), Scanning | Connecting) => true,
            (Scanning, Connecting) => true,
            (Connecting, Initializing) => true,
            (Initializing, Connected) => true,
            _ => false,
        }
    }
}

/// Validated transitions published on a watch channel
#[derive(Debug)]
pub struct ConnectionStateMachine {
    tx: watch::Sender<ConnectionState>,
}

impl ConnectionStateMachine {
    /// Create a machine in [`ConnectionState::Disconnected`]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Move to `next` if the lifecycle allows it
    ///
    /// Re-entering the current state is accepted without notifying subscribers.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let current = self.state();
        if current == next {
            return true;
        }
        if !current.can_transition_to(&next) {
            warn!("Rejected connection transition {:?} -> {:?}", current, next);
            return false;
        }

        info!("Connection state {:?} -> {:?}", current, next);
        self.tx.send_replace(next);
        true
    }

    /// Publish [`ConnectionState::Scanning`]
    pub fn begin_scan(&self) -> bool {
        self.transition(ConnectionState::Scanning)
    }

    /// Publish [`ConnectionState::Connecting`]
    pub fn begin_connect(&self) -> bool {
        self.transition(ConnectionState::Connecting)
    }

    /// Publish [`ConnectionState::Failed`]
    pub fn fail(&self, reason: ObdError) {
        self.transition(ConnectionState::Failed(reason));
    }

    /// Publish [`ConnectionState::Disconnected`]
    pub fn reset(&self) {
        self.transition(ConnectionState::Disconnected);
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
