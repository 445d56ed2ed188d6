//! OBD-II Session Scheduling
//!
//! Adapter initialization, single-flight round-robin polling of the watched
//! PIDs, and the async session that runs it all over a byte stream.

mod config;
mod connection;
mod engine;
mod initializer;
mod scheduler;
mod session;

pub use config::SessionConfig;
pub use connection::{ConnectionState, ConnectionStateMachine};
pub use engine::{EngineStatus, ObdEngine, Responder};
pub use initializer::{AdapterInitializer, InitAction, InitPhase};
pub use scheduler::{PollScheduler, ScheduledParameter};
pub use session::{ObdSession, SessionHandle};
