//! Gateway connection.
//!
//! Manages the persistent session with the remote gateway, including
//! heartbeats, resume and reconnection bounded by a [`ReconnectPolicy`].

mod command;
mod controller;
mod events;
pub mod frame;
mod heartbeat;
mod policy;
mod session;
mod state;
mod transport;
mod ws;

pub use command::{
    DEFAULT_COMMAND_WINDOW, DEFAULT_COMMANDS_PER_WINDOW, GatewayCommandTransport, STATUS_DEFERRED,
};
pub use controller::{ConnectionController, ControllerOptions};
pub use events::GatewayEvent;
pub use frame::GatewayFrame;
pub use heartbeat::{Heartbeat, HeartbeatTick};
pub use policy::{
    AttemptDecision, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_BACKOFF,
    DEFAULT_WINDOW, ReconnectPolicy, calculate_backoff,
};
pub use session::Session;
pub use state::{AtomicConnectionState, ConnectionState};
pub use transport::{SocketConnection, SocketTransport};
pub use ws::{GATEWAY_VERSION, WsTransport};
