//! # cordwire
//!
//! Client plumbing for chat bots: rate-governed REST commands and a
//! self-healing gateway session.
//!
//! ## Commands
//!
//! - [`RatelimitScheduler`] - queues commands per bucket, honors the limits
//!   the server reports and retries over-limit answers transparently
//! - [`BucketRegistry`] - per-route limit state plus the global lock
//! - [`CompletionHandle`] - awaitable outcome of a queued command
//!
//! ## Gateway
//!
//! - [`ConnectionController`] - connect, identify, heartbeat, resume and
//!   reconnect, with events published in receipt order
//! - [`ReconnectPolicy`] - ceiling on reconnect attempts per sliding window
//!
//! ## Glue
//!
//! - [`TaskScheduler`] - detached and per-key serial execution
//! - [`Client`] - wires everything together from a [`ClientConfig`]
//! - [`EntityCache`] - servers and channels addressed by kind
//!
//! # Example
//!
//! ```rust,no_run
//! use cordwire::{Client, ClientConfig, GatewayEvent};
//!
//! # async fn run() -> cordwire::CordResult<()> {
//! let client = Client::new(&ClientConfig::new("my-token"))?;
//! let mut events = client.subscribe();
//! client.connect();
//! let _ = client.update_game(Some("with the gateway"));
//!
//! while let Some(event) = events.recv().await {
//!     if let GatewayEvent::FatallyDisconnected { .. } = event {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod config;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod presence;
pub mod ratelimit;
pub mod route;
pub mod scheduler;

pub use client::Client;
pub use config::{ClientConfig, PresenceLimitConfig, ReconnectConfig};
pub use entity::{Capability, Channel, ChannelKind, EntityCache, Server, Snowflake};
pub use error::{CordError, CordResult};
pub use gateway::{
    ConnectionController, ConnectionState, ControllerOptions, GatewayEvent, ReconnectPolicy,
    Session,
};
pub use presence::{Game, GameKind, Presence, Status};
pub use ratelimit::{
    BucketRegistry, BucketState, CommandResponse, CommandTransport, CompletionHandle,
    RatelimitHeaders, RatelimitScheduler, TransportError,
};
pub use route::{Command, Method, RouteKey};
pub use scheduler::{LaneKey, TaskScheduler};
