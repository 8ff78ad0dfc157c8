//! Connection resilience core for the uplink device client.
//!
//! Owns the connection lifecycle state machine, the periodic telemetry
//! schedule with bounded-wait sends, and idempotent capability registration.
//! Talks to the wire only through the [`Transport`](uplink_transport::Transport)
//! facade.

pub mod dispatcher;
pub mod manager;
pub(crate) mod reconnection;
pub mod registry;
pub mod types;

pub use dispatcher::TelemetryDispatcher;
pub use manager::ConnectionManager;
pub use registry::CapabilityRegistry;
pub use types::{ClientConfig, ConnectionState, UplinkEvent};
