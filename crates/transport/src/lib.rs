//! Transport layer for the uplink client.
//!
//! Defines the [`Transport`] facade the resilience core consumes, the
//! retry-policy types, and a WebSocket implementation with read/write/ping
//! pumps and request-response correlation.

pub mod facade;
pub(crate) mod pumps;
pub mod retry;
pub mod ws;

pub use facade::{
    CapabilityHandler, HandlerError, HandlerFuture, RegisterError, Transport, TransportError,
    TransportEvent,
};
pub use retry::{BackoffConfig, RetryPolicy};
pub use ws::{WsConfig, WsTransport};
