//! The minimal capability set the resilience core requires from a transport.
//!
//! The core never talks to a socket directly; it holds an `Arc<dyn Transport>`
//! and reacts to [`TransportEvent`]s. Tests substitute a scripted mock.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use uplink_protocol::messages::{InvokeRequest, InvokeResult};

use crate::retry::RetryPolicy;

/// Errors from a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("endpoint error {code}: {message}")]
    Endpoint { code: i32, message: String },
}

/// Outcome of a capability-registration call.
///
/// The endpoint offers no "is registered" query, so re-registration on
/// reconnect is expected; [`RegisterError::AlreadyRegistered`] lets callers
/// treat that case as success without matching error strings.
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error("capability '{0}' already registered")]
    AlreadyRegistered(String),

    #[error("registration failed: {0}")]
    Failed(String),
}

/// A failure produced by a capability handler.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

/// A boxed future returned by capability handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<InvokeResult, HandlerError>> + Send>>;

/// Handler for an inbound capability invocation.
///
/// Handlers are cloned into the transport's dispatch map; failures are
/// caught by the transport, logged, and answered with an error envelope.
pub type CapabilityHandler = Arc<dyn Fn(InvokeRequest) -> HandlerFuture + Send + Sync>;

/// Asynchronous notifications from the transport.
#[derive(Debug)]
pub enum TransportEvent {
    /// A generic, non-fatal transport error. Logged by the core; never
    /// forces a state transition.
    Error(String),
    /// The connection died. Only meaningful while connected.
    ConnectionLost,
}

/// The connection capabilities the core requires.
///
/// `open` and `send` deliver their outcome exactly once. `send` may hang
/// indefinitely; callers own the deadline.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the connection, honoring the currently set retry policy for
    /// transient dial/handshake failures.
    async fn open(&self) -> Result<(), TransportError>;

    /// Closes the connection. Best-effort and idempotent.
    async fn close(&self);

    /// Sends one telemetry body and returns the endpoint's ack message id.
    async fn send(&self, body: String) -> Result<String, TransportError>;

    /// Sets the retry policy used by the next `open` call.
    fn set_retry_policy(&self, policy: RetryPolicy);

    /// Registers a capability handler with the endpoint.
    async fn register_capability(
        &self,
        name: &str,
        handler: CapabilityHandler,
    ) -> Result<(), RegisterError>;

    /// Takes the event receiver. Can only be called once.
    async fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>>;
}
