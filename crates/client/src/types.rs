//! Public types for the uplink core.

use std::time::Duration;

use uplink_transport::BackoffConfig;

/// Lifecycle state of the single logical connection.
///
/// Owned exclusively by the [`ConnectionManager`](crate::ConnectionManager);
/// other components read it, never mutate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected; telemetry may be sent.
    Connected,
}

/// Events emitted by the core for observers (UI, logs, tests).
#[derive(Debug, Clone)]
pub enum UplinkEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A telemetry message was acknowledged by the endpoint.
    TelemetrySent { message_id: String },
    /// A telemetry send failed quickly. The schedule continues.
    TelemetryFailed { error: String },
    /// A telemetry send exceeded its deadline; a reconnect was forced.
    SendTimeout,
}

/// Timing and backoff configuration for the core.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Period between telemetry sends.
    pub telemetry_interval: Duration,
    /// Deadline for a single telemetry send before it is abandoned and the
    /// connection is recycled.
    pub send_timeout: Duration,
    /// Backoff applied by the transport during connect attempts.
    pub backoff: BackoffConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            telemetry_interval: Duration::from_secs(10),
            send_timeout: Duration::from_secs(20),
            backoff: BackoffConfig::default(),
        }
    }
}
