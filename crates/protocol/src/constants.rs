use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Protocol version sent in the `device_hello` handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Time to wait for a pong response (or any incoming message).
///
/// This acts as a read deadline: if *nothing* arrives within this window
/// (no pong, no ack, no invocation), the connection is considered dead.
pub const WS_PONG_WAIT: Duration = Duration::from_secs(60);

/// How often to send pings (must be well under [`WS_PONG_WAIT`]).
pub const WS_PING_PERIOD: Duration = Duration::from_secs(20);

/// Maximum message size in bytes (1 MB). Telemetry payloads are tiny;
/// anything larger is a protocol violation.
pub const WS_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Timeout for handshake and capability-registration round trips.
///
/// Telemetry sends deliberately carry no transport-internal timeout:
/// the dispatcher owns the send deadline.
pub const WS_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket message type identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    // Connection management
    #[serde(rename = "device_hello")]
    DeviceHello,
    #[serde(rename = "hello_ack")]
    HelloAck,

    // Requests from device to endpoint
    #[serde(rename = "telemetry")]
    Telemetry,
    #[serde(rename = "register_capability")]
    RegisterCapability,

    // Responses from endpoint to device
    #[serde(rename = "telemetry_ack")]
    TelemetryAck,
    #[serde(rename = "capability_registered")]
    CapabilityRegistered,
    #[serde(rename = "error")]
    Error,

    // Capability invocations (endpoint to device)
    #[serde(rename = "invoke")]
    Invoke,
    #[serde(rename = "invoke_result")]
    InvokeResult,

    // Keepalive
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "pong")]
    Pong,

    /// Forward compatibility: unknown message types deserialize here.
    #[serde(other)]
    Unknown,
}

/// Common wire error codes.
pub const ERR_CODE_BAD_REQUEST: i32 = 400;
pub const ERR_CODE_NOT_FOUND: i32 = 404;
/// Capability already registered for this device.
pub const ERR_CODE_ALREADY_REGISTERED: i32 = 409;
pub const ERR_CODE_INTERNAL: i32 = 500;

/// Status code for a successful capability invocation result.
pub const INVOKE_STATUS_OK: i32 = 200;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_serialization() {
        assert_eq!(
            serde_json::to_string(&MessageType::DeviceHello).unwrap(),
            "\"device_hello\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::Telemetry).unwrap(),
            "\"telemetry\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::RegisterCapability).unwrap(),
            "\"register_capability\""
        );
    }

    #[test]
    fn message_type_deserialization() {
        let mt: MessageType = serde_json::from_str("\"telemetry_ack\"").unwrap();
        assert_eq!(mt, MessageType::TelemetryAck);
    }

    #[test]
    fn unknown_message_type() {
        let mt: MessageType = serde_json::from_str("\"some_future_type\"").unwrap();
        assert_eq!(mt, MessageType::Unknown);
    }

    #[test]
    fn ping_period_under_pong_wait() {
        assert!(WS_PING_PERIOD < WS_PONG_WAIT);
    }
}
