//! Typed payloads carried inside the [`Message`](crate::envelope::Message) envelope.

use serde::{Deserialize, Serialize};

/// Handshake request sent by the device immediately after the socket opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceHello {
    pub device_id: String,
    pub device_name: String,
    pub version: String,
    pub protocol_version: u32,
}

/// Handshake acknowledgement from the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAck {
    pub session_id: String,
}

/// A telemetry reading. The body is opaque to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    pub body: String,
}

/// Endpoint acknowledgement for a delivered telemetry message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryAck {
    pub message_id: String,
}

/// Request to register a remotely-invocable capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterCapabilityRequest {
    pub name: String,
}

/// Inbound capability invocation from the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Result of a capability invocation, sent back to the endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeResult {
    pub status: i32,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl InvokeResult {
    /// A successful result echoing the given payload.
    pub fn ok(payload: serde_json::Value) -> Self {
        Self {
            status: crate::constants::INVOKE_STATUS_OK,
            payload,
        }
    }
}
