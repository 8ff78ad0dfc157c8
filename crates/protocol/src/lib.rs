//! Wire protocol types for device-endpoint communication.
//!
//! Defines the JSON envelope, message type identifiers, typed payloads,
//! and protocol constants shared by the transport and the uplink core.

pub mod constants;
pub mod envelope;
pub mod messages;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{Message, WireError};
pub use messages::{
    DeviceHello, HelloAck, InvokeRequest, InvokeResult, RegisterCapabilityRequest, TelemetryAck,
    TelemetryPayload,
};
