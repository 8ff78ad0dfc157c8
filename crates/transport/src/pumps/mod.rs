//! Connection pumps: read dispatch, write serialisation, keepalive pings.

pub(crate) mod ping;
pub(crate) mod read;
pub(crate) mod write;
