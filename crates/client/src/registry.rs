//! Idempotent registration of remotely-invocable capabilities.

use std::collections::BTreeMap;

use tracing::{debug, error};

use uplink_transport::{CapabilityHandler, RegisterError, Transport};

/// The set of capabilities this device exposes.
///
/// Registration with the endpoint happens once per transition into
/// `Connected`. The transport offers no "is registered" query, so a second
/// registration after a reconnect is expected to be refused — that refusal
/// is benign and treated as success.
#[derive(Default)]
pub struct CapabilityRegistry {
    handlers: std::sync::Mutex<BTreeMap<String, CapabilityHandler>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a capability handler.
    pub fn insert(&self, name: impl Into<String>, handler: CapabilityHandler) {
        if let Ok(mut handlers) = self.handlers.lock() {
            handlers.insert(name.into(), handler);
        }
    }

    /// Returns the registered capability names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.handlers
            .lock()
            .map(|handlers| handlers.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Registers every known capability with the transport.
    ///
    /// Best-effort, not all-or-nothing: a failed registration is logged and
    /// the remaining capabilities are still attempted.
    pub async fn register_all(&self, transport: &dyn Transport) {
        let handlers: Vec<(String, CapabilityHandler)> = self
            .handlers
            .lock()
            .map(|map| {
                map.iter()
                    .map(|(name, handler)| (name.clone(), handler.clone()))
                    .collect()
            })
            .unwrap_or_default();

        for (name, handler) in handlers {
            match transport.register_capability(&name, handler).await {
                Ok(()) => debug!(capability = %name, "capability registered"),
                Err(RegisterError::AlreadyRegistered(_)) => {
                    // Expected on reconnect.
                    debug!(capability = %name, "capability already registered");
                }
                Err(e) => {
                    error!(capability = %name, error = %e, "capability registration failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use uplink_protocol::messages::InvokeResult;
    use uplink_transport::HandlerFuture;

    fn dummy_handler() -> CapabilityHandler {
        Arc::new(|req| -> HandlerFuture {
            Box::pin(async move { Ok(InvokeResult::ok(req.payload)) })
        })
    }

    #[test]
    fn insert_and_names() {
        let registry = CapabilityRegistry::new();
        assert!(registry.names().is_empty());

        registry.insert("ping", dummy_handler());
        registry.insert("echo", dummy_handler());
        assert_eq!(registry.names(), vec!["echo".to_string(), "ping".to_string()]);
    }

    #[test]
    fn insert_replaces_existing() {
        let registry = CapabilityRegistry::new();
        registry.insert("ping", dummy_handler());
        registry.insert("ping", dummy_handler());
        assert_eq!(registry.names().len(), 1);
    }
}
