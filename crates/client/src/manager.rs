//! Connection manager owning the lifecycle of the single logical connection.
//!
//! Drives the `Disconnected → Connecting → Connected` state machine from
//! transport events and its own connect attempts, selects the retry policy
//! before each attempt, and triggers capability registration on entry to
//! `Connected`.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use uplink_transport::Transport;

use crate::reconnection::{
    ConnCtx, cancel_any_connect, run_event_pump, spawn_connect_loop, teardown_and_reconnect,
};
use crate::registry::CapabilityRegistry;
use crate::types::{ClientConfig, ConnectionState, UplinkEvent};

/// Single owner of the connection-state value.
///
/// Transitions are atomic compare-and-set under one lock; observers follow
/// along through a watch channel.
pub(crate) struct StateCell {
    state: std::sync::Mutex<ConnectionState>,
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            state: std::sync::Mutex::new(ConnectionState::Disconnected),
            tx,
        }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        self.state
            .lock()
            .map(|guard| *guard)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Moves `from → to` if the current state is `from`. Never observes two
    /// transitions as simultaneous: the check and the write share one lock.
    pub(crate) fn compare_and_set(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let Ok(mut guard) = self.state.lock() else {
            return false;
        };
        if *guard != from {
            return false;
        }
        *guard = to;
        drop(guard);
        // send_replace publishes even with no live receivers, so a watcher
        // subscribing later still observes the current state.
        self.tx.send_replace(to);
        true
    }

    /// Unconditional write. Reserved for shutdown.
    pub(crate) fn set(&self, to: ConnectionState) {
        if let Ok(mut guard) = self.state.lock() {
            *guard = to;
        }
        self.tx.send_replace(to);
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }
}

/// Connection manager for the single device-endpoint connection.
pub struct ConnectionManager {
    pub(crate) ctx: ConnCtx,
    events_rx: tokio::sync::Mutex<Option<mpsc::Receiver<UplinkEvent>>>,
}

impl ConnectionManager {
    /// Creates a new connection manager. Call [`start`](Self::start) before
    /// [`connect`](Self::connect) so transport events are handled.
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<CapabilityRegistry>,
        config: &ClientConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);

        let ctx = ConnCtx {
            transport,
            registry,
            state: Arc::new(StateCell::new()),
            events_tx,
            connect_cancel: Arc::new(std::sync::Mutex::new(None)),
            backoff: config.backoff.clone(),
        };

        Self {
            ctx,
            events_rx: tokio::sync::Mutex::new(Some(events_rx)),
        }
    }

    /// Spawns the transport event pump. Idempotent in effect: the transport
    /// hands out its event receiver only once.
    pub async fn start(&self) {
        match self.ctx.transport.take_events().await {
            Some(events) => {
                tokio::spawn(run_event_pump(self.ctx.clone(), events));
            }
            None => {
                warn!("transport events already taken — connection-lost recovery disabled");
            }
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<UplinkEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.ctx.state.get()
    }

    /// Returns a watch receiver that follows state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.ctx.state.subscribe()
    }

    /// Starts connecting. A no-op (with a warning) unless the state is
    /// `Disconnected` — a call arriving while already connecting or
    /// connected must be rejected, not queued.
    pub fn connect(&self) {
        if !self.ctx.try_transition(ConnectionState::Disconnected, ConnectionState::Connecting) {
            warn!(state = ?self.state(), "connect requested but not disconnected — ignoring");
            return;
        }
        spawn_connect_loop(&self.ctx);
    }

    /// Tears the connection down and reconnects. Used by the operator
    /// command and by the dispatcher when a send times out. A no-op (with a
    /// warning) unless currently connected.
    pub async fn force_reconnect(&self) {
        if self.state() != ConnectionState::Connected {
            warn!(state = ?self.state(), "reconnect requested while not connected — ignoring");
            return;
        }
        info!("forcing reconnect");
        teardown_and_reconnect(&self.ctx).await;
    }

    /// Stops all connection activity and closes the transport. Idempotent.
    pub async fn shutdown(&self) {
        cancel_any_connect(&self.ctx.connect_cancel);
        self.ctx.set_state(ConnectionState::Disconnected);
        self.ctx.transport.close().await;
        info!("connection manager shut down");
    }
}
