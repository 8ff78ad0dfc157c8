//! Connect loop and transport event handling.
//!
//! Contains the shared [`ConnCtx`], cancellation helpers, the reconnect
//! protocol, and the transport event pump.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use uplink_transport::{BackoffConfig, RetryPolicy, Transport, TransportEvent};

use crate::manager::StateCell;
use crate::registry::CapabilityRegistry;
use crate::types::{ConnectionState, UplinkEvent};

/// Shared state passed to free functions for the connect loop and the
/// event pump. Avoids threading half a dozen separate Arc parameters.
#[derive(Clone)]
pub(crate) struct ConnCtx {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: Arc<CapabilityRegistry>,
    pub(crate) state: Arc<StateCell>,
    pub(crate) events_tx: mpsc::Sender<UplinkEvent>,
    /// Cancel token for the active connect loop.
    pub(crate) connect_cancel: Arc<std::sync::Mutex<Option<CancellationToken>>>,
    pub(crate) backoff: BackoffConfig,
}

impl ConnCtx {
    /// Atomic `from → to` transition, published to watchers and emitted as
    /// an event when it succeeds.
    pub(crate) fn try_transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        if !self.state.compare_and_set(from, to) {
            return false;
        }
        let _ = self.events_tx.try_send(UplinkEvent::StateChanged(to));
        true
    }

    /// Unconditional state write. Reserved for shutdown.
    pub(crate) fn set_state(&self, to: ConnectionState) {
        self.state.set(to);
        let _ = self.events_tx.try_send(UplinkEvent::StateChanged(to));
    }
}

/// Cancels the active connect loop, if any.
pub(crate) fn cancel_any_connect(
    connect_cancel: &std::sync::Mutex<Option<CancellationToken>>,
) {
    if let Ok(mut guard) = connect_cancel.lock()
        && let Some(token) = guard.take()
    {
        token.cancel();
    }
}

/// Stores a fresh cancel token (cancelling any previous one) and spawns the
/// connect loop. The state must already be `Connecting`.
pub(crate) fn spawn_connect_loop(ctx: &ConnCtx) {
    let cancel = CancellationToken::new();
    cancel_any_connect(&ctx.connect_cancel);
    if let Ok(mut guard) = ctx.connect_cancel.lock() {
        *guard = Some(cancel.clone());
    }
    tokio::spawn(connect_loop(ctx.clone(), cancel));
}

/// Tears down a connected transport and starts reconnecting.
///
/// Moving to `Disconnected` first lets the dispatcher abandon any in-flight
/// send before the new attempt begins.
pub(crate) async fn teardown_and_reconnect(ctx: &ConnCtx) {
    if !ctx.try_transition(ConnectionState::Connected, ConnectionState::Disconnected) {
        debug!("teardown requested but already disconnected");
        return;
    }
    // Only the caller that won the transition may cancel: a loser cancelling
    // here could kill the winner's freshly spawned connect loop.
    cancel_any_connect(&ctx.connect_cancel);
    ctx.transport.close().await;
    if ctx.try_transition(ConnectionState::Disconnected, ConnectionState::Connecting) {
        spawn_connect_loop(ctx);
    }
}

/// The reconnect protocol: open attempts until one succeeds.
///
/// Before each attempt the transport is given the backoff policy so it
/// absorbs short-lived flaps internally during the handshake; each `open`
/// still resolves exactly once, and a failed open re-enters the loop
/// immediately. On success the policy is reset to `NoRetry` so steady-state
/// send failures cannot be masked by hidden transport retries.
pub(crate) async fn connect_loop(ctx: ConnCtx, cancel: CancellationToken) {
    let mut attempt: u32 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        ctx.transport
            .set_retry_policy(RetryPolicy::ExponentialBackoffWithJitter(ctx.backoff.clone()));
        info!(attempt, "connecting");

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("connect cancelled");
                return;
            }
            result = ctx.transport.open() => result,
        };

        match result {
            Ok(()) => {
                ctx.transport.set_retry_policy(RetryPolicy::NoRetry);
                if !ctx.try_transition(ConnectionState::Connecting, ConnectionState::Connected) {
                    // Shutdown won the race; don't leave the socket up.
                    warn!("open succeeded but connect was cancelled, closing");
                    ctx.transport.close().await;
                    return;
                }
                info!(attempt, "connected");
                ctx.registry.register_all(ctx.transport.as_ref()).await;
                break;
            }
            Err(e) => {
                warn!(attempt, error = %e, "connect failed");
                ctx.try_transition(ConnectionState::Connecting, ConnectionState::Disconnected);
                if cancel.is_cancelled() {
                    return;
                }
                if !ctx.try_transition(ConnectionState::Disconnected, ConnectionState::Connecting) {
                    return;
                }
            }
        }
    }

    // Clean up the cancel slot if the token is still ours.
    if let Ok(mut guard) = ctx.connect_cancel.lock()
        && !cancel.is_cancelled()
    {
        *guard = None;
    }
}

/// Consumes transport events until the transport drops its sender.
///
/// Generic errors never force a state transition. A lost-connection
/// notification is only meaningful from `Connected`; from `Connecting` it
/// is an illegal transition that gets logged and ignored.
pub(crate) async fn run_event_pump(ctx: ConnCtx, mut events: mpsc::Receiver<TransportEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Error(message) => {
                error!(%message, "transport error");
            }
            TransportEvent::ConnectionLost => match ctx.state.get() {
                ConnectionState::Connected => {
                    warn!("connection lost");
                    teardown_and_reconnect(&ctx).await;
                }
                ConnectionState::Connecting => {
                    warn!("connection lost reported while connecting — ignoring");
                }
                ConnectionState::Disconnected => {
                    debug!("connection lost reported while disconnected — ignoring");
                }
            },
        }
    }
}
