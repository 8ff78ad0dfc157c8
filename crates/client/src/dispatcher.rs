//! Telemetry send scheduling with bounded-wait sends.
//!
//! A fixed-period timer drives [`TelemetryDispatcher::try_send`]; the
//! operator's "send now" command lands on the same entry point, so one set
//! of gating rules covers both. At most one send is ever in flight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use uplink_transport::Transport;

use crate::manager::ConnectionManager;
use crate::types::{ClientConfig, ConnectionState, UplinkEvent};

/// Bookkeeping for the single in-flight telemetry send.
struct PendingSend {
    cancel: CancellationToken,
}

type PendingSlot = Arc<std::sync::Mutex<Option<PendingSend>>>;

/// Shared state for a spawned send task.
#[derive(Clone)]
struct SendCtx {
    transport: Arc<dyn Transport>,
    manager: Arc<ConnectionManager>,
    events_tx: mpsc::Sender<UplinkEvent>,
    pending: PendingSlot,
    send_timeout: Duration,
}

/// Periodic telemetry sender.
pub struct TelemetryDispatcher {
    transport: Arc<dyn Transport>,
    manager: Arc<ConnectionManager>,
    events_tx: mpsc::Sender<UplinkEvent>,
    pending: PendingSlot,
    interval: Duration,
    send_timeout: Duration,
    shutdown: CancellationToken,
}

impl TelemetryDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        manager: Arc<ConnectionManager>,
        config: &ClientConfig,
    ) -> Self {
        let events_tx = manager.ctx.events_tx.clone();
        Self {
            transport,
            manager,
            events_tx,
            pending: Arc::new(std::sync::Mutex::new(None)),
            interval: config.telemetry_interval,
            send_timeout: config.send_timeout,
            shutdown: CancellationToken::new(),
        }
    }

    /// Runs the periodic send schedule until [`shutdown`](Self::shutdown).
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await; // Skip immediate first tick.

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.try_send();
                }
            }
        }
        debug!("telemetry schedule stopped");
    }

    /// Spawns the schedule on its own task.
    pub fn spawn_schedule(self: &Arc<Self>) {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.run().await });
    }

    /// Starts a telemetry send unless the connection is down or a send is
    /// already in flight. Returns whether a send was started.
    ///
    /// Claiming the pending slot is a single check-and-set under one lock,
    /// so a timer tick and a manual trigger can never start two overlapping
    /// sends.
    pub fn try_send(&self) -> bool {
        if self.manager.state() != ConnectionState::Connected {
            debug!("skipping telemetry send — not connected");
            return false;
        }

        let cancel = {
            let Ok(mut slot) = self.pending.lock() else {
                return false;
            };
            if slot.is_some() {
                debug!("telemetry send already in flight — skipping");
                return false;
            }
            let cancel = CancellationToken::new();
            *slot = Some(PendingSend {
                cancel: cancel.clone(),
            });
            cancel
        };

        let ctx = SendCtx {
            transport: self.transport.clone(),
            manager: self.manager.clone(),
            events_tx: self.events_tx.clone(),
            pending: self.pending.clone(),
            send_timeout: self.send_timeout,
        };
        tokio::spawn(run_send(ctx, cancel));
        true
    }

    /// Whether a send is currently outstanding.
    pub fn send_in_flight(&self) -> bool {
        self.pending
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Stops the schedule and abandons any in-flight send. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        if let Ok(slot) = self.pending.lock()
            && let Some(pending) = slot.as_ref()
        {
            pending.cancel.cancel();
        }
    }
}

/// One bounded-wait send: the transport call races the deadline, the
/// cancellation handle, and a connection-state change.
///
/// The cancellation handle is advisory — it stops this task from waiting,
/// but the transport call underneath is not guaranteed to abort. Clearing
/// the slot is a `take()`, so a late outcome can never resurrect a
/// cleared PendingSend.
async fn run_send(ctx: SendCtx, cancel: CancellationToken) {
    let body = chrono::Utc::now().to_rfc3339();
    let mut state_rx = ctx.manager.watch_state();
    debug!("sending telemetry");

    tokio::select! {
        result = ctx.transport.send(body) => {
            match result {
                Ok(message_id) => {
                    info!(%message_id, "telemetry sent");
                    let _ = ctx.events_tx.try_send(UplinkEvent::TelemetrySent { message_id });
                }
                Err(e) => {
                    // A fast failure is not a connection-health signal; the
                    // schedule continues untouched.
                    warn!(error = %e, "telemetry send failed");
                    let _ = ctx.events_tx.try_send(UplinkEvent::TelemetryFailed {
                        error: e.to_string(),
                    });
                }
            }
            clear_pending(&ctx.pending);
        }
        _ = tokio::time::sleep(ctx.send_timeout) => {
            // The transport gave no timely outcome — stop waiting on it and
            // treat the connection as unusable.
            cancel.cancel();
            clear_pending(&ctx.pending);
            warn!(
                timeout_secs = ctx.send_timeout.as_secs(),
                "telemetry send timed out — forcing reconnect"
            );
            let _ = ctx.events_tx.try_send(UplinkEvent::SendTimeout);
            ctx.manager.force_reconnect().await;
        }
        _ = cancel.cancelled() => {
            debug!("telemetry send abandoned");
            clear_pending(&ctx.pending);
        }
        _ = wait_disconnected(&mut state_rx) => {
            debug!("connection lost while sending — abandoning send");
            clear_pending(&ctx.pending);
        }
    }
}

/// Resolves when the connection leaves `Connected`.
async fn wait_disconnected(state_rx: &mut watch::Receiver<ConnectionState>) {
    // Drop the watch ref before any await: holding it across a suspension
    // point would make the send task non-Send.
    let closed = state_rx
        .wait_for(|state| *state != ConnectionState::Connected)
        .await
        .is_err();
    if closed {
        // Sender dropped: no more state changes will ever arrive. Let the
        // other race arms settle the send.
        std::future::pending::<()>().await;
    }
}

/// Clears the pending slot. Safe to call when already cleared.
fn clear_pending(pending: &PendingSlot) {
    if let Ok(mut slot) = pending.lock() {
        slot.take();
    }
}
