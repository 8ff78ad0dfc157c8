//! WebSocket transport for device-endpoint communication.
//!
//! Implements request-response with UUID correlation, ping/pong keepalive,
//! capability-invocation dispatch, and policy-driven retry inside `open`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use uplink_protocol::constants::{
    ERR_CODE_ALREADY_REGISTERED, ERR_CODE_INTERNAL, MessageType, PROTOCOL_VERSION,
    WS_MAX_MESSAGE_SIZE, WS_REQUEST_TIMEOUT,
};
use uplink_protocol::envelope::Message;
use uplink_protocol::messages::{
    DeviceHello, HelloAck, RegisterCapabilityRequest, TelemetryAck, TelemetryPayload,
};

use crate::facade::{
    CapabilityHandler, RegisterError, Transport, TransportError, TransportEvent,
};
use crate::retry::RetryPolicy;

pub(crate) type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;
pub(crate) type CapabilityMap = Arc<Mutex<HashMap<String, CapabilityHandler>>>;

/// Connection settings for [`WsTransport`].
#[derive(Debug, Clone)]
pub struct WsConfig {
    /// WebSocket endpoint URL (`ws://` or `wss://`).
    pub url: String,
    pub device_id: String,
    pub device_name: String,
}

/// A live WebSocket session: pump handles plus the request-correlation map.
struct Conn {
    write_tx: mpsc::Sender<tungstenite::Message>,
    pending: PendingMap,
    cancel: CancellationToken,
    _read_handle: tokio::task::JoinHandle<()>,
    _write_handle: tokio::task::JoinHandle<()>,
    _ping_handle: tokio::task::JoinHandle<()>,
}

impl Conn {
    /// Gracefully closes the session.
    async fn close(&self) {
        self.cancel.cancel();
        let _ = self.write_tx.send(tungstenite::Message::Close(None)).await;
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        self.cancel.cancel();
        self._read_handle.abort();
        self._write_handle.abort();
        self._ping_handle.abort();
    }
}

/// WebSocket implementation of the [`Transport`] facade.
///
/// Capability handlers survive reconnects: the dispatch map is owned by the
/// transport, not the session, and registration re-inserts handlers on each
/// successful round trip (including the already-registered case).
pub struct WsTransport {
    config: WsConfig,
    policy: std::sync::Mutex<RetryPolicy>,
    conn: Mutex<Option<Conn>>,
    capabilities: CapabilityMap,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

impl WsTransport {
    /// Creates a transport for the given endpoint. No I/O happens until `open`.
    pub fn new(config: WsConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            config,
            policy: std::sync::Mutex::new(RetryPolicy::NoRetry),
            conn: Mutex::new(None),
            capabilities: Arc::new(Mutex::new(HashMap::new())),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    fn current_policy(&self) -> RetryPolicy {
        self.policy
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// Dials the endpoint, spawns the pumps, and performs the
    /// `device_hello` handshake.
    async fn dial(&self) -> Result<Conn, TransportError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
        let (ws_stream, _) = tokio_tungstenite::connect_async_with_config(
            &self.config.url,
            Some(ws_config),
            false,
        )
        .await?;
        let (write, read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(write, write_rx, cancel))
        };

        let read_handle = {
            let pending = pending.clone();
            let capabilities = self.capabilities.clone();
            let write_tx = write_tx.clone();
            let events_tx = self.events_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::read::read_pump(
                read,
                pending,
                capabilities,
                write_tx,
                events_tx,
                cancel,
            ))
        };

        let ping_handle = {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::ping::ping_pump(write_tx, cancel))
        };

        let conn = Conn {
            write_tx,
            pending,
            cancel,
            _read_handle: read_handle,
            _write_handle: write_handle,
            _ping_handle: ping_handle,
        };

        let hello = DeviceHello {
            device_id: self.config.device_id.clone(),
            device_name: self.config.device_name.clone(),
            version: env!("CARGO_PKG_VERSION").into(),
            protocol_version: PROTOCOL_VERSION,
        };

        let resp = match request(
            &conn.write_tx,
            &conn.pending,
            MessageType::DeviceHello,
            Some(&hello),
            Some(WS_REQUEST_TIMEOUT),
        )
        .await
        {
            Ok(resp) => resp,
            Err(e) => {
                conn.close().await;
                return Err(TransportError::Handshake(e.to_string()));
            }
        };

        let ack: HelloAck = resp
            .parse_payload()?
            .ok_or_else(|| TransportError::Handshake("empty hello ack".into()))?;
        debug!(session = %ack.session_id, "handshake complete");
        Ok(conn)
    }

    async fn conn_handles(
        &self,
    ) -> Result<(mpsc::Sender<tungstenite::Message>, PendingMap), TransportError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(TransportError::Closed)?;
        Ok((conn.write_tx.clone(), conn.pending.clone()))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self) -> Result<(), TransportError> {
        let policy = self.current_policy();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            match self.dial().await {
                Ok(conn) => {
                    if let Some(old) = self.conn.lock().await.replace(conn) {
                        old.close().await;
                    }
                    info!(url = %self.config.url, "transport open");
                    return Ok(());
                }
                Err(e) => {
                    let RetryPolicy::ExponentialBackoffWithJitter(ref cfg) = policy else {
                        return Err(e);
                    };
                    if attempt >= cfg.max_attempts {
                        return Err(e);
                    }
                    let delay = cfg.delay_for_attempt(attempt);
                    warn!(
                        attempt,
                        error = %e,
                        delay_secs = format_args!("{:.1}", delay.as_secs_f64()),
                        "connect attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn close(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            conn.close().await;
            debug!("transport closed");
        }
    }

    async fn send(&self, body: String) -> Result<String, TransportError> {
        let (write_tx, pending) = self.conn_handles().await?;
        let payload = TelemetryPayload { body };

        // No internal timeout: the dispatcher owns the send deadline.
        let resp = request(
            &write_tx,
            &pending,
            MessageType::Telemetry,
            Some(&payload),
            None,
        )
        .await?;

        let ack: TelemetryAck = resp.parse_payload()?.ok_or(TransportError::Endpoint {
            code: ERR_CODE_INTERNAL,
            message: "empty telemetry ack".into(),
        })?;
        Ok(ack.message_id)
    }

    fn set_retry_policy(&self, policy: RetryPolicy) {
        if let Ok(mut guard) = self.policy.lock() {
            *guard = policy;
        }
    }

    async fn register_capability(
        &self,
        name: &str,
        handler: CapabilityHandler,
    ) -> Result<(), RegisterError> {
        let (write_tx, pending) = self
            .conn_handles()
            .await
            .map_err(|e| RegisterError::Failed(e.to_string()))?;

        let req = RegisterCapabilityRequest { name: name.into() };
        let result = request(
            &write_tx,
            &pending,
            MessageType::RegisterCapability,
            Some(&req),
            Some(WS_REQUEST_TIMEOUT),
        )
        .await;

        match result {
            Ok(_) => {
                self.capabilities.lock().await.insert(name.into(), handler);
                Ok(())
            }
            Err(TransportError::Endpoint { code, message })
                if code == ERR_CODE_ALREADY_REGISTERED
                    || message.to_lowercase().contains("already registered") =>
            {
                // Still install the handler: the endpoint will keep routing
                // invocations to this connection.
                self.capabilities.lock().await.insert(name.into(), handler);
                Err(RegisterError::AlreadyRegistered(name.into()))
            }
            Err(e) => Err(RegisterError::Failed(e.to_string())),
        }
    }

    async fn take_events(&self) -> Option<mpsc::Receiver<TransportEvent>> {
        self.events_rx.lock().await.take()
    }
}

/// Sends a request envelope and waits for the correlated response.
///
/// The pending entry is cleaned up on every exit path, so a late response
/// for a timed-out request is silently dropped by the read pump.
async fn request<T: Serialize>(
    write_tx: &mpsc::Sender<tungstenite::Message>,
    pending: &PendingMap,
    msg_type: MessageType,
    payload: Option<&T>,
    timeout: Option<std::time::Duration>,
) -> Result<Message, TransportError> {
    let id = uuid::Uuid::new_v4().to_string();
    let msg = Message::new(&id, msg_type, payload)?;
    let json = serde_json::to_string(&msg)?;

    let (tx, rx) = oneshot::channel();
    pending.lock().await.insert(id.clone(), tx);

    if write_tx
        .send(tungstenite::Message::Text(json.into()))
        .await
        .is_err()
    {
        pending.lock().await.remove(&id);
        return Err(TransportError::Closed);
    }

    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, rx).await {
            Ok(r) => r,
            Err(_) => {
                pending.lock().await.remove(&id);
                return Err(TransportError::Timeout);
            }
        },
        None => rx.await,
    };
    pending.lock().await.remove(&id);

    match result {
        Ok(resp) => {
            if let Some(err) = &resp.error {
                return Err(TransportError::Endpoint {
                    code: err.code,
                    message: err.message.clone(),
                });
            }
            Ok(resp)
        }
        Err(_) => Err(TransportError::Closed),
    }
}
