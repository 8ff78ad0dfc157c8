//! WebSocket read pump — dispatches incoming messages.

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use futures_util::StreamExt;

use uplink_protocol::constants::{
    ERR_CODE_BAD_REQUEST, ERR_CODE_INTERNAL, ERR_CODE_NOT_FOUND, MessageType, WS_MAX_MESSAGE_SIZE,
    WS_PONG_WAIT,
};
use uplink_protocol::envelope::Message;
use uplink_protocol::messages::InvokeRequest;

use crate::facade::TransportEvent;
use crate::ws::{CapabilityMap, PendingMap};

/// Reads messages from the WebSocket and dispatches them.
///
/// Uses a pong deadline to detect dead connections: if no message of any
/// kind arrives within [`WS_PONG_WAIT`] after a ping was sent, the
/// connection is considered dead and the loop exits.
pub(crate) async fn read_pump<S>(
    mut read: S,
    pending: PendingMap,
    capabilities: CapabilityMap,
    write_tx: mpsc::Sender<tungstenite::Message>,
    events_tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    // ANY incoming message resets the deadline, not just Pong.
    let pong_deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(pong_deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut pong_deadline => {
                warn!("pong timeout — connection dead, closing");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        pong_deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                handle_text_message(
                                    &text,
                                    &pending,
                                    &capabilities,
                                    &write_tx,
                                    &events_tx,
                                )
                                .await;
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(_) => {
                                debug!("received close frame");
                                break;
                            }
                            _ => {} // Binary — ignore
                        }
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // A deliberate close (cancel) is not a lost connection.
    if !cancel.is_cancelled() {
        let _ = events_tx.try_send(TransportEvent::ConnectionLost);
    }
}

/// Handles a text message from the WebSocket.
async fn handle_text_message(
    text: &str,
    pending: &PendingMap,
    capabilities: &CapabilityMap,
    write_tx: &mpsc::Sender<tungstenite::Message>,
    events_tx: &mpsc::Sender<TransportEvent>,
) {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        warn!("message too large ({} bytes), dropping", text.len());
        let _ = events_tx.try_send(TransportEvent::Error(format!(
            "oversized message ({} bytes)",
            text.len()
        )));
        return;
    }

    let msg: Message = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse message: {e}");
            let _ = events_tx.try_send(TransportEvent::Error(format!("malformed message: {e}")));
            return;
        }
    };

    trace!(msg_type = ?msg.msg_type, id = %msg.id, "received message");

    // Route response to pending request.
    let mut map = pending.lock().await;
    if let Some(tx) = map.remove(&msg.id) {
        let _ = tx.send(msg);
        return;
    }
    drop(map);

    match msg.msg_type {
        MessageType::Invoke => {
            dispatch_invoke(msg, capabilities, write_tx).await;
        }
        MessageType::Ping => {
            if let Ok(reply) = msg.reply(MessageType::Pong, Option::<&()>::None) {
                send_reply(write_tx, &reply).await;
            }
        }
        _ => {
            warn!(msg_type = ?msg.msg_type, id = %msg.id, "unexpected message — dropping");
        }
    }
}

/// Dispatches an `invoke` message to the registered handler.
///
/// The handler runs on its own task so a slow capability cannot stall the
/// read pump. Handler failures are answered with an error envelope and
/// logged, never propagated.
async fn dispatch_invoke(
    msg: Message,
    capabilities: &CapabilityMap,
    write_tx: &mpsc::Sender<tungstenite::Message>,
) {
    let request: InvokeRequest = match msg.parse_payload() {
        Ok(Some(r)) => r,
        Ok(None) => {
            send_reply(
                write_tx,
                &msg.reply_error(ERR_CODE_BAD_REQUEST, "missing invoke payload"),
            )
            .await;
            return;
        }
        Err(e) => {
            send_reply(
                write_tx,
                &msg.reply_error(ERR_CODE_BAD_REQUEST, format!("bad invoke payload: {e}")),
            )
            .await;
            return;
        }
    };

    let handler = capabilities.lock().await.get(&request.name).cloned();
    let Some(handler) = handler else {
        warn!(capability = %request.name, "invocation for unknown capability");
        send_reply(
            write_tx,
            &msg.reply_error(
                ERR_CODE_NOT_FOUND,
                format!("unknown capability: {}", request.name),
            ),
        )
        .await;
        return;
    };

    let write_tx = write_tx.clone();
    tokio::spawn(async move {
        let name = request.name.clone();
        let reply = match handler(request).await {
            Ok(result) => match msg.reply(MessageType::InvokeResult, Some(&result)) {
                Ok(r) => r,
                Err(e) => {
                    warn!(capability = %name, "failed to serialize invoke result: {e}");
                    msg.reply_error(ERR_CODE_INTERNAL, "result serialization failed")
                }
            },
            Err(e) => {
                warn!(capability = %name, error = %e, "capability handler failed");
                msg.reply_error(ERR_CODE_INTERNAL, e.to_string())
            }
        };
        send_reply(&write_tx, &reply).await;
    });
}

async fn send_reply(write_tx: &mpsc::Sender<tungstenite::Message>, reply: &Message) {
    match serde_json::to_string(reply) {
        Ok(json) => {
            let _ = write_tx.send(tungstenite::Message::Text(json.into())).await;
        }
        Err(e) => warn!("failed to serialize reply: {e}"),
    }
}
