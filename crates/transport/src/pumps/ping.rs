//! WebSocket ping pump — periodic keepalive pings.

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use uplink_protocol::constants::WS_PING_PERIOD;

/// Sends periodic pings to keep the connection alive.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(WS_PING_PERIOD);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let ping = tungstenite::Message::Ping(vec![].into());
                if write_tx.send(ping).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn emits_a_ping_each_period() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(ping_pump(tx, cancel.clone()));

        // Two full periods, two pings. The first tick is skipped.
        for _ in 0..2 {
            tokio::time::advance(WS_PING_PERIOD + std::time::Duration::from_millis(1)).await;
            let frame = rx.recv().await.unwrap();
            assert!(matches!(frame, tungstenite::Message::Ping(_)));
        }
        assert!(rx.try_recv().is_err(), "no extra pings between periods");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn immediate_cancel_sends_nothing() {
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(
            std::time::Duration::from_secs(2),
            ping_pump(tx, cancel),
        )
        .await
        .expect("pump must stop on cancel");
        assert!(rx.try_recv().is_err());
    }
}
