//! Interactive operator commands read from stdin.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use uplink_client::{ConnectionManager, TelemetryDispatcher};

fn print_help() {
    println!("commands: send (s), reconnect (r), status, help (h), quit (q)");
}

/// Runs the command loop until `quit` or stdin closes.
pub async fn run(manager: Arc<ConnectionManager>, dispatcher: Arc<TelemetryDispatcher>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    print_help();

    while let Ok(Some(line)) = lines.next_line().await {
        match line.trim() {
            "" => {}
            "s" | "send" => {
                if !dispatcher.try_send() {
                    tracing::warn!("telemetry send not started");
                }
            }
            "r" | "reconnect" => manager.force_reconnect().await,
            "status" => {
                tracing::info!(
                    state = ?manager.state(),
                    send_in_flight = dispatcher.send_in_flight(),
                    "status"
                );
            }
            "h" | "help" => print_help(),
            "q" | "quit" | "exit" => break,
            other => tracing::warn!(command = %other, "unknown command"),
        }
    }
}
