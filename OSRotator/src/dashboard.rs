//! WebSocket client for the optional web dashboard.
//!
//! Pushes state snapshots every ~5 s and forwards log entries as they are
//! produced; receives operator commands and hands them to the tick loop
//! over an mpsc channel. Reconnects with exponential backoff and runs
//! until shutdown.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::DashboardCommand;
use crate::logs::LogHub;

const RECONNECT_DELAY_BASE: Duration = Duration::from_secs(5);
const RECONNECT_DELAY_MAX: Duration = Duration::from_secs(60);
const STATE_PUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Snapshot shared between the orchestrator (writer) and this client.
pub type SharedState = Arc<RwLock<serde_json::Value>>;

pub struct DashboardClient {
    server_url: String,
    api_key: String,
    state: SharedState,
    logs: LogHub,
    command_tx: mpsc::UnboundedSender<DashboardCommand>,
    shutdown: CancellationToken,
}

impl DashboardClient {
    pub fn new(
        server_url: String,
        api_key: String,
        state: SharedState,
        logs: LogHub,
        command_tx: mpsc::UnboundedSender<DashboardCommand>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
            api_key,
            state,
            logs,
            command_tx,
            shutdown,
        }
    }

    /// Connect-push-receive loop with backoff; runs until shutdown.
    pub async fn run(self) {
        let mut delay = RECONNECT_DELAY_BASE;
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let url = format!("{}/ws/osr/{}", self.server_url, self.api_key);
            info!("Connecting to web dashboard at {}...", self.server_url);
            match connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    info!("Connected to web dashboard");
                    delay = RECONNECT_DELAY_BASE;
                    self.session(ws).await;
                    if self.shutdown.is_cancelled() {
                        break;
                    }
                    warn!("Dashboard connection lost");
                }
                Err(e) => {
                    debug!("Dashboard connection failed: {}", e);
                }
            }

            info!("Reconnecting to dashboard in {:?}...", delay);
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = (delay * 2).min(RECONNECT_DELAY_MAX);
        }
        info!("Dashboard client stopped");
    }

    async fn session(
        &self,
        ws: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) {
        let (mut sink, mut stream) = ws.split();
        let mut log_rx = self.logs.subscribe();
        let mut push_timer = tokio::time::interval(STATE_PUSH_INTERVAL);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
                _ = push_timer.tick() => {
                    let snapshot = self.state.read().unwrap().clone();
                    let frame = serde_json::json!({"type": "state", "data": snapshot});
                    if sink.send(Message::text(frame.to_string())).await.is_err() {
                        return;
                    }
                }
                entry = log_rx.recv() => {
                    match entry {
                        Ok(entry) => {
                            let frame = serde_json::json!({"type": "log", "data": entry});
                            if sink.send(Message::text(frame.to_string())).await.is_err() {
                                return;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            debug!("Dashboard log feed lagged, dropped {} entries", missed);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(raw))) => self.dispatch(raw.as_str()),
                        Some(Ok(Message::Ping(payload))) => {
                            if sink.send(Message::Pong(payload)).await.is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Dashboard read error: {}", e);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn dispatch(&self, raw: &str) {
        match serde_json::from_str::<DashboardCommand>(raw) {
            Ok(command) => {
                info!("Dispatching dashboard command: {:?}", command);
                let _ = self.command_tx.send(command);
            }
            Err(e) => warn!("Invalid dashboard message: {} ({})", raw, e),
        }
    }
}
