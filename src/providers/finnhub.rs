// Finnhub Provider - push-streaming trades over a persistent websocket
// Token auth on the upgrade URL, subscribe-per-symbol, automatic reconnect
// with exponential backoff (reset to base after a successful connection)

use crate::core::config::ProviderConfig;
use crate::core::types::{ConnectionStatus, Tick};
use crate::providers::session::{reconnect_delay, ProviderSession};
use crate::providers::{
    MarketDataProvider, ProviderError, ProviderKind, StatusCallback, TickCallback,
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

/// Commands sent into the websocket event loop while connected.
#[derive(Debug)]
enum WsCommand {
    Resubscribe { from: String, to: String },
}

/// Why a single connection ended.
enum StreamEnd {
    Shutdown,
    AuthRejected(String),
    Dropped(String),
}

pub struct FinnhubProvider {
    api_key: String,
    config: ProviderConfig,
    session: Arc<ProviderSession>,
    on_tick: TickCallback,
    cmd_tx: Mutex<Option<mpsc::UnboundedSender<WsCommand>>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl FinnhubProvider {
    pub fn new(
        symbol: &str,
        api_key: &str,
        config: ProviderConfig,
        on_tick: TickCallback,
        on_status: StatusCallback,
    ) -> Self {
        Self {
            api_key: api_key.to_string(),
            config,
            session: ProviderSession::new(symbol, on_status),
            on_tick,
            cmd_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }
}

impl Drop for FinnhubProvider {
    fn drop(&mut self) {
        self.session.shutdown();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl MarketDataProvider for FinnhubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Finnhub
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }

        self.session.activate();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *self.cmd_tx.lock() = Some(cmd_tx);

        let url = format!("{}?token={}", self.config.finnhub_ws_url, self.api_key);
        let session = self.session.clone();
        let on_tick = self.on_tick.clone();
        let config = self.config.clone();

        info!(symbol = %session.symbol(), "Connecting Finnhub stream");
        let handle = tokio::spawn(async move {
            run_stream(url, session, on_tick, cmd_rx, config).await;
        });
        *self.task.lock() = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) {
        self.session.shutdown();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        *self.cmd_tx.lock() = None;
        self.session.set_status(ConnectionStatus::Disconnected);
    }

    async fn change_symbol(&self, symbol: &str) -> Result<(), ProviderError> {
        let from = self.session.symbol();
        self.session.change_symbol(symbol);
        let sender = self.cmd_tx.lock().clone();
        if let Some(tx) = sender {
            let _ = tx.send(WsCommand::Resubscribe {
                from,
                to: self.session.symbol(),
            });
        }
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        self.session.status()
    }
}

/// Outer connection loop with reconnection and backoff.
async fn run_stream(
    url: String,
    session: Arc<ProviderSession>,
    on_tick: TickCallback,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
    config: ProviderConfig,
) {
    let mut attempt = 0u32;

    loop {
        if !session.is_live() {
            break;
        }
        session.set_status(if attempt == 0 {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Reconnecting
        });

        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!("Finnhub websocket connected");
                session.set_status(ConnectionStatus::Connected);
                attempt = 0;

                match drive_stream(ws_stream, &session, &on_tick, &mut cmd_rx).await {
                    StreamEnd::Shutdown => break,
                    StreamEnd::AuthRejected(msg) => {
                        error!(error = %msg, "Finnhub rejected credentials");
                        session.set_status_message(
                            ConnectionStatus::Error,
                            format!("Authentication failed: {}", msg),
                        );
                        return;
                    }
                    StreamEnd::Dropped(msg) => {
                        warn!(reason = %msg, "Finnhub stream dropped");
                    }
                }
            }
            Err(e) => {
                if let tungstenite::Error::Http(response) = &e {
                    let status = response.status();
                    if status.as_u16() == 401 || status.as_u16() == 403 {
                        error!(status = %status, "Finnhub handshake rejected");
                        session.set_status_message(
                            ConnectionStatus::Error,
                            format!("Authentication failed: HTTP {}", status),
                        );
                        return;
                    }
                }
                warn!(error = %e, "Finnhub connect failed");
            }
        }

        if !session.is_live() {
            break;
        }
        if attempt >= config.max_reconnect_attempts {
            error!(attempts = attempt, "Finnhub reconnect attempts exhausted");
            session.set_status_message(
                ConnectionStatus::Error,
                "Reconnect attempts exhausted",
            );
            return;
        }

        let delay = reconnect_delay(attempt, config.reconnect_base_secs, config.reconnect_cap_secs);
        attempt += 1;
        session.set_status_message(
            ConnectionStatus::Reconnecting,
            format!("Retrying in {}s (attempt {})", delay.as_secs(), attempt),
        );
        tokio::time::sleep(delay).await;
    }
}

/// Drive a single live connection: subscribe, pump messages, honor commands.
async fn drive_stream(
    ws_stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    session: &Arc<ProviderSession>,
    on_tick: &TickCallback,
    cmd_rx: &mut mpsc::UnboundedReceiver<WsCommand>,
) -> StreamEnd {
    let (mut write, mut read) = ws_stream.split();

    let symbol = session.symbol();
    let subscribe = serde_json::json!({"type": "subscribe", "symbol": symbol});
    if let Err(e) = write.send(Message::Text(subscribe.to_string())).await {
        return StreamEnd::Dropped(format!("subscribe failed: {}", e));
    }
    debug!(symbol = %symbol, "Subscribed to trade stream");

    loop {
        tokio::select! {
            msg_result = read.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        match handle_text(&text, session, on_tick) {
                            TextOutcome::Continue => {}
                            TextOutcome::Pong => {
                                let pong = serde_json::json!({"type": "pong"});
                                let _ = write.send(Message::Text(pong.to_string())).await;
                            }
                            TextOutcome::AuthRejected(msg) => {
                                return StreamEnd::AuthRejected(msg);
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        if !session.is_live() {
                            return StreamEnd::Shutdown;
                        }
                        return StreamEnd::Dropped("closed by server".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        if !session.is_live() {
                            return StreamEnd::Shutdown;
                        }
                        return StreamEnd::Dropped(e.to_string());
                    }
                    None => {
                        if !session.is_live() {
                            return StreamEnd::Shutdown;
                        }
                        return StreamEnd::Dropped("stream ended".to_string());
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(WsCommand::Resubscribe { from, to }) => {
                        let unsub = serde_json::json!({"type": "unsubscribe", "symbol": from});
                        let sub = serde_json::json!({"type": "subscribe", "symbol": to});
                        if write.send(Message::Text(unsub.to_string())).await.is_err()
                            || write.send(Message::Text(sub.to_string())).await.is_err()
                        {
                            return StreamEnd::Dropped("resubscribe failed".to_string());
                        }
                        info!(from = %from, to = %to, "Resubscribed");
                    }
                    None => return StreamEnd::Shutdown,
                }
            }
        }
    }
}

enum TextOutcome {
    Continue,
    Pong,
    AuthRejected(String),
}

/// Parse one text frame. Trade frames fan out one tick per array item;
/// frames missing expected fields are logged and skipped.
fn handle_text(text: &str, session: &Arc<ProviderSession>, on_tick: &TickCallback) -> TextOutcome {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Unparseable frame skipped");
            return TextOutcome::Continue;
        }
    };

    match value.get("type").and_then(Value::as_str) {
        Some("trade") => {
            let (active_symbol, generation) = session.snapshot();
            let Some(items) = value.get("data").and_then(Value::as_array) else {
                debug!("Trade frame without data array skipped");
                return TextOutcome::Continue;
            };
            for item in items {
                let Some(price) = item.get("p").and_then(Value::as_f64) else {
                    continue;
                };
                let symbol = item.get("s").and_then(Value::as_str).unwrap_or_default();
                if symbol != active_symbol || !session.is_current(generation) {
                    continue;
                }
                let timestamp_ms = item
                    .get("t")
                    .and_then(Value::as_i64)
                    .unwrap_or_else(crate::core::types::now_millis);
                let volume = item.get("v").and_then(Value::as_f64).unwrap_or(0.0);
                on_tick(Tick::new(symbol.to_string(), price, timestamp_ms, volume));
            }
            TextOutcome::Continue
        }
        Some("ping") => TextOutcome::Pong,
        Some("error") => {
            let msg = value
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            if msg.to_lowercase().contains("auth") || msg.to_lowercase().contains("api key") {
                TextOutcome::AuthRejected(msg)
            } else {
                warn!(error = %msg, "Finnhub error frame");
                TextOutcome::Continue
            }
        }
        _ => TextOutcome::Continue,
    }
}
