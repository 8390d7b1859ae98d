// Twelve Data Provider - hybrid transport: websocket push first, with a
// permanent fallback to REST polling when the push side rejects the key

use crate::core::config::ProviderConfig;
use crate::core::types::{now_millis, ConnectionStatus, Tick};
use crate::providers::session::{reconnect_delay, ProviderSession};
use crate::providers::{
    MarketDataProvider, ProviderError, ProviderKind, StatusCallback, TickCallback,
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::protocol::Message};
use tracing::{debug, error, info, warn};

#[derive(Debug)]
enum WsCommand {
    Resubscribe { from: String, to: String },
}

enum StreamEnd {
    Shutdown,
    AuthRejected(String),
    Dropped(String),
}

/// Classification of one REST price response.
#[derive(Debug)]
enum PricePoll {
    Price(f64),
    RateLimited(String),
    AuthFailed(String),
    NoData,
}

fn classify_price_response(value: &Value) -> PricePoll {
    if value.get("status").and_then(Value::as_str) == Some("error") {
        let code = value.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return match code {
            429 => PricePoll::RateLimited(message),
            401 | 403 => PricePoll::AuthFailed(message),
            _ => PricePoll::NoData,
        };
    }

    match value.get("price").and_then(Value::as_str).and_then(|s| s.parse::<f64>().ok()) {
        Some(price) => PricePoll::Price(price),
        None => PricePoll::NoData,
    }
}

pub struct TwelveDataProvider {
    api_key: String,
    config: ProviderConfig,
    session: Arc<ProviderSession>,
    on_tick: TickCallback,
    client: reqwest::Client,
    /// Once set, the session never tries the websocket again.
    poll_fallback: Arc<AtomicBool>,
    cmd_tx: Mutex<Option<mpsc::UnboundedSender<WsCommand>>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TwelveDataProvider {
    pub fn new(
        symbol: &str,
        api_key: &str,
        config: ProviderConfig,
        on_tick: TickCallback,
        on_status: StatusCallback,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            api_key: api_key.to_string(),
            config,
            session: ProviderSession::new(symbol, on_status),
            on_tick,
            client,
            poll_fallback: Arc::new(AtomicBool::new(false)),
            cmd_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }
}

impl Drop for TwelveDataProvider {
    fn drop(&mut self) {
        self.session.shutdown();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl MarketDataProvider for TwelveDataProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::TwelveData
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }

        self.session.activate();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        *self.cmd_tx.lock() = Some(cmd_tx);

        let session = self.session.clone();
        let on_tick = self.on_tick.clone();
        let config = self.config.clone();
        let api_key = self.api_key.clone();
        let client = self.client.clone();
        let poll_fallback = self.poll_fallback.clone();

        info!(symbol = %session.symbol(), "Connecting Twelve Data (hybrid)");
        let handle = tokio::spawn(async move {
            if !poll_fallback.load(Ordering::SeqCst) {
                match run_push_stream(&config, &api_key, &session, &on_tick, cmd_rx).await {
                    PushResult::Shutdown => return,
                    PushResult::FallBackToPolling(reason) => {
                        warn!(reason = %reason, "Falling back to REST polling for the rest of the session");
                        poll_fallback.store(true, Ordering::SeqCst);
                    }
                }
            }
            run_poll_loop(client, config, api_key, session, on_tick).await;
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
        if !self.poll_fallback.load(Ordering::SeqCst) {
            let sender = self.cmd_tx.lock().clone();
            if let Some(tx) = sender {
                let _ = tx.send(WsCommand::Resubscribe {
                    from,
                    to: self.session.symbol(),
                });
            }
        }
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        self.session.status()
    }
}

enum PushResult {
    Shutdown,
    FallBackToPolling(String),
}

/// Websocket attempt loop. Transient drops retry with backoff; running out
/// of attempts or an auth rejection hands the session over to polling.
async fn run_push_stream(
    config: &ProviderConfig,
    api_key: &str,
    session: &Arc<ProviderSession>,
    on_tick: &TickCallback,
    mut cmd_rx: mpsc::UnboundedReceiver<WsCommand>,
) -> PushResult {
    let url = format!("{}?apikey={}", config.twelve_data_ws_url, api_key);
    let mut attempt = 0u32;

    loop {
        if !session.is_live() {
            return PushResult::Shutdown;
        }
        session.set_status(if attempt == 0 {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Reconnecting
        });

        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!("Twelve Data websocket connected");
                session.set_status(ConnectionStatus::Connected);
                attempt = 0;

                match drive_stream(ws_stream, session, on_tick, &mut cmd_rx).await {
                    StreamEnd::Shutdown => return PushResult::Shutdown,
                    StreamEnd::AuthRejected(msg) => {
                        return PushResult::FallBackToPolling(format!("auth rejected: {}", msg));
                    }
                    StreamEnd::Dropped(msg) => {
                        warn!(reason = %msg, "Twelve Data stream dropped");
                    }
                }
            }
            Err(e) => {
                if let tungstenite::Error::Http(response) = &e {
                    let status = response.status();
                    if status.is_client_error() {
                        return PushResult::FallBackToPolling(format!("HTTP {}", status));
                    }
                }
                warn!(error = %e, "Twelve Data connect failed");
            }
        }

        if !session.is_live() {
            return PushResult::Shutdown;
        }
        if attempt >= config.max_reconnect_attempts {
            return PushResult::FallBackToPolling("websocket retries exhausted".to_string());
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
    let subscribe =
        serde_json::json!({"action": "subscribe", "params": {"symbols": symbol}});
    if let Err(e) = write.send(Message::Text(subscribe.to_string())).await {
        return StreamEnd::Dropped(format!("subscribe failed: {}", e));
    }
    debug!(symbol = %symbol, "Subscribed to price stream");

    loop {
        tokio::select! {
            msg_result = read.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        match handle_event(&text, session, on_tick) {
                            EventOutcome::Continue => {}
                            EventOutcome::Heartbeat => {
                                let beat = serde_json::json!({"action": "heartbeat"});
                                let _ = write.send(Message::Text(beat.to_string())).await;
                            }
                            EventOutcome::AuthRejected(msg) => return StreamEnd::AuthRejected(msg),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        if !session.is_live() {
                            return StreamEnd::Shutdown;
                        }
                        return StreamEnd::Dropped("connection closed".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        if !session.is_live() {
                            return StreamEnd::Shutdown;
                        }
                        return StreamEnd::Dropped(e.to_string());
                    }
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(WsCommand::Resubscribe { from, to }) => {
                        let unsub = serde_json::json!({"action": "unsubscribe", "params": {"symbols": from}});
                        let sub = serde_json::json!({"action": "subscribe", "params": {"symbols": to}});
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

enum EventOutcome {
    Continue,
    Heartbeat,
    AuthRejected(String),
}

fn handle_event(text: &str, session: &Arc<ProviderSession>, on_tick: &TickCallback) -> EventOutcome {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "Unparseable event skipped");
            return EventOutcome::Continue;
        }
    };

    match value.get("event").and_then(Value::as_str) {
        Some("price") => {
            let (active_symbol, generation) = session.snapshot();
            let symbol = value.get("symbol").and_then(Value::as_str).unwrap_or_default();
            let Some(price) = value.get("price").and_then(Value::as_f64) else {
                debug!("Price event without price field skipped");
                return EventOutcome::Continue;
            };
            if symbol != active_symbol || !session.is_current(generation) {
                return EventOutcome::Continue;
            }
            // Event timestamps arrive in epoch seconds
            let timestamp_ms = value
                .get("timestamp")
                .and_then(Value::as_i64)
                .map(|s| s * 1000)
                .unwrap_or_else(now_millis);
            let volume = value.get("day_volume").and_then(Value::as_f64).unwrap_or(0.0);
            on_tick(Tick::new(symbol.to_string(), price, timestamp_ms, volume));
            EventOutcome::Continue
        }
        Some("subscribe-status") => {
            if value.get("status").and_then(Value::as_str) == Some("error") {
                let msg = value
                    .get("messages")
                    .and_then(Value::as_array)
                    .and_then(|m| m.first())
                    .and_then(Value::as_str)
                    .unwrap_or("subscribe rejected")
                    .to_string();
                return EventOutcome::AuthRejected(msg);
            }
            EventOutcome::Continue
        }
        Some("heartbeat") => EventOutcome::Heartbeat,
        _ => EventOutcome::Continue,
    }
}

/// REST fallback. A persistent run of failures surfaces as the terminal
/// `Error` state: both halves of the hybrid are then exhausted.
async fn run_poll_loop(
    client: reqwest::Client,
    config: ProviderConfig,
    api_key: String,
    session: Arc<ProviderSession>,
    on_tick: TickCallback,
) {
    let url = format!("{}/price", config.twelve_data_rest_url);
    let normal_interval = Duration::from_millis(config.poll_interval_ms);
    let mut consecutive_failures = 0u32;
    let mut delivering = false;

    loop {
        if !session.is_live() {
            break;
        }

        let (symbol, generation) = session.snapshot();
        let mut sleep_for = normal_interval;

        let result = client
            .get(&url)
            .query(&[("symbol", symbol.as_str()), ("apikey", api_key.as_str())])
            .send()
            .await;

        match result {
            Ok(response) => match response.json::<Value>().await {
                Ok(body) => match classify_price_response(&body) {
                    PricePoll::Price(price) => {
                        if session.is_current(generation) {
                            if !delivering {
                                session.set_status(ConnectionStatus::Connected);
                                delivering = true;
                            }
                            consecutive_failures = 0;
                            on_tick(Tick::new(symbol, price, now_millis(), 0.0));
                        } else {
                            debug!(symbol = %symbol, "Stale poll response discarded");
                        }
                    }
                    PricePoll::RateLimited(msg) => {
                        warn!(message = %msg, "Twelve Data rate limit hit");
                        session.set_status_message(
                            ConnectionStatus::Error,
                            format!(
                                "Rate limited, backing off {}s",
                                config.rate_limit_backoff_secs
                            ),
                        );
                        delivering = false;
                        sleep_for = Duration::from_secs(config.rate_limit_backoff_secs);
                    }
                    PricePoll::AuthFailed(msg) => {
                        error!(message = %msg, "Twelve Data REST rejected credentials");
                        session.set_status_message(
                            ConnectionStatus::Error,
                            format!("Authentication failed on both transports: {}", msg),
                        );
                        return;
                    }
                    PricePoll::NoData => {
                        debug!(symbol = %symbol, "Price response without usable fields, skipping cycle");
                    }
                },
                Err(e) => {
                    debug!(error = %e, "Price body was not JSON, skipping cycle");
                }
            },
            Err(e) => {
                if consecutive_failures >= config.max_reconnect_attempts {
                    error!(error = %e, "Polling fallback exhausted");
                    session.set_status_message(
                        ConnectionStatus::Error,
                        "Both push and poll transports exhausted",
                    );
                    return;
                }
                let delay = reconnect_delay(
                    consecutive_failures,
                    config.reconnect_base_secs,
                    config.reconnect_cap_secs,
                );
                consecutive_failures += 1;
                warn!(error = %e, delay_secs = delay.as_secs(), "Poll failed, retrying");
                session.set_status_message(
                    ConnectionStatus::Reconnecting,
                    format!("Poll failed, retrying in {}s", delay.as_secs()),
                );
                delivering = false;
                sleep_for = delay;
            }
        }

        tokio::time::sleep(sleep_for).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capture() -> (TickCallback, Arc<Mutex<Vec<Tick>>>) {
        let ticks: Arc<Mutex<Vec<Tick>>> = Arc::new(Mutex::new(Vec::new()));
        let ticks_clone = ticks.clone();
        let callback: TickCallback = Arc::new(move |tick| ticks_clone.lock().push(tick));
        (callback, ticks)
    }

    fn live_session(symbol: &str) -> Arc<ProviderSession> {
        let session = ProviderSession::new(symbol, Arc::new(|_| {}));
        session.activate();
        session
    }

    #[test]
    fn test_price_event_emits_tick_with_ms_timestamp() {
        let (on_tick, ticks) = capture();
        let session = live_session("AAPL");
        let event = r#"{"event":"price","symbol":"AAPL","price":195.42,"timestamp":1700000000,"day_volume":120}"#;
        handle_event(event, &session, &on_tick);
        let seen = ticks.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].price, 195.42);
        assert_eq!(seen[0].timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_price_event_for_stale_symbol_is_dropped() {
        let (on_tick, ticks) = capture();
        let session = live_session("AAPL");
        session.change_symbol("MSFT");
        let event = r#"{"event":"price","symbol":"AAPL","price":195.42}"#;
        handle_event(event, &session, &on_tick);
        assert!(ticks.lock().is_empty());
    }

    #[test]
    fn test_subscribe_error_triggers_auth_rejection() {
        let (on_tick, _) = capture();
        let session = live_session("AAPL");
        let event = r#"{"event":"subscribe-status","status":"error","messages":["invalid api key"]}"#;
        assert!(matches!(
            handle_event(event, &session, &on_tick),
            EventOutcome::AuthRejected(_)
        ));
    }

    #[test]
    fn test_heartbeat_event_answered() {
        let (on_tick, _) = capture();
        let session = live_session("AAPL");
        assert!(matches!(
            handle_event(r#"{"event":"heartbeat"}"#, &session, &on_tick),
            EventOutcome::Heartbeat
        ));
    }

    #[test]
    fn test_rest_classification() {
        let ok: Value = serde_json::from_str(r#"{"price":"195.50"}"#).unwrap();
        assert!(matches!(classify_price_response(&ok), PricePoll::Price(p) if (p - 195.5).abs() < 1e-9));

        let limited: Value = serde_json::from_str(
            r#"{"code":429,"message":"You have run out of API credits","status":"error"}"#,
        )
        .unwrap();
        assert!(matches!(classify_price_response(&limited), PricePoll::RateLimited(_)));

        let auth: Value = serde_json::from_str(
            r#"{"code":401,"message":"apikey is invalid","status":"error"}"#,
        )
        .unwrap();
        assert!(matches!(classify_price_response(&auth), PricePoll::AuthFailed(_)));

        let empty: Value = serde_json::from_str(r#"{}"#).unwrap();
        assert!(matches!(classify_price_response(&empty), PricePoll::NoData));
    }
}
