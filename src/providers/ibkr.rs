// IBKR Client Portal Provider - session-authenticated gateway polling
// The gateway is logged into out-of-band through a browser; this transport
// verifies session liveness, resolves symbol -> conid once per symbol,
// polls field-coded market snapshots and keeps the session alive with
// periodic tickles independent of the data poll

use crate::core::config::ProviderConfig;
use crate::core::types::{now_millis, ConnectionStatus, Tick};
use crate::providers::session::{reconnect_delay, ProviderSession};
use crate::providers::{
    MarketDataProvider, ProviderError, ProviderKind, StatusCallback, TickCallback,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Field code for the last trade price in snapshot responses.
const FIELD_LAST_PRICE: &str = "31";

/// Extract the last price from a field-coded snapshot response. The price
/// field can arrive as a number or as a string with a C (closing) or
/// H (halted) prefix.
fn parse_snapshot_price(body: &Value) -> Option<f64> {
    let entry = body.as_array()?.first()?;
    let field = entry.get(FIELD_LAST_PRICE)?;
    if let Some(price) = field.as_f64() {
        return Some(price);
    }
    let text = field.as_str()?;
    text.trim_start_matches(['C', 'H']).parse::<f64>().ok()
}

/// Extract the first contract id from a secdef search response.
fn parse_conid(body: &Value) -> Option<i64> {
    let entry = body.as_array()?.first()?;
    let conid = entry.get("conid")?;
    conid
        .as_i64()
        .or_else(|| conid.as_str().and_then(|s| s.parse::<i64>().ok()))
}

fn parse_authenticated(body: &Value) -> bool {
    body.get("authenticated").and_then(Value::as_bool).unwrap_or(false)
}

pub struct IbkrGatewayProvider {
    base_url: String,
    config: ProviderConfig,
    session: Arc<ProviderSession>,
    on_tick: TickCallback,
    client: reqwest::Client,
    conid_cache: Arc<Mutex<HashMap<String, i64>>>,
    poll_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    keepalive_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl IbkrGatewayProvider {
    pub fn new(
        symbol: &str,
        gateway_url: &str,
        config: ProviderConfig,
        on_tick: TickCallback,
        on_status: StatusCallback,
    ) -> Self {
        // The local gateway serves a self-signed certificate
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap_or_default();
        Self {
            base_url: gateway_url.trim_end_matches('/').to_string(),
            config,
            session: ProviderSession::new(symbol, on_status),
            on_tick,
            client,
            conid_cache: Arc::new(Mutex::new(HashMap::new())),
            poll_task: Mutex::new(None),
            keepalive_task: Mutex::new(None),
        }
    }

    fn abort_tasks(&self) {
        if let Some(task) = self.poll_task.lock().take() {
            task.abort();
        }
        if let Some(task) = self.keepalive_task.lock().take() {
            task.abort();
        }
    }

    async fn check_authenticated(&self) -> Result<bool, ProviderError> {
        let body: Value = self
            .client
            .post(format!("{}/iserver/auth/status", self.base_url))
            .send()
            .await?
            .json()
            .await?;
        Ok(parse_authenticated(&body))
    }
}

impl Drop for IbkrGatewayProvider {
    fn drop(&mut self) {
        self.session.shutdown();
        self.abort_tasks();
    }
}

#[async_trait]
impl MarketDataProvider for IbkrGatewayProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::IbkrGateway
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        self.abort_tasks();
        self.session.activate();
        self.session.set_status(ConnectionStatus::Connecting);

        match self.check_authenticated().await {
            Ok(true) => {}
            Ok(false) => {
                let message = format!(
                    "Gateway session not authenticated. Complete the login in your browser at {}",
                    self.base_url
                );
                warn!(gateway = %self.base_url, "Gateway not authenticated");
                self.session
                    .set_status_message(ConnectionStatus::Error, message.clone());
                return Err(ProviderError::Auth(message));
            }
            Err(e) => {
                self.session.set_status_message(
                    ConnectionStatus::Error,
                    format!("Gateway unreachable: {}", e),
                );
                return Err(e);
            }
        }

        info!(gateway = %self.base_url, symbol = %self.session.symbol(), "Gateway session verified");

        // Keepalive pings run independently of the data poll
        let keepalive = {
            let client = self.client.clone();
            let base_url = self.base_url.clone();
            let session = self.session.clone();
            let interval_secs = self.config.keepalive_interval_secs;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    if !session.is_live() {
                        break;
                    }
                    match client.post(format!("{}/tickle", base_url)).send().await {
                        Ok(_) => debug!("Gateway tickle sent"),
                        Err(e) => warn!(error = %e, "Gateway tickle failed"),
                    }
                }
            })
        };
        *self.keepalive_task.lock() = Some(keepalive);

        let poll = {
            let client = self.client.clone();
            let base_url = self.base_url.clone();
            let session = self.session.clone();
            let on_tick = self.on_tick.clone();
            let config = self.config.clone();
            let conid_cache = self.conid_cache.clone();
            tokio::spawn(async move {
                run_poll_loop(client, base_url, config, session, on_tick, conid_cache).await;
            })
        };
        *self.poll_task.lock() = Some(poll);
        Ok(())
    }

    async fn disconnect(&self) {
        self.session.shutdown();
        self.abort_tasks();
        self.session.set_status(ConnectionStatus::Disconnected);
    }

    async fn change_symbol(&self, symbol: &str) -> Result<(), ProviderError> {
        // Poll loop resolves the new conid on its next cycle; the generation
        // bump discards any snapshot already in flight
        self.session.change_symbol(symbol);
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        self.session.status()
    }
}

async fn run_poll_loop(
    client: reqwest::Client,
    base_url: String,
    config: ProviderConfig,
    session: Arc<ProviderSession>,
    on_tick: TickCallback,
    conid_cache: Arc<Mutex<HashMap<String, i64>>>,
) {
    let normal_interval = Duration::from_millis(config.poll_interval_ms);
    let mut consecutive_failures = 0u32;
    let mut delivering = false;

    loop {
        if !session.is_live() {
            break;
        }

        let (symbol, generation) = session.snapshot();
        let mut sleep_for = normal_interval;

        let cached = conid_cache.lock().get(&symbol).copied();
        let conid = match cached {
            Some(conid) => Some(conid),
            None => match resolve_conid(&client, &base_url, &symbol).await {
                Ok(Some(conid)) => {
                    debug!(symbol = %symbol, conid = conid, "Resolved contract id");
                    conid_cache.lock().insert(symbol.clone(), conid);
                    Some(conid)
                }
                Ok(None) => {
                    error!(symbol = %symbol, "Gateway knows no contract for symbol");
                    session.set_status_message(
                        ConnectionStatus::Error,
                        format!("Unsupported symbol: {}", symbol),
                    );
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Contract resolution failed");
                    None
                }
            },
        };

        if let Some(conid) = conid {
            let url = format!(
                "{}/iserver/marketdata/snapshot?conids={}&fields={}",
                base_url, conid, FIELD_LAST_PRICE
            );
            match client.get(&url).send().await {
                Ok(response) => match response.json::<Value>().await {
                    Ok(body) => {
                        consecutive_failures = 0;
                        match parse_snapshot_price(&body) {
                            Some(price) => {
                                if session.is_current(generation) {
                                    if !delivering {
                                        session.set_status(ConnectionStatus::Connected);
                                        delivering = true;
                                    }
                                    on_tick(Tick::new(symbol, price, now_millis(), 0.0));
                                } else {
                                    debug!(symbol = %symbol, "Stale snapshot discarded");
                                }
                            }
                            // Snapshot subscriptions warm up over the first
                            // couple of polls; absent field is not an error
                            None => debug!(symbol = %symbol, "Snapshot without price field, skipping cycle"),
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Snapshot body was not JSON, skipping cycle");
                    }
                },
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(error = %e, failures = consecutive_failures, "Snapshot poll failed");
                    delivering = false;

                    // Repeated failures usually mean the browser session
                    // expired; re-verify and surface the login instruction
                    if consecutive_failures >= 3 {
                        let auth = client
                            .post(format!("{}/iserver/auth/status", base_url))
                            .send()
                            .await;
                        let still_authenticated = match auth {
                            Ok(response) => response
                                .json::<Value>()
                                .await
                                .map(|body| parse_authenticated(&body))
                                .unwrap_or(false),
                            Err(_) => false,
                        };
                        if !still_authenticated {
                            session.set_status_message(
                                ConnectionStatus::Error,
                                format!(
                                    "Gateway session not authenticated. Complete the login in your browser at {}",
                                    base_url
                                ),
                            );
                            return;
                        }
                    }

                    sleep_for = reconnect_delay(
                        consecutive_failures - 1,
                        config.reconnect_base_secs,
                        config.reconnect_cap_secs,
                    );
                    session.set_status_message(
                        ConnectionStatus::Reconnecting,
                        format!("Poll failed, retrying in {}s", sleep_for.as_secs()),
                    );
                }
            }
        }

        tokio::time::sleep(sleep_for).await;
    }
}

async fn resolve_conid(
    client: &reqwest::Client,
    base_url: &str,
    symbol: &str,
) -> Result<Option<i64>, ProviderError> {
    let body: Value = client
        .get(format!("{}/iserver/secdef/search", base_url))
        .query(&[("symbol", symbol)])
        .send()
        .await?
        .json()
        .await?;
    Ok(parse_conid(&body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_price_numeric_and_prefixed() {
        let numeric: Value =
            serde_json::from_str(r#"[{"conid": 265598, "31": 195.42}]"#).unwrap();
        assert_eq!(parse_snapshot_price(&numeric), Some(195.42));

        let text: Value =
            serde_json::from_str(r#"[{"conid": 265598, "31": "195.42"}]"#).unwrap();
        assert_eq!(parse_snapshot_price(&text), Some(195.42));

        let closing: Value =
            serde_json::from_str(r#"[{"conid": 265598, "31": "C194.10"}]"#).unwrap();
        assert_eq!(parse_snapshot_price(&closing), Some(194.10));

        let halted: Value =
            serde_json::from_str(r#"[{"conid": 265598, "31": "H194.10"}]"#).unwrap();
        assert_eq!(parse_snapshot_price(&halted), Some(194.10));
    }

    #[test]
    fn test_snapshot_warmup_without_field() {
        let warming: Value = serde_json::from_str(r#"[{"conid": 265598}]"#).unwrap();
        assert_eq!(parse_snapshot_price(&warming), None);
        let empty: Value = serde_json::from_str("[]").unwrap();
        assert_eq!(parse_snapshot_price(&empty), None);
    }

    #[test]
    fn test_conid_from_number_or_string() {
        let n: Value = serde_json::from_str(r#"[{"conid": 265598, "symbol": "AAPL"}]"#).unwrap();
        assert_eq!(parse_conid(&n), Some(265598));
        let s: Value = serde_json::from_str(r#"[{"conid": "265598"}]"#).unwrap();
        assert_eq!(parse_conid(&s), Some(265598));
        let missing: Value = serde_json::from_str("[]").unwrap();
        assert_eq!(parse_conid(&missing), None);
    }

    #[test]
    fn test_authenticated_flag() {
        let yes: Value = serde_json::from_str(r#"{"authenticated": true}"#).unwrap();
        assert!(parse_authenticated(&yes));
        let no: Value = serde_json::from_str(r#"{"authenticated": false}"#).unwrap();
        assert!(!parse_authenticated(&no));
        let odd: Value = serde_json::from_str(r#"{}"#).unwrap();
        assert!(!parse_authenticated(&odd));
    }
}
