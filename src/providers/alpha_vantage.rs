// Alpha Vantage Provider - fixed-interval REST polling
// Distinguishes the rate-limit sentinel fields from "no data" responses and
// stretches the poll interval instead of erroring out permanently

use crate::core::config::ProviderConfig;
use crate::core::types::{now_millis, ConnectionStatus, Tick};
use crate::providers::session::{reconnect_delay, ProviderSession};
use crate::providers::{
    MarketDataProvider, ProviderError, ProviderKind, StatusCallback, TickCallback,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What one poll cycle produced.
#[derive(Debug)]
enum PollOutcome {
    Quote { price: f64, volume: f64 },
    /// The response carried a `Note`/`Information` throttle message.
    RateLimited(String),
    /// Well-formed response without a usable quote; skip this cycle.
    NoData,
}

/// Classify a GLOBAL_QUOTE response body. The throttle sentinel must be
/// separated from an empty quote: both are HTTP 200.
fn classify_quote_response(value: &Value) -> PollOutcome {
    for sentinel in ["Note", "Information"] {
        if let Some(note) = value.get(sentinel).and_then(Value::as_str) {
            return PollOutcome::RateLimited(note.to_string());
        }
    }

    let Some(quote) = value.get("Global Quote") else {
        return PollOutcome::NoData;
    };
    let Some(price) = quote
        .get("05. price")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
    else {
        return PollOutcome::NoData;
    };
    let volume = quote
        .get("06. volume")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.0);

    PollOutcome::Quote { price, volume }
}

pub struct AlphaVantageProvider {
    api_key: String,
    config: ProviderConfig,
    session: Arc<ProviderSession>,
    on_tick: TickCallback,
    client: reqwest::Client,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AlphaVantageProvider {
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
            task: Mutex::new(None),
        }
    }
}

impl Drop for AlphaVantageProvider {
    fn drop(&mut self) {
        self.session.shutdown();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

#[async_trait]
impl MarketDataProvider for AlphaVantageProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AlphaVantage
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }

        self.session.activate();
        self.session.set_status(ConnectionStatus::Connecting);

        let session = self.session.clone();
        let on_tick = self.on_tick.clone();
        let client = self.client.clone();
        let config = self.config.clone();
        let api_key = self.api_key.clone();

        info!(symbol = %session.symbol(), "Starting Alpha Vantage polling");
        let handle = tokio::spawn(async move {
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
        self.session.set_status(ConnectionStatus::Disconnected);
    }

    async fn change_symbol(&self, symbol: &str) -> Result<(), ProviderError> {
        // The poll loop snapshots the symbol every cycle; bumping the
        // generation discards whatever request is already in flight
        self.session.change_symbol(symbol);
        Ok(())
    }

    fn status(&self) -> ConnectionStatus {
        self.session.status()
    }
}

async fn run_poll_loop(
    client: reqwest::Client,
    config: ProviderConfig,
    api_key: String,
    session: Arc<ProviderSession>,
    on_tick: TickCallback,
) {
    let normal_interval = Duration::from_millis(config.poll_interval_ms);
    let mut consecutive_failures = 0u32;
    let mut delivering = false;

    loop {
        if !session.is_live() {
            break;
        }

        // Snapshot before the request; compare before delivering
        let (symbol, generation) = session.snapshot();
        let mut sleep_for = normal_interval;

        let result = client
            .get(&config.alpha_vantage_url)
            .query(&[
                ("function", "GLOBAL_QUOTE"),
                ("symbol", symbol.as_str()),
                ("apikey", api_key.as_str()),
            ])
            .send()
            .await;

        match result {
            Ok(response) => match response.json::<Value>().await {
                Ok(body) => match classify_quote_response(&body) {
                    PollOutcome::Quote { price, volume } => {
                        if session.is_current(generation) {
                            if !delivering {
                                session.set_status(ConnectionStatus::Connected);
                                delivering = true;
                            }
                            consecutive_failures = 0;
                            on_tick(Tick::new(symbol, price, now_millis(), volume));
                        } else {
                            debug!(symbol = %symbol, "Stale poll response discarded");
                        }
                    }
                    PollOutcome::RateLimited(note) => {
                        warn!(note = %note, "Alpha Vantage rate limit hit");
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
                    PollOutcome::NoData => {
                        debug!(symbol = %symbol, "Quote response without usable fields, skipping cycle");
                    }
                },
                Err(e) => {
                    debug!(error = %e, "Quote body was not JSON, skipping cycle");
                }
            },
            Err(e) => {
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

    #[test]
    fn test_quote_response_parsed() {
        let body: Value = serde_json::from_str(
            r#"{"Global Quote": {"01. symbol": "AAPL", "05. price": "195.8900", "06. volume": "51234567"}}"#,
        )
        .unwrap();
        match classify_quote_response(&body) {
            PollOutcome::Quote { price, volume } => {
                assert!((price - 195.89).abs() < 1e-9);
                assert_eq!(volume, 51_234_567.0);
            }
            other => panic!("expected quote, got {:?}", other),
        }
    }

    #[test]
    fn test_rate_limit_sentinel_distinguished_from_no_data() {
        let throttled: Value = serde_json::from_str(
            r#"{"Note": "Thank you for using Alpha Vantage! Our standard API rate limit is 25 requests per day."}"#,
        )
        .unwrap();
        assert!(matches!(
            classify_quote_response(&throttled),
            PollOutcome::RateLimited(_)
        ));

        let empty: Value = serde_json::from_str(r#"{"Global Quote": {}}"#).unwrap();
        assert!(matches!(classify_quote_response(&empty), PollOutcome::NoData));
    }

    #[test]
    fn test_information_sentinel_also_counts() {
        let body: Value =
            serde_json::from_str(r#"{"Information": "Premium endpoint"}"#).unwrap();
        assert!(matches!(
            classify_quote_response(&body),
            PollOutcome::RateLimited(_)
        ));
    }

    #[test]
    fn test_unparseable_price_is_no_data() {
        let body: Value = serde_json::from_str(
            r#"{"Global Quote": {"05. price": "not-a-number"}}"#,
        )
        .unwrap();
        assert!(matches!(classify_quote_response(&body), PollOutcome::NoData));
    }
}
