// Provider Abstraction - one contract over five concrete transports
// Each transport drives the same tick callback and status callback

pub mod session;
pub mod synthetic;
pub mod finnhub;
pub mod alpha_vantage;
pub mod twelve_data;
pub mod ibkr;

use crate::core::config::{FeedConfig, ProviderCredentials};
use crate::core::types::{ConnectionStatus, StatusUpdate, Tick};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

pub use session::{reconnect_delay, ProviderSession};

/// Fired once per delivered tick, from the transport's own task context.
pub type TickCallback = Arc<dyn Fn(Tick) + Send + Sync>;
/// Fired on every connection-state transition.
pub type StatusCallback = Arc<dyn Fn(StatusUpdate) + Send + Sync>;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Unsupported symbol: {0}")]
    UnsupportedSymbol(String),
    #[error("Gateway error: {0}")]
    Gateway(String),
    #[error("Not connected")]
    NotConnected,
}

// ============================================================================
// Provider kind
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProviderKind {
    Synthetic,
    Finnhub,
    AlphaVantage,
    TwelveData,
    IbkrGateway,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "synthetic" => Ok(ProviderKind::Synthetic),
            "finnhub" => Ok(ProviderKind::Finnhub),
            "alphavantage" | "alpha_vantage" => Ok(ProviderKind::AlphaVantage),
            "twelvedata" | "twelve_data" => Ok(ProviderKind::TwelveData),
            "ibkr" | "ibkr_gateway" => Ok(ProviderKind::IbkrGateway),
            _ => Err(format!("Unknown provider kind: '{}'", s)),
        }
    }
}

// ============================================================================
// Contract
// ============================================================================

/// Uniform market-data transport contract.
///
/// Lifecycle: `Disconnected -> connect() -> Connecting -> Connected`;
/// unintentional transport drops pass through `Reconnecting`; `disconnect()`
/// is idempotent, cancels pending work from any state, and guarantees no
/// in-flight response mutates state afterwards. `Error` is terminal until an
/// explicit `connect()`.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn connect(&self) -> Result<(), ProviderError>;

    async fn disconnect(&self);

    /// Switch the active symbol. In-flight responses for the previous symbol
    /// are discarded, never delivered.
    async fn change_symbol(&self, symbol: &str) -> Result<(), ProviderError>;

    fn status(&self) -> ConnectionStatus;
}

// ============================================================================
// Factory
// ============================================================================

/// Build the concrete transport for `kind`. A missing credential falls back
/// to the synthetic generator rather than failing.
pub fn create_provider(
    kind: ProviderKind,
    symbol: &str,
    credentials: &ProviderCredentials,
    config: &FeedConfig,
    on_tick: TickCallback,
    on_status: StatusCallback,
) -> Arc<dyn MarketDataProvider> {
    let fallback = |name: &str| {
        warn!(provider = name, symbol = symbol, "No credential configured, falling back to synthetic feed");
    };

    match kind {
        ProviderKind::Synthetic => Arc::new(synthetic::SyntheticProvider::new(
            symbol,
            config.synthetic.clone(),
            on_tick,
            on_status,
        )),
        ProviderKind::Finnhub => match &credentials.finnhub_api_key {
            Some(key) => Arc::new(finnhub::FinnhubProvider::new(
                symbol,
                key,
                config.providers.clone(),
                on_tick,
                on_status,
            )),
            None => {
                fallback("finnhub");
                Arc::new(synthetic::SyntheticProvider::new(
                    symbol,
                    config.synthetic.clone(),
                    on_tick,
                    on_status,
                ))
            }
        },
        ProviderKind::AlphaVantage => match &credentials.alpha_vantage_api_key {
            Some(key) => Arc::new(alpha_vantage::AlphaVantageProvider::new(
                symbol,
                key,
                config.providers.clone(),
                on_tick,
                on_status,
            )),
            None => {
                fallback("alpha_vantage");
                Arc::new(synthetic::SyntheticProvider::new(
                    symbol,
                    config.synthetic.clone(),
                    on_tick,
                    on_status,
                ))
            }
        },
        ProviderKind::TwelveData => match &credentials.twelve_data_api_key {
            Some(key) => Arc::new(twelve_data::TwelveDataProvider::new(
                symbol,
                key,
                config.providers.clone(),
                on_tick,
                on_status,
            )),
            None => {
                fallback("twelve_data");
                Arc::new(synthetic::SyntheticProvider::new(
                    symbol,
                    config.synthetic.clone(),
                    on_tick,
                    on_status,
                ))
            }
        },
        ProviderKind::IbkrGateway => match &credentials.ibkr_gateway_url {
            Some(url) => Arc::new(ibkr::IbkrGatewayProvider::new(
                symbol,
                url,
                config.providers.clone(),
                on_tick,
                on_status,
            )),
            None => {
                fallback("ibkr_gateway");
                Arc::new(synthetic::SyntheticProvider::new(
                    symbol,
                    config.synthetic.clone(),
                    on_tick,
                    on_status,
                ))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_provider_kind_from_str() {
        assert_eq!(ProviderKind::from_str("finnhub").unwrap(), ProviderKind::Finnhub);
        assert_eq!(
            ProviderKind::from_str("alpha_vantage").unwrap(),
            ProviderKind::AlphaVantage
        );
        assert_eq!(ProviderKind::from_str("IBKR").unwrap(), ProviderKind::IbkrGateway);
        assert!(ProviderKind::from_str("bloomberg").is_err());
    }

    #[test]
    fn test_factory_falls_back_to_synthetic_without_credential() {
        let config = FeedConfig::default();
        let credentials = ProviderCredentials::default();
        let on_tick: TickCallback = Arc::new(|_| {});
        let on_status: StatusCallback = Arc::new(|_| {});

        let provider = create_provider(
            ProviderKind::Finnhub,
            "AAPL",
            &credentials,
            &config,
            on_tick,
            on_status,
        );
        assert_eq!(provider.kind(), ProviderKind::Synthetic);
    }
}
