// Configuration for the Tick Signal Pipeline
// Injected explicitly into the feed, providers and search - no global state

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// Indicator lookbacks
// ============================================================================

/// Lookback periods for the indicator engine, in ticks. Each period has a
/// documented valid range so operators can trade reaction speed against
/// smoothness; `validate` enforces the ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    /// RSI lookback, valid 20..=300.
    pub rsi_period: usize,
    /// MACD fast EMA, valid 10..=200. Must be < `macd_slow`.
    pub macd_fast: usize,
    /// MACD slow EMA, valid 20..=400.
    pub macd_slow: usize,
    /// MACD signal EMA, valid 5..=150.
    pub macd_signal: usize,
    /// ADX lookback, valid 20..=300.
    pub adx_period: usize,
    /// ATR lookback, valid 20..=300.
    pub atr_period: usize,
    /// Short EMA for the macro-trend crossover, valid 10..=200. Must be
    /// < `ema_long`.
    pub ema_short: usize,
    /// Long EMA for the macro-trend crossover, valid 50..=500.
    pub ema_long: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            rsi_period: 150,
            macd_fast: 60,
            macd_slow: 130,
            macd_signal: 45,
            adx_period: 140,
            atr_period: 140,
            ema_short: 50,
            ema_long: 200,
        }
    }
}

impl IndicatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn check(name: &str, value: usize, min: usize, max: usize) -> Result<(), ConfigError> {
            if value < min || value > max {
                return Err(ConfigError::Validation(format!(
                    "{} = {} outside valid range {}..={}",
                    name, value, min, max
                )));
            }
            Ok(())
        }

        check("rsi_period", self.rsi_period, 20, 300)?;
        check("macd_fast", self.macd_fast, 10, 200)?;
        check("macd_slow", self.macd_slow, 20, 400)?;
        check("macd_signal", self.macd_signal, 5, 150)?;
        check("adx_period", self.adx_period, 20, 300)?;
        check("atr_period", self.atr_period, 20, 300)?;
        check("ema_short", self.ema_short, 10, 200)?;
        check("ema_long", self.ema_long, 50, 500)?;

        if self.macd_fast >= self.macd_slow {
            return Err(ConfigError::Validation(format!(
                "macd_fast ({}) must be below macd_slow ({})",
                self.macd_fast, self.macd_slow
            )));
        }
        if self.ema_short >= self.ema_long {
            return Err(ConfigError::Validation(format!(
                "ema_short ({}) must be below ema_long ({})",
                self.ema_short, self.ema_long
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Provider credentials
// ============================================================================

/// API credentials, injected into `connect()` and `search()`. A missing
/// credential disables that provider (the feed falls back to the synthetic
/// generator; search simply skips the provider).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCredentials {
    pub finnhub_api_key: Option<String>,
    pub alpha_vantage_api_key: Option<String>,
    pub twelve_data_api_key: Option<String>,
    /// Base URL of a locally running IBKR Client Portal gateway.
    pub ibkr_gateway_url: Option<String>,
}

impl ProviderCredentials {
    pub fn has_any(&self) -> bool {
        self.finnhub_api_key.is_some()
            || self.alpha_vantage_api_key.is_some()
            || self.twelve_data_api_key.is_some()
            || self.ibkr_gateway_url.is_some()
    }
}

// ============================================================================
// Provider endpoints & timing
// ============================================================================

/// Endpoint URLs and timing knobs shared by the concrete transports.
/// Defaults target the live vendor services; tests point them at local
/// fixtures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub finnhub_ws_url: String,
    pub finnhub_rest_url: String,
    pub alpha_vantage_url: String,
    pub twelve_data_ws_url: String,
    pub twelve_data_rest_url: String,

    /// Poll cadence for the REST transports, milliseconds.
    pub poll_interval_ms: u64,
    /// Extended interval after a rate-limit response, seconds.
    pub rate_limit_backoff_secs: u64,
    /// Reconnect backoff base, seconds. Doubles per attempt.
    pub reconnect_base_secs: u64,
    /// Reconnect backoff cap, seconds.
    pub reconnect_cap_secs: u64,
    /// Reconnect attempts before the connection is declared failed.
    pub max_reconnect_attempts: u32,
    /// Gateway keepalive cadence, seconds.
    pub keepalive_interval_secs: u64,
    /// HTTP request timeout, seconds.
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            finnhub_ws_url: "wss://ws.finnhub.io".to_string(),
            finnhub_rest_url: "https://finnhub.io/api/v1".to_string(),
            alpha_vantage_url: "https://www.alphavantage.co/query".to_string(),
            twelve_data_ws_url: "wss://ws.twelvedata.com/v1/quotes/price".to_string(),
            twelve_data_rest_url: "https://api.twelvedata.com".to_string(),
            poll_interval_ms: 1500,
            rate_limit_backoff_secs: 60,
            reconnect_base_secs: 1,
            reconnect_cap_secs: 30,
            max_reconnect_attempts: 10,
            keepalive_interval_secs: 60,
            request_timeout_secs: 10,
        }
    }
}

// ============================================================================
// Synthetic generator
// ============================================================================

/// Parameters for the in-process synthetic walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    pub seed: u64,
    pub start_price: f64,
    /// Deterministic per-tick drift as a fraction of price.
    pub drift_per_tick: f64,
    /// Noise amplitude as a fraction of price.
    pub noise_amplitude: f64,
    /// Chance per tick of printing a transient dip below the walk, so
    /// candle wicks and reversal formations show up without real data.
    pub dip_probability: f64,
    /// Depth of a transient dip as a fraction of price.
    pub dip_depth: f64,
    pub tick_interval_ms: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed_1e55,
            start_price: 100.0,
            drift_per_tick: 0.0,
            noise_amplitude: 0.0008,
            dip_probability: 0.01,
            dip_depth: 0.02,
            tick_interval_ms: 100,
        }
    }
}

// ============================================================================
// Feed configuration
// ============================================================================

/// Top-level configuration for one feed instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Rolling price-history capacity.
    pub history_capacity: usize,
    /// Raw ticks folded into one candle, valid 10..=200.
    pub ticks_per_candle: usize,
    pub indicators: IndicatorConfig,
    pub providers: ProviderConfig,
    pub synthetic: SyntheticConfig,
    /// Symbol-search cache TTL, seconds.
    pub search_cache_ttl_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            ticks_per_candle: 50,
            indicators: IndicatorConfig::default(),
            providers: ProviderConfig::default(),
            synthetic: SyntheticConfig::default(),
            search_cache_ttl_secs: 300,
        }
    }
}

impl FeedConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_capacity == 0 {
            return Err(ConfigError::Validation(
                "history_capacity must be positive".to_string(),
            ));
        }
        if self.ticks_per_candle < 10 || self.ticks_per_candle > 200 {
            return Err(ConfigError::Validation(format!(
                "ticks_per_candle = {} outside valid range 10..=200",
                self.ticks_per_candle
            )));
        }
        self.indicators.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(FeedConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rsi_period_range_enforced() {
        let mut config = IndicatorConfig::default();
        config.rsi_period = 10;
        assert!(config.validate().is_err());
        config.rsi_period = 301;
        assert!(config.validate().is_err());
        config.rsi_period = 20;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_macd_fast_must_be_below_slow() {
        let mut config = IndicatorConfig::default();
        config.macd_fast = 130;
        config.macd_slow = 130;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ticks_per_candle_range() {
        let mut config = FeedConfig::default();
        config.ticks_per_candle = 5;
        assert!(config.validate().is_err());
        config.ticks_per_candle = 50;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_credentials_has_any() {
        let mut creds = ProviderCredentials::default();
        assert!(!creds.has_any());
        creds.finnhub_api_key = Some("key".to_string());
        assert!(creds.has_any());
    }
}
