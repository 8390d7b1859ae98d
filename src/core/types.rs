// Core Type Definitions for the Tick Signal Pipeline
// Shared across providers, analytics and the feed glue

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Candlestick formations recognized by the pattern scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternKind {
    Doji,
    Hammer,
    ShootingStar,
    BullishEngulfing,
    BearishEngulfing,
    MorningStar,
    EveningStar,
}

impl PatternKind {
    /// Sentiment is fixed per formation.
    pub fn sentiment(&self) -> Sentiment {
        match self {
            PatternKind::Doji => Sentiment::Neutral,
            PatternKind::Hammer => Sentiment::Bullish,
            PatternKind::ShootingStar => Sentiment::Bearish,
            PatternKind::BullishEngulfing => Sentiment::Bullish,
            PatternKind::BearishEngulfing => Sentiment::Bearish,
            PatternKind::MorningStar => Sentiment::Bullish,
            PatternKind::EveningStar => Sentiment::Bearish,
        }
    }

    /// Number of candles the formation spans. Wider formations win when
    /// several match on the same candle boundary.
    pub fn candle_span(&self) -> u32 {
        match self {
            PatternKind::MorningStar | PatternKind::EveningStar => 3,
            PatternKind::BullishEngulfing | PatternKind::BearishEngulfing => 2,
            PatternKind::Doji | PatternKind::Hammer | PatternKind::ShootingStar => 1,
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Tick
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub timestamp_ms: i64,
    pub volume: f64,
}

impl Tick {
    pub fn new(symbol: String, price: f64, timestamp_ms: i64, volume: f64) -> Self {
        Self { symbol, price, timestamp_ms, volume }
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tick(symbol={}, price={:.4}, ts={}, vol={:.2})",
            self.symbol, self.price, self.timestamp_ms, self.volume
        )
    }
}

// ============================================================================
// StatusUpdate
// ============================================================================

/// Connection state plus an optional human-readable message, delivered
/// through the provider status callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: ConnectionStatus,
    pub message: Option<String>,
}

impl StatusUpdate {
    pub fn new(status: ConnectionStatus) -> Self {
        Self { status, message: None }
    }

    pub fn with_message(status: ConnectionStatus, message: impl Into<String>) -> Self {
        Self { status, message: Some(message.into()) }
    }
}

impl fmt::Display for StatusUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {}", self.status, msg),
            None => write!(f, "{}", self.status),
        }
    }
}

// ============================================================================
// OhlcCandle
// ============================================================================

/// A synthetic candle aggregated from a fixed-size run of raw ticks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcCandle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub tick_count: usize,
    pub start_index: usize,
}

impl OhlcCandle {
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

impl fmt::Display for OhlcCandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Candle(O={:.4}, H={:.4}, L={:.4}, C={:.4}, ticks={})",
            self.open, self.high, self.low, self.close, self.tick_count
        )
    }
}

// ============================================================================
// DetectedPattern
// ============================================================================

/// A discrete, timestamped detection of a candlestick formation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub kind: PatternKind,
    pub sentiment: Sentiment,
    pub strength: f64,
    pub timestamp_ms: i64,
    pub candle_index: u64,
}

impl fmt::Display for DetectedPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pattern(kind={}, sentiment={}, strength={:.2}, candle={})",
            self.kind, self.sentiment, self.strength, self.candle_index
        )
    }
}

// ============================================================================
// Indicator values
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

impl fmt::Display for MacdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MACD(line={:.5}, signal={:.5}, hist={:.5})",
            self.macd, self.signal, self.histogram
        )
    }
}

/// Full derived-signal set, recomputed from the price buffer on every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub macd: MacdValue,
    pub adx: f64,
    pub atr_raw: f64,
    pub atr_normalized: f64,
    pub macro_trend: f64,
    pub volatility: f64,
    pub momentum: f64,
    pub trend: TrendDirection,
}

impl Default for IndicatorSnapshot {
    fn default() -> Self {
        Self {
            rsi: 50.0,
            macd: MacdValue::default(),
            adx: 20.0,
            atr_raw: 0.0,
            atr_normalized: 0.0,
            macro_trend: 0.0,
            volatility: 0.0,
            momentum: 0.0,
            trend: TrendDirection::Neutral,
        }
    }
}

// ============================================================================
// SignalSnapshot
// ============================================================================

/// Per-tick snapshot published for downstream consumers. Read-only on the
/// consumer side; updated at most once per tick.
#[derive(Debug, Clone, Serialize)]
pub struct SignalSnapshot {
    pub symbol: String,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub change: f64,
    pub change_pct: f64,
    pub volume: f64,
    pub indicators: IndicatorSnapshot,
    pub candles: Vec<OhlcCandle>,
    pub pattern: Option<DetectedPattern>,
    pub timestamp_ms: i64,
}

impl fmt::Display for SignalSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signal(symbol={}, price={:.4}, change={:+.2}%, trend={}, candles={})",
            self.symbol, self.price, self.change_pct, self.indicators.trend,
            self.candles.len()
        )
    }
}

// ============================================================================
// SymbolMatch
// ============================================================================

/// A single symbol-search result, tagged with the provider that returned it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolMatch {
    pub symbol: String,
    pub description: String,
    pub source: String,
}

impl fmt::Display for SymbolMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) [{}]", self.symbol, self.description, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_sentiment_fixed_per_kind() {
        assert_eq!(PatternKind::Hammer.sentiment(), Sentiment::Bullish);
        assert_eq!(PatternKind::ShootingStar.sentiment(), Sentiment::Bearish);
        assert_eq!(PatternKind::Doji.sentiment(), Sentiment::Neutral);
        assert_eq!(PatternKind::MorningStar.sentiment(), Sentiment::Bullish);
        assert_eq!(PatternKind::EveningStar.sentiment(), Sentiment::Bearish);
    }

    #[test]
    fn test_pattern_candle_span() {
        assert_eq!(PatternKind::MorningStar.candle_span(), 3);
        assert_eq!(PatternKind::BullishEngulfing.candle_span(), 2);
        assert_eq!(PatternKind::Doji.candle_span(), 1);
    }

    #[test]
    fn test_candle_geometry() {
        let candle = OhlcCandle {
            open: 10.0,
            high: 14.0,
            low: 9.0,
            close: 12.0,
            tick_count: 50,
            start_index: 0,
        };
        assert_eq!(candle.body(), 2.0);
        assert_eq!(candle.range(), 5.0);
        assert_eq!(candle.upper_wick(), 2.0);
        assert_eq!(candle.lower_wick(), 1.0);
        assert_eq!(candle.midpoint(), 11.5);
        assert!(candle.is_bullish());
        assert!(!candle.is_bearish());
    }

    #[test]
    fn test_display_traits() {
        assert_eq!(format!("{}", ConnectionStatus::Reconnecting), "Reconnecting");
        assert_eq!(format!("{}", TrendDirection::Bullish), "Bullish");
        let update = StatusUpdate::with_message(ConnectionStatus::Error, "rate limited");
        assert_eq!(format!("{}", update), "Error: rate limited");
    }
}
