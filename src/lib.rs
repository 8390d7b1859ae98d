// tickpulse - live price-tick ingestion and streaming signal pipeline
//
// One provider transport at a time delivers ticks for the active symbol into
// a bounded rolling history; every tick re-derives a technical-signal
// snapshot (oscillators, trend strength, volatility, candles, pattern
// events) published for downstream consumers. Symbol search with a TTL
// cache runs as an independent side path.

pub mod core;
pub mod history;
pub mod analytics;
pub mod providers;
pub mod search;
pub mod feed;

pub use crate::core::{
    ConnectionStatus, DetectedPattern, FeedConfig, IndicatorSnapshot, OhlcCandle,
    PatternKind, ProviderCredentials, Sentiment, SignalSnapshot, StatusUpdate,
    SymbolMatch, Tick, TrendDirection,
};
pub use feed::TickerFeed;
pub use providers::ProviderKind;
