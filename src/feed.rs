// Ticker Feed - ingestion glue between one provider and the analytics
// One provider + one history per active symbol; the tick path is the
// critical section and is serialized behind a single mutex

use crate::analytics::{aggregate, indicators, PatternScanner};
use crate::core::config::{ConfigError, FeedConfig, ProviderCredentials};
use crate::core::types::{
    ConnectionStatus, DetectedPattern, SignalSnapshot, StatusUpdate, Tick,
};
use crate::history::PriceHistory;
use crate::providers::{create_provider, MarketDataProvider, ProviderError, ProviderKind};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Feed statistics snapshot.
#[derive(Debug, Clone)]
pub struct FeedStats {
    pub symbol: String,
    pub ticks_ingested: u64,
    pub ticks_discarded: u64,
    pub candles_completed: u64,
    pub patterns_detected: u64,
}

impl fmt::Display for FeedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Feed(symbol={}, ticks={}, discarded={}, candles={}, patterns={})",
            self.symbol, self.ticks_ingested, self.ticks_discarded,
            self.candles_completed, self.patterns_detected
        )
    }
}

/// Per-symbol mutable state. Swapped out wholesale on a symbol change.
struct SymbolState {
    symbol: String,
    history: PriceHistory,
    scanner: PatternScanner,
    candles_seen: u64,
    last_pattern: Option<DetectedPattern>,
    session_open: Option<f64>,
    session_high: f64,
    session_low: f64,
}

impl SymbolState {
    fn new(symbol: &str, history_capacity: usize) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            history: PriceHistory::new(history_capacity),
            scanner: PatternScanner::new(),
            candles_seen: 0,
            last_pattern: None,
            session_open: None,
            session_high: f64::MIN,
            session_low: f64::MAX,
        }
    }
}

struct FeedState {
    config: FeedConfig,
    symbol_state: Mutex<SymbolState>,
    snapshot: RwLock<Option<SignalSnapshot>>,
    status: RwLock<StatusUpdate>,
    ticks_ingested: AtomicU64,
    ticks_discarded: AtomicU64,
    patterns_detected: AtomicU64,
}

impl FeedState {
    /// The critical section: append, recompute, publish. Invoked from the
    /// transport's own task context, serialized by the state mutex.
    fn ingest(&self, tick: Tick) {
        let mut state = self.symbol_state.lock();

        if tick.symbol != state.symbol {
            self.ticks_discarded.fetch_add(1, Ordering::Relaxed);
            debug!(got = %tick.symbol, want = %state.symbol, "Tick for inactive symbol discarded");
            return;
        }

        state.history.append(tick.price);
        self.ticks_ingested.fetch_add(1, Ordering::Relaxed);

        let open = *state.session_open.get_or_insert(tick.price);
        if tick.price > state.session_high {
            state.session_high = tick.price;
        }
        if tick.price < state.session_low {
            state.session_low = tick.price;
        }

        let indicators = indicators::compute(state.history.prices(), &self.config.indicators);
        let candles = aggregate(state.history.prices(), self.config.ticks_per_candle);

        // Candle boundaries come from the uncapped tick counter, so the
        // arithmetic stays correct long after the buffer starts evicting
        let completed = state.history.total_ticks() / self.config.ticks_per_candle as u64;
        if completed > state.candles_seen {
            state.candles_seen = completed;
            if let Some(pattern) = state.scanner.scan(&candles, completed, tick.timestamp_ms) {
                self.patterns_detected.fetch_add(1, Ordering::Relaxed);
                state.last_pattern = Some(pattern);
            }
        }

        let change = tick.price - open;
        let snapshot = SignalSnapshot {
            symbol: state.symbol.clone(),
            price: tick.price,
            open,
            high: state.session_high,
            low: state.session_low,
            change,
            change_pct: if open != 0.0 { change / open * 100.0 } else { 0.0 },
            volume: tick.volume,
            indicators,
            candles,
            pattern: state.last_pattern.clone(),
            timestamp_ms: tick.timestamp_ms,
        };
        drop(state);

        *self.snapshot.write() = Some(snapshot);
    }

    fn reset_for(&self, symbol: &str) {
        *self.symbol_state.lock() = SymbolState::new(symbol, self.config.history_capacity);
        *self.snapshot.write() = None;
    }
}

/// Owns the active provider connection and the per-symbol analytics state.
/// Starting a provider for a new symbol tears the previous one down first;
/// consumers read the published snapshot and status.
pub struct TickerFeed {
    state: Arc<FeedState>,
    provider: tokio::sync::Mutex<Option<Arc<dyn MarketDataProvider>>>,
}

impl TickerFeed {
    pub fn new(config: FeedConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let capacity = config.history_capacity;
        Ok(Self {
            state: Arc::new(FeedState {
                config,
                symbol_state: Mutex::new(SymbolState::new("", capacity)),
                snapshot: RwLock::new(None),
                status: RwLock::new(StatusUpdate::new(ConnectionStatus::Disconnected)),
                ticks_ingested: AtomicU64::new(0),
                ticks_discarded: AtomicU64::new(0),
                patterns_detected: AtomicU64::new(0),
            }),
            provider: tokio::sync::Mutex::new(None),
        })
    }

    /// Connect a provider for `symbol`, tearing down any previous
    /// connection and resetting the analytics state.
    pub async fn start_provider(
        &self,
        symbol: &str,
        kind: ProviderKind,
        credentials: &ProviderCredentials,
    ) -> Result<(), ProviderError> {
        let mut slot = self.provider.lock().await;
        if let Some(previous) = slot.take() {
            previous.disconnect().await;
        }

        self.state.reset_for(symbol);

        let tick_state = self.state.clone();
        let status_state = self.state.clone();
        let provider = create_provider(
            kind,
            symbol,
            credentials,
            &self.state.config,
            Arc::new(move |tick| tick_state.ingest(tick)),
            Arc::new(move |update| {
                debug!(status = %update, "Provider status changed");
                *status_state.status.write() = update;
            }),
        );

        info!(symbol = symbol, kind = %provider.kind(), "Starting provider");
        let result = provider.connect().await;
        *slot = Some(provider);
        result
    }

    /// Switch the active symbol on the running provider. Analytics state is
    /// reset atomically from the caller's perspective; ticks for the old
    /// symbol that are still in flight are discarded.
    pub async fn change_symbol(&self, symbol: &str) -> Result<(), ProviderError> {
        let slot = self.provider.lock().await;
        let provider = slot.as_ref().ok_or(ProviderError::NotConnected)?;

        self.state.reset_for(symbol);
        provider.change_symbol(symbol).await
    }

    /// Disconnect and drop the active provider. Idempotent.
    pub async fn stop_provider(&self) {
        let mut slot = self.provider.lock().await;
        if let Some(provider) = slot.take() {
            provider.disconnect().await;
        }
        *self.state.status.write() = StatusUpdate::new(ConnectionStatus::Disconnected);
    }

    /// Most recent published snapshot, if any tick has arrived yet.
    pub fn latest(&self) -> Option<SignalSnapshot> {
        self.state.snapshot.read().clone()
    }

    pub fn status(&self) -> StatusUpdate {
        self.state.status.read().clone()
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            symbol: self.state.symbol_state.lock().symbol.clone(),
            ticks_ingested: self.state.ticks_ingested.load(Ordering::Relaxed),
            ticks_discarded: self.state.ticks_discarded.load(Ordering::Relaxed),
            candles_completed: self.state.symbol_state.lock().candles_seen,
            patterns_detected: self.state.patterns_detected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::now_millis;

    fn feed() -> TickerFeed {
        TickerFeed::new(FeedConfig::default()).unwrap()
    }

    fn tick(symbol: &str, price: f64) -> Tick {
        Tick::new(symbol.to_string(), price, now_millis(), 10.0)
    }

    #[test]
    fn test_ingest_publishes_snapshot_per_tick() {
        let feed = feed();
        feed.state.reset_for("AAPL");

        feed.state.ingest(tick("AAPL", 195.0));
        let snapshot = feed.latest().unwrap();
        assert_eq!(snapshot.symbol, "AAPL");
        assert_eq!(snapshot.price, 195.0);
        assert_eq!(snapshot.open, 195.0);
        assert_eq!(snapshot.change, 0.0);

        feed.state.ingest(tick("AAPL", 197.0));
        let snapshot = feed.latest().unwrap();
        assert_eq!(snapshot.price, 197.0);
        assert_eq!(snapshot.open, 195.0);
        assert!((snapshot.change - 2.0).abs() < 1e-9);
        assert!(snapshot.high >= 197.0);
        assert!(snapshot.low <= 195.0);
    }

    #[test]
    fn test_tick_for_wrong_symbol_discarded() {
        let feed = feed();
        feed.state.reset_for("AAPL");

        feed.state.ingest(tick("MSFT", 400.0));
        assert!(feed.latest().is_none());
        assert_eq!(feed.stats().ticks_discarded, 1);
        assert_eq!(feed.stats().ticks_ingested, 0);
    }

    #[test]
    fn test_candles_appear_at_boundaries() {
        let feed = feed();
        feed.state.reset_for("AAPL");

        for i in 0..49 {
            feed.state.ingest(tick("AAPL", 100.0 + i as f64 * 0.01));
        }
        assert!(feed.latest().unwrap().candles.is_empty());

        feed.state.ingest(tick("AAPL", 100.5));
        let snapshot = feed.latest().unwrap();
        assert_eq!(snapshot.candles.len(), 1);
        assert_eq!(snapshot.candles[0].open, 100.0);
        assert_eq!(feed.stats().candles_completed, 1);
    }

    #[test]
    fn test_reset_clears_history_and_snapshot() {
        let feed = feed();
        feed.state.reset_for("AAPL");
        feed.state.ingest(tick("AAPL", 195.0));
        assert!(feed.latest().is_some());

        feed.state.reset_for("MSFT");
        assert!(feed.latest().is_none());
        // Old-symbol ticks arriving late are dropped
        feed.state.ingest(tick("AAPL", 195.5));
        assert!(feed.latest().is_none());
    }

    #[tokio::test]
    async fn test_change_symbol_without_provider_errors() {
        let feed = feed();
        assert!(matches!(
            feed.change_symbol("MSFT").await,
            Err(ProviderError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_stop_provider_is_idempotent() {
        let feed = feed();
        feed.stop_provider().await;
        feed.stop_provider().await;
        assert_eq!(feed.status().status, ConnectionStatus::Disconnected);
    }
}
