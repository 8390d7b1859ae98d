// End-to-End Pipeline Tests
//
// These tests exercise the full data path without network connections:
//   Synthetic provider -> TickerFeed -> history -> indicators/candles ->
//   pattern scanner -> published snapshot
//
// Run with: cargo test --test pipeline_e2e

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tickpulse::analytics::{aggregate, PatternScanner};
use tickpulse::core::{
    FeedConfig, OhlcCandle, ProviderCredentials, SyntheticConfig,
};
use tickpulse::history::PriceHistory;
use tickpulse::providers::{reconnect_delay, ProviderSession};
use tickpulse::{PatternKind, ProviderKind, TickerFeed, TrendDirection};

// ============================================================================
// Property 1 - History cap and tick counter
// ============================================================================

#[test]
fn test_history_cap_and_uncapped_counter() {
    let mut history = PriceHistory::new(1000);
    let total = 4321;
    for i in 0..total {
        history.append(i as f64);
    }

    assert_eq!(history.len(), 1000);
    assert_eq!(history.total_ticks(), total);
    let expected_first = (total - 1000) as f64;
    assert_eq!(history.prices()[0], expected_first);
    assert_eq!(history.prices()[999], (total - 1) as f64);
}

// ============================================================================
// Property 2/3 - Indicator behavior on monotone series
// ============================================================================

#[test]
fn test_rsi_extremes_on_monotone_series() {
    use tickpulse::analytics::indicators::rsi;

    let rising: Vec<f64> = (0..500).map(|i| 100.0 + i as f64 * 0.1).collect();
    let falling: Vec<f64> = (0..500).map(|i| 150.0 - i as f64 * 0.1).collect();

    assert_eq!(rsi(&rising, 150), 100.0);
    assert!(rsi(&falling, 150) < 1.0);
    for window in [10, 100, 250, 500] {
        let value = rsi(&rising[..window], 150);
        assert!((0.0..=100.0).contains(&value));
    }
}

#[test]
fn test_macd_histogram_non_negative_on_rising_series() {
    use tickpulse::analytics::indicators::macd;

    let rising: Vec<f64> = (0..600).map(|i| 100.0 + i as f64 * 0.05).collect();
    for window in [200, 300, 450, 600] {
        let value = macd(&rising[..window], 60, 130, 45);
        assert!(
            value.histogram >= -1e-9,
            "histogram went negative ({}) at window {}",
            value.histogram,
            window
        );
    }
}

// ============================================================================
// Property 4 - Candle completeness
// ============================================================================

#[test]
fn test_candle_count_matches_floor_division() {
    for (len, per_candle) in [(1000, 50), (999, 50), (50, 50), (49, 50), (777, 33)] {
        let prices: Vec<f64> = (0..len).map(|i| 100.0 + (i % 17) as f64).collect();
        let candles = aggregate(&prices, per_candle);
        assert_eq!(candles.len(), len / per_candle, "len={} k={}", len, per_candle);
        for (index, candle) in candles.iter().enumerate() {
            let start = index * per_candle;
            assert_eq!(candle.open, prices[start]);
            assert_eq!(candle.close, prices[start + per_candle - 1]);
        }
    }
}

// ============================================================================
// Property 5 - Pattern cooldown
// ============================================================================

#[test]
fn test_pattern_cooldown_suppresses_back_to_back_detections() {
    let doji = OhlcCandle {
        open: 100.0,
        high: 105.0,
        low: 95.0,
        close: 100.3,
        tick_count: 50,
        start_index: 0,
    };

    let mut scanner = PatternScanner::new();
    let mut fired = Vec::new();
    let mut candles = Vec::new();
    for boundary in 1..=6u64 {
        candles.push(doji);
        if scanner.scan(&candles, boundary, 0).is_some() {
            fired.push(boundary);
        }
    }

    // First fires immediately, then every second boundary
    assert_eq!(fired, vec![1, 3, 5]);
}

// ============================================================================
// Property 6 - Stale-response guard
// ============================================================================

#[test]
fn test_stale_response_discarded_after_symbol_change() {
    let session = ProviderSession::new("AAPL", Arc::new(|_| {}));
    session.activate();

    // A polling transport snapshots before the request goes out
    let (symbol, generation) = session.snapshot();
    assert_eq!(symbol, "AAPL");

    // The user switches symbols while the request is in flight
    session.change_symbol("TSLA");

    // The late response must not be delivered
    assert!(!session.is_current(generation));
}

#[test]
fn test_stale_response_discarded_after_disconnect() {
    let session = ProviderSession::new("AAPL", Arc::new(|_| {}));
    session.activate();
    let (_, generation) = session.snapshot();
    session.shutdown();
    assert!(!session.is_current(generation));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_feed_only_publishes_active_symbol_after_change() {
    let mut config = FeedConfig::default();
    config.synthetic = SyntheticConfig {
        tick_interval_ms: 1,
        ..SyntheticConfig::default()
    };
    let feed = TickerFeed::new(config).unwrap();
    feed.start_provider("AAPL", ProviderKind::Synthetic, &ProviderCredentials::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(feed.latest().unwrap().symbol, "AAPL");

    feed.change_symbol("TSLA").await.unwrap();
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Some(snapshot) = feed.latest() {
            assert_eq!(snapshot.symbol, "TSLA", "stale-symbol snapshot leaked through");
        }
    }
    assert!(feed.latest().is_some(), "new symbol never produced a snapshot");

    feed.stop_provider().await;
}

// ============================================================================
// Property 7 - Reconnect backoff schedule
// ============================================================================

#[test]
fn test_backoff_non_decreasing_capped_and_resettable() {
    let schedule: Vec<u64> = (0..10)
        .map(|attempt| reconnect_delay(attempt, 1, 30).as_secs())
        .collect();

    for pair in schedule.windows(2) {
        assert!(pair[1] >= pair[0], "schedule must be non-decreasing: {:?}", schedule);
    }
    assert_eq!(*schedule.last().unwrap(), 30, "cap must hold");
    assert_eq!(schedule[0], 1, "base delay");

    // A successful connection resets the attempt counter to zero, which
    // maps back onto the base delay
    assert_eq!(reconnect_delay(0, 1, 30).as_secs(), 1);
}

// ============================================================================
// Property 8 - Full pipeline scenario
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_synthetic_uptrend_end_to_end() {
    let mut config = FeedConfig::default();
    config.synthetic = SyntheticConfig {
        seed: 42,
        start_price: 195.0,
        drift_per_tick: 0.0006,
        noise_amplitude: 0.0004,
        dip_probability: 0.01,
        dip_depth: 0.08,
        tick_interval_ms: 1,
    };
    let feed = TickerFeed::new(config).unwrap();
    feed.start_provider("AAPL", ProviderKind::Synthetic, &ProviderCredentials::default())
        .await
        .unwrap();

    // Drive until 5000 ticks have been ingested, sampling every pattern
    // the pipeline publishes along the way
    let mut patterns_seen: HashSet<PatternKind> = HashSet::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(120);
    loop {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if let Some(snapshot) = feed.latest() {
            if let Some(pattern) = &snapshot.pattern {
                patterns_seen.insert(pattern.kind);
            }
        }
        if feed.stats().ticks_ingested >= 5000 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "synthetic feed too slow: {}",
            feed.stats()
        );
    }
    feed.stop_provider().await;

    let snapshot = feed.latest().expect("snapshot must exist after 5000 ticks");
    let stats = feed.stats();

    assert_eq!(snapshot.symbol, "AAPL");
    assert!(snapshot.price > 195.0, "drift should lift price, got {}", snapshot.price);
    assert_eq!(snapshot.indicators.trend, TrendDirection::Bullish);
    assert!(snapshot.indicators.macro_trend > 0.0);
    assert!(
        patterns_seen.contains(&PatternKind::BullishEngulfing)
            || patterns_seen.contains(&PatternKind::Hammer),
        "expected a bullish engulfing or hammer, saw {:?}",
        patterns_seen
    );

    // History stays capped while the counter keeps the candle clock honest
    assert!(stats.ticks_ingested >= 5000);
    assert!(stats.candles_completed >= 90);
    assert_eq!(snapshot.candles.len(), 1000 / 50);
}
