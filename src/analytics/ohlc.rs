// OHLC Aggregation - folds the raw tick buffer into fixed-size candles
// One candle per complete window; partial trailing windows are dropped

use crate::core::types::OhlcCandle;

/// Partition `prices` into non-overlapping windows of `ticks_per_candle`
/// and emit one candle per complete window.
pub fn aggregate(prices: &[f64], ticks_per_candle: usize) -> Vec<OhlcCandle> {
    if ticks_per_candle == 0 || prices.len() < ticks_per_candle {
        return Vec::new();
    }

    let complete = prices.len() / ticks_per_candle;
    let mut candles = Vec::with_capacity(complete);

    for window_index in 0..complete {
        let start = window_index * ticks_per_candle;
        let window = &prices[start..start + ticks_per_candle];

        let mut high = f64::MIN;
        let mut low = f64::MAX;
        for &price in window {
            if price > high {
                high = price;
            }
            if price < low {
                low = price;
            }
        }

        candles.push(OhlcCandle {
            open: window[0],
            high,
            low,
            close: window[ticks_per_candle - 1],
            tick_count: ticks_per_candle,
            start_index: start,
        });
    }

    candles
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_candle_count() {
        let prices: Vec<f64> = (0..237).map(|i| i as f64).collect();
        let candles = aggregate(&prices, 50);
        assert_eq!(candles.len(), 4);
    }

    #[test]
    fn test_window_exact_open_close() {
        let prices: Vec<f64> = (0..150).map(|i| i as f64).collect();
        let candles = aggregate(&prices, 50);
        for (index, candle) in candles.iter().enumerate() {
            let start = index * 50;
            assert_eq!(candle.open, prices[start]);
            assert_eq!(candle.close, prices[start + 49]);
            assert_eq!(candle.start_index, start);
            assert_eq!(candle.tick_count, 50);
        }
    }

    #[test]
    fn test_extrema_within_window() {
        let prices = vec![5.0, 9.0, 1.0, 4.0, 2.0, 8.0, 3.0, 7.0];
        let candles = aggregate(&prices, 4);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].high, 9.0);
        assert_eq!(candles[0].low, 1.0);
        assert_eq!(candles[1].high, 8.0);
        assert_eq!(candles[1].low, 2.0);
    }

    #[test]
    fn test_partial_tail_dropped() {
        let prices: Vec<f64> = (0..49).map(|i| i as f64).collect();
        assert!(aggregate(&prices, 50).is_empty());
    }
}
