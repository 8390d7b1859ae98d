// Rolling Price History - bounded FIFO of recent tick prices
// The substrate every indicator and candle computation reads from

/// Bounded price history plus a monotonic tick counter.
///
/// The counter is never capped: candle-boundary arithmetic divides the total
/// tick count, so it must keep advancing after the buffer starts evicting.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    prices: Vec<f64>,
    capacity: usize,
    total_ticks: u64,
}

impl PriceHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            prices: Vec::with_capacity(capacity.min(4096)),
            capacity,
            total_ticks: 0,
        }
    }

    /// Append a price, evicting the oldest entries past capacity. The tick
    /// counter increments on every call regardless of eviction.
    pub fn append(&mut self, price: f64) {
        self.prices.push(price);
        if self.prices.len() > self.capacity {
            let excess = self.prices.len() - self.capacity;
            self.prices.drain(..excess);
        }
        self.total_ticks += 1;
    }

    pub fn prices(&self) -> &[f64] {
        &self.prices
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn last(&self) -> Option<f64> {
        self.prices.last().copied()
    }

    /// Total ticks ever appended, unaffected by the capacity cap.
    pub fn total_ticks(&self) -> u64 {
        self.total_ticks
    }

    pub fn clear(&mut self) {
        self.prices.clear();
        self.total_ticks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_below_capacity() {
        let mut history = PriceHistory::new(1000);
        for i in 0..10 {
            history.append(i as f64);
        }
        assert_eq!(history.len(), 10);
        assert_eq!(history.total_ticks(), 10);
        assert_eq!(history.last(), Some(9.0));
    }

    #[test]
    fn test_cap_keeps_most_recent_in_order() {
        let mut history = PriceHistory::new(1000);
        for i in 0..1500 {
            history.append(i as f64);
        }
        assert_eq!(history.len(), 1000);
        assert_eq!(history.total_ticks(), 1500);
        assert_eq!(history.prices()[0], 500.0);
        assert_eq!(history.prices()[999], 1499.0);
        for (offset, window) in history.prices().windows(2).enumerate() {
            assert!(window[1] > window[0], "order broken at offset {}", offset);
        }
    }

    #[test]
    fn test_counter_survives_clear_reset() {
        let mut history = PriceHistory::new(100);
        history.append(1.0);
        history.append(2.0);
        history.clear();
        assert_eq!(history.len(), 0);
        assert_eq!(history.total_ticks(), 0);
        assert!(history.is_empty());
    }
}
