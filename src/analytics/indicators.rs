// Technical Indicator Engine - pure functions over the price buffer
// Recomputed from scratch on every tick; bounded cost at <=10 ticks/sec
// with a 1000-sample history cap

use crate::core::config::IndicatorConfig;
use crate::core::types::{IndicatorSnapshot, MacdValue, TrendDirection};

/// Empirical normalization band for ATR as a fraction of price.
const ATR_BAND: (f64, f64) = (0.00005, 0.005);
/// Empirical normalization band for return stddev.
const VOLATILITY_BAND: (f64, f64) = (0.0005, 0.008);
/// Relative first-half/second-half difference that flips the coarse trend.
const TREND_THRESHOLD: f64 = 0.002;

/// Map `value` linearly from `[band.0, band.1]` onto `[0, 1]`, clamped.
fn map_band(value: f64, band: (f64, f64)) -> f64 {
    ((value - band.0) / (band.1 - band.0)).clamp(0.0, 1.0)
}

/// Iterative EMA with `k = 2/(period+1)`, seeded at the first sample and
/// smoothed across however many samples exist.
fn ema(prices: &[f64], period: usize) -> f64 {
    let Some(&first) = prices.first() else {
        return 0.0;
    };
    let k = 2.0 / (period as f64 + 1.0);
    prices[1..]
        .iter()
        .fold(first, |value, &price| price * k + value * (1.0 - k))
}

/// Relative Strength Index with Wilder smoothing. Neutral 50 until
/// `period + 1` samples exist.
pub fn rsi(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return 50.0;
    }

    let changes: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let p = period as f64;

    // Seed averages as the simple mean of the first `period` changes
    let mut avg_gain = changes[..period]
        .iter()
        .map(|&c| if c > 0.0 { c } else { 0.0 })
        .sum::<f64>()
        / p;
    let mut avg_loss = changes[..period]
        .iter()
        .map(|&c| if c < 0.0 { -c } else { 0.0 })
        .sum::<f64>()
        / p;

    for &change in &changes[period..] {
        let gain = if change > 0.0 { change } else { 0.0 };
        let loss = if change < 0.0 { -change } else { 0.0 };
        avg_gain = (avg_gain * (p - 1.0) + gain) / p;
        avg_loss = (avg_loss * (p - 1.0) + loss) / p;
    }

    if avg_loss == 0.0 {
        return 100.0;
    }
    100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
}

/// MACD line, signal and histogram from dual iterative EMAs. All-zero until
/// the slow period is satisfied.
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> MacdValue {
    if prices.is_empty() || prices.len() < slow {
        return MacdValue::default();
    }

    let k_fast = 2.0 / (fast as f64 + 1.0);
    let k_slow = 2.0 / (slow as f64 + 1.0);
    let k_signal = 2.0 / (signal as f64 + 1.0);

    let mut fast_ema = prices[0];
    let mut slow_ema = prices[0];
    let mut signal_ema = 0.0;

    for &price in &prices[1..] {
        fast_ema = price * k_fast + fast_ema * (1.0 - k_fast);
        slow_ema = price * k_slow + slow_ema * (1.0 - k_slow);
        let line = fast_ema - slow_ema;
        signal_ema = line * k_signal + signal_ema * (1.0 - k_signal);
    }

    let line = fast_ema - slow_ema;
    MacdValue {
        macd: line,
        signal: signal_ema,
        histogram: line - signal_ema,
    }
}

/// Average Directional Index approximated from consecutive price deltas.
/// Trade-price deltas stand in for true high/low/close directional movement
/// because no intrabar OHLC exists at tick granularity; downstream consumers
/// are tuned to this proxy's numeric range. Low-trend default 20 until
/// `period + 1` samples exist.
pub fn adx(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return 20.0;
    }

    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let p = period as f64;

    let mut smoothed_plus: f64 = deltas[..period].iter().map(|d| d.max(0.0)).sum();
    let mut smoothed_minus: f64 = deltas[..period].iter().map(|d| (-d).max(0.0)).sum();
    let mut smoothed_tr: f64 = deltas[..period].iter().map(|d| d.abs()).sum();

    fn dx(plus: f64, minus: f64, tr: f64) -> f64 {
        if tr <= 0.0 {
            return 0.0;
        }
        let di_plus = 100.0 * plus / tr;
        let di_minus = 100.0 * minus / tr;
        let di_sum = di_plus + di_minus;
        if di_sum <= 0.0 {
            0.0
        } else {
            100.0 * (di_plus - di_minus).abs() / di_sum
        }
    }

    let mut dx_values = Vec::with_capacity(deltas.len() - period + 1);
    dx_values.push(dx(smoothed_plus, smoothed_minus, smoothed_tr));

    for &delta in &deltas[period..] {
        smoothed_plus = smoothed_plus - smoothed_plus / p + delta.max(0.0);
        smoothed_minus = smoothed_minus - smoothed_minus / p + (-delta).max(0.0);
        smoothed_tr = smoothed_tr - smoothed_tr / p + delta.abs();
        dx_values.push(dx(smoothed_plus, smoothed_minus, smoothed_tr));
    }

    // Wilder-smooth the DX series into ADX
    let mut adx_value = if dx_values.len() >= period {
        dx_values[..period].iter().sum::<f64>() / p
    } else {
        dx_values.iter().sum::<f64>() / dx_values.len() as f64
    };
    if dx_values.len() > period {
        for &dx_value in &dx_values[period..] {
            adx_value = (adx_value * (p - 1.0) + dx_value) / p;
        }
    }
    adx_value.clamp(0.0, 100.0)
}

/// Wilder-smoothed mean absolute consecutive price change, returned raw.
pub fn atr(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return 0.0;
    }

    let ranges: Vec<f64> = prices.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let p = period as f64;
    let mut value = ranges[..period].iter().sum::<f64>() / p;
    for &range in &ranges[period..] {
        value = (value * (p - 1.0) + range) / p;
    }
    value
}

/// Map raw ATR to `[0, 1]` through the empirical `atr/price` band.
pub fn normalize_atr(atr_raw: f64, price: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    map_band(atr_raw / price, ATR_BAND)
}

/// EMA-crossover trend strength: `(short - long) / price * 100`, clamped to
/// `[-1, 1]`. Zero until 20 samples exist; with fewer samples than the long
/// period both EMAs smooth over whatever window is available.
pub fn macro_trend(prices: &[f64], short_period: usize, long_period: usize) -> f64 {
    if prices.len() < 20 {
        return 0.0;
    }
    let price = prices[prices.len() - 1];
    if price <= 0.0 {
        return 0.0;
    }
    let short = ema(prices, short_period);
    let long = ema(prices, long_period);
    ((short - long) / price * 100.0).clamp(-1.0, 1.0)
}

/// Stddev of percentage returns over the last 20 samples, mapped through
/// the empirical volatility band.
pub fn volatility(prices: &[f64]) -> f64 {
    let window = &prices[prices.len().saturating_sub(21)..];
    if window.len() < 2 {
        return 0.0;
    }

    let returns: Vec<f64> = window
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.is_empty() {
        return 0.0;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    map_band(variance.sqrt(), VOLATILITY_BAND)
}

/// Percentage price change over the last (up to) 20 samples, scaled by 50
/// and clamped to `[-1, 1]`.
pub fn momentum(prices: &[f64]) -> f64 {
    if prices.len() < 2 {
        return 0.0;
    }
    let span = (prices.len() - 1).min(20);
    let base = prices[prices.len() - 1 - span];
    if base == 0.0 {
        return 0.0;
    }
    let change = (prices[prices.len() - 1] - base) / base;
    (change * 50.0).clamp(-1.0, 1.0)
}

/// Coarse trend from first-half vs second-half means of the last 30 samples.
pub fn classify_trend(prices: &[f64]) -> TrendDirection {
    if prices.len() < 10 {
        return TrendDirection::Neutral;
    }
    let window = &prices[prices.len().saturating_sub(30)..];
    let half = window.len() / 2;
    let first = window[..half].iter().sum::<f64>() / half as f64;
    let second = window[half..].iter().sum::<f64>() / (window.len() - half) as f64;
    if first == 0.0 {
        return TrendDirection::Neutral;
    }

    let relative = (second - first) / first;
    if relative > TREND_THRESHOLD {
        TrendDirection::Bullish
    } else if relative < -TREND_THRESHOLD {
        TrendDirection::Bearish
    } else {
        TrendDirection::Neutral
    }
}

/// Compute the full derived-signal set for the current buffer.
pub fn compute(prices: &[f64], config: &IndicatorConfig) -> IndicatorSnapshot {
    let price = prices.last().copied().unwrap_or(0.0);
    let atr_raw = atr(prices, config.atr_period);

    IndicatorSnapshot {
        rsi: rsi(prices, config.rsi_period),
        macd: macd(prices, config.macd_fast, config.macd_slow, config.macd_signal),
        adx: adx(prices, config.adx_period),
        atr_raw,
        atr_normalized: normalize_atr(atr_raw, price),
        macro_trend: macro_trend(prices, config.ema_short, config.ema_long),
        volatility: volatility(prices),
        momentum: momentum(prices),
        trend: classify_trend(prices),
    }
}
